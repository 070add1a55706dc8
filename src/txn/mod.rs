//! Transactional Map Module
//!
//! Implements atomic, isolated multi-key transactions over the grid's named
//! maps.
//!
//! ## Architecture Overview
//! 1. **Begin**: `TransactionManager::begin` creates a `TransactionContext`
//!    with a timeout and a backup durability requirement.
//! 2. **Operate**: `TransactionalMap` handles bound to the context translate
//!    map calls into buffered, locked operations. The first touch of a key
//!    acquires its per-key lock and seeds a private copy-on-write overlay
//!    from committed state; every later call composes against the overlay,
//!    never re-reading committed state (repeatable read).
//! 3. **Commit**: buffered mutations are prepared on every touched
//!    partition's primary plus the required backup replicas (parallel
//!    invocation, synchronous join), then made visible in a second phase. A
//!    partial prepare failure triggers compensating rollback on every
//!    partition already prepared; callers never observe a mixture.
//! 4. **Terminate**: on any terminal state every per-key lock owned by the
//!    context is released, unblocking queued transactions.
//!
//! ## Submodules
//! - **`types`**: transaction ids, the state machine states, options.
//! - **`error`**: the failure taxonomy surfaced to callers.
//! - **`locks`**: the per-key lock table shared by all contexts of a node.
//! - **`context`**: the state machine and the two-phase commit coordinator.
//! - **`map`**: the client-facing map operation surface.

pub mod context;
pub mod error;
pub mod locks;
pub mod map;
pub mod types;
