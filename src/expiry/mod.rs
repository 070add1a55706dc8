//! Expiration Propagation Module
//!
//! Moves key-expiration events from a partition's primary replica to its
//! backup replicas.
//!
//! ## Architecture Overview
//! 1. **Collection**: the primary's eviction scan removes expired records and
//!    pushes one `ExpiredKey` per removal into the partition's
//!    `ExpirationQueue`.
//! 2. **Batching**: the queue accumulates notifications until a batch is
//!    worth shipping (or a forced flush arrives).
//! 3. **Dispatch**: `ExpiryBackupSender` drains the whole queue in one pass
//!    under a single-drainer guard and fans the snapshot out to every
//!    eligible backup replica, fire-and-forget.
//! 4. **Driving**: `ExpirySweeper` is the periodic task invoking the scan and
//!    the dispatcher for every partition this node owns.

pub mod dispatcher;
pub mod queue;
pub mod sweeper;
