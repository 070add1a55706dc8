//! Partitioned In-Memory Key-Value Grid: Replication & Transaction Core
//!
//! This library crate defines the core modules of the data grid. It serves as
//! the foundation for the binary executable (`main.rs`) and for embedded use.
//!
//! ## Architecture Modules
//! The system is composed of four loosely coupled subsystems:
//!
//! - **`cluster`**: The addressing layer. A static partition-to-node topology
//!   (primary + backups per partition, addressed by replica index) and the
//!   operation invocation layer that routes units of work to a specific
//!   partition replica over HTTP.
//! - **`store`**: The per-partition record store. Holds committed entries and
//!   the tentative (prepared) write overlay used by two-phase commit, tracks
//!   per-record expiry, and exposes the wire protocol plus HTTP handlers for
//!   inter-node operations.
//! - **`expiry`**: Expiration propagation. Per-(map, partition) queues of
//!   expired keys on the primary, a batching dispatcher that fans the queue
//!   contents out to backup replicas under a single-drainer guard, and the
//!   periodic sweeper that drives both.
//! - **`txn`**: The transactional map engine. Per-key lock table, transaction
//!   contexts with a buffered copy-on-write operation log, and two-phase
//!   prepare/commit across every partition a transaction touched.

pub mod cluster;
pub mod expiry;
pub mod store;
pub mod txn;
