//! Record Store Module
//!
//! Implements the per-partition record store of the grid.
//!
//! ## Core Concepts
//! - **Committed state**: the values visible to every reader, held per
//!   (partition, map name, key).
//! - **Prepared overlay**: tentative writes applied during the prepare phase
//!   of a transaction. Invisible to readers until the owning transaction
//!   commits; discarded on rollback. At most one transaction may hold a
//!   prepared write for a key at any time.
//! - **Expiry**: records may carry a time-to-live. The primary evicts expired
//!   records and feeds the expiration queues; backups drop records when the
//!   primary's expiration operation arrives.
//! - **Wire protocol**: `StoreOperation` is the single unit of inter-node
//!   work, carried over HTTP and applied through `apply_operation`.

pub mod gateway;
pub mod handlers;
pub mod protocol;
pub mod record;
pub mod types;

#[cfg(test)]
mod tests;
