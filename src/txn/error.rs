use super::types::TxnState;
use thiserror::Error;

/// Failures surfaced by the transaction engine.
///
/// Every variant aborts the whole transaction: callers observe either a fully
/// committed transaction or one of these, never a partially applied mixture.
/// A skipped concurrent queue drain is deliberately not represented here;
/// the expiration dispatcher treats that as a normal no-op.
#[derive(Debug, Error)]
pub enum TxnError {
    /// The key is held by another transaction and stayed held past the
    /// context's deadline.
    #[error("lock for {map}/{key} is held by another transaction past the deadline")]
    LockTimeout { map: String, key: String },

    /// A partition or a required backup replica was unreachable or rejected
    /// a write during the prepare phase. Every already-prepared partition has
    /// been compensated before this surfaces.
    #[error("prepare failed: {reason}")]
    PrepareFailure { reason: String },

    /// A failure after every partition acknowledged prepare. The protocol is
    /// designed so this cannot happen; when it does it is fatal and surfaced,
    /// never swallowed.
    #[error("commit failed after successful prepare: {reason}")]
    CommitFailure { reason: String },

    /// A partition owner became unreachable while the transaction was still
    /// buffering operations.
    #[error("partition {partition} unreachable: {reason}")]
    PartitionUnreachable { partition: u32, reason: String },

    /// An operation arrived after the context left the `Active` state.
    #[error("transaction {id} is no longer active (state {state:?})")]
    NotActive { id: String, state: TxnState },
}
