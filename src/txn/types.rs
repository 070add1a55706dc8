use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unique identifier for a transaction.
///
/// Wrapper around a UUID string. Travels with every prepared write so
/// partition owners can tell competing transactions apart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TxnId(pub String);

impl TxnId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TxnId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of a transaction context.
///
/// Success path: `Active -> Preparing -> Committing -> Committed`.
/// Abort path: `Active -> RollingBack -> RolledBack`.
/// Any state may fall into `Failed` on an unrecoverable backup or owner
/// failure; `Failed` is terminal and surfaces as a rollback-equivalent
/// outcome (no partial writes remain observable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Preparing,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    Failed,
}

impl TxnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }
}

/// Configuration of one transaction.
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    /// Maximum wall-clock time the context may remain active or mid-commit.
    pub timeout: Duration,
    /// Number of backup acknowledgements each prepared write requires before
    /// it counts as durably prepared.
    pub durability: u32,
}

impl TransactionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_durability(mut self, durability: u32) -> Self {
        self.durability = durability;
        self
    }
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            durability: 1,
        }
    }
}
