//! Store Network Protocol
//!
//! Defines the API endpoints and Data Transfer Objects (DTOs) used for
//! internode communication (replication, two-phase commit, expiration
//! propagation).
//!
//! These structures are serialized via JSON and sent over HTTP. Values always
//! travel as serialized JSON strings so the wire format stays independent of
//! the concrete value type a node hosts.

use crate::expiry::queue::ExpiredKey;
use crate::txn::types::TxnId;
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Internal endpoint accepting any `StoreOperation` addressed to a replica.
pub const ENDPOINT_OPERATION: &str = "/internal/op";
/// Public endpoint for client write requests.
pub const ENDPOINT_PUT: &str = "/put";
/// Public endpoint for client read requests.
pub const ENDPOINT_GET: &str = "/get";

// --- Operations ---

/// One buffered mutation of a transaction, addressed to a single key.
/// `value_json` of `None` is a pending removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedWrite {
    pub map: String,
    pub key: String,
    pub value_json: Option<String>,
}

/// The unit of inter-node work. Addressed to one partition and one replica
/// index through the invocation layer; applied locally by the receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoreOperation {
    /// Apply a committed write locally (primary apply or backup replication).
    Put {
        map: String,
        key: String,
        value_json: String,
        ttl_ms: Option<u64>,
    },
    /// Read the committed value of a key.
    Get { map: String, key: String },
    /// Apply a transaction's tentative writes for one partition.
    /// Rejected if any key is already prepared by a different transaction.
    PrepareWrites {
        txn_id: TxnId,
        writes: Vec<PreparedWrite>,
        deadline_ms: u64,
    },
    /// Make every prepared write of a transaction visible on this partition.
    CommitTxn { txn_id: TxnId },
    /// Discard every prepared write of a transaction on this partition.
    RollbackTxn { txn_id: TxnId },
    /// Drop expired records on a backup replica.
    ExpireKeys { map: String, keys: Vec<ExpiredKey> },
}

// --- Data Transfer Objects ---

/// Wrapper carrying an operation to the internal operation endpoint together
/// with its (partition, replica index) address.
#[derive(Debug, Serialize, Deserialize)]
pub struct OpEnvelope {
    pub partition: u32,
    pub replica_index: u32,
    pub op: StoreOperation,
}

/// Outcome of an operation applied by a remote replica.
#[derive(Debug, Serialize, Deserialize)]
pub struct OpResponse {
    pub success: bool,
    /// True when the operation produces a value, so an absent value
    /// (`value_json: None`) is distinguishable from a plain acknowledgement.
    pub is_value: bool,
    pub value_json: Option<String>,
    pub error: Option<String>,
}

impl OpResponse {
    pub fn ack() -> Self {
        Self {
            success: true,
            is_value: false,
            value_json: None,
            error: None,
        }
    }

    pub fn value(value_json: Option<String>) -> Self {
        Self {
            success: true,
            is_value: true,
            value_json,
            error: None,
        }
    }

    pub fn rejected(error: String) -> Self {
        Self {
            success: false,
            is_value: false,
            value_json: None,
            error: Some(error),
        }
    }
}

/// Standard client request for writing data.
#[derive(Debug, Serialize, Deserialize)]
pub struct PutRequest {
    /// The named map the entry belongs to.
    pub map: String,
    /// The data key.
    pub key: String,
    /// The serialized JSON string of the value.
    pub value_json: String,
    /// Optional time-to-live in milliseconds.
    pub ttl_ms: Option<u64>,
}

/// Standard acknowledgment for write operations.
#[derive(Debug, Serialize, Deserialize)]
pub struct PutResponse {
    pub success: bool,
}

/// Standard response for data retrieval.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    /// The value, if found, serialized as a JSON string.
    /// `None` indicates the key does not exist.
    pub value_json: Option<String>,
}
