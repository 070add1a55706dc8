use crate::txn::types::TxnId;

/// Identifies one entry across the named maps hosted by a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey<K> {
    pub map: String,
    pub key: K,
}

impl<K> EntryKey<K> {
    pub fn new(map: &str, key: K) -> Self {
        Self {
            map: map.to_string(),
            key,
        }
    }
}

/// A committed record.
///
/// `created_at` doubles as the record's identity across replicas: a backup
/// only drops a record for an expiration event whose creation time matches,
/// so an expiration of an old incarnation never removes a newer write.
#[derive(Debug, Clone)]
pub struct Record<V> {
    pub value: V,
    pub created_at: u64,
    /// Absolute expiration time in ms since epoch. `None` = never expires.
    pub expires_at: Option<u64>,
}

/// A tentative write held in the prepared overlay.
///
/// `change` of `None` is a pending removal. `deadline_ms` is the owning
/// transaction's deadline; a prepared change still present past it is
/// orphaned (the coordinator died) and gets reaped by the sweeper.
#[derive(Debug, Clone)]
pub struct PreparedChange<V> {
    pub txn_id: TxnId,
    pub change: Option<V>,
    pub deadline_ms: u64,
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
