use super::error::TxnError;
use super::types::TxnId;

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Tracks which (map, key) is exclusively held by which transaction.
///
/// Invariant: at most one live lock per (map, key) at any time. A lock is
/// acquired on the first access to a key within a transaction and released
/// only when the owning transaction reaches a terminal state. Acquisition is
/// re-entrant for the owner.
pub struct LockTable {
    locks: DashMap<(String, String), TxnId>,
}

impl LockTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            locks: DashMap::new(),
        })
    }

    /// Single non-blocking acquisition attempt. Succeeds when the key is free
    /// or already owned by `owner`.
    pub fn try_acquire(&self, map: &str, key: &str, owner: &TxnId) -> bool {
        match self.locks.entry((map.to_string(), key.to_string())) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => occupied.get() == owner,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(owner.clone());
                true
            }
        }
    }

    /// Acquires the lock, polling until `deadline`. A key still held by
    /// another transaction past the deadline fails with a lock timeout, which
    /// the caller must treat as aborting its whole context.
    pub async fn acquire(
        &self,
        map: &str,
        key: &str,
        owner: &TxnId,
        deadline: tokio::time::Instant,
    ) -> Result<(), TxnError> {
        loop {
            if self.try_acquire(map, key, owner) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(TxnError::LockTimeout {
                    map: map.to_string(),
                    key: key.to_string(),
                });
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    /// Releases every lock owned by a transaction. Called exactly when the
    /// owner reaches a terminal state.
    pub fn release_all(&self, owner: &TxnId) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, holder| holder != owner);
        before - self.locks.len()
    }

    pub fn owner_of(&self, map: &str, key: &str) -> Option<TxnId> {
        self.locks
            .get(&(map.to_string(), key.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn held_count(&self) -> usize {
        self.locks.len()
    }
}
