use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// One expired-key notification produced by the primary's eviction scan.
///
/// `created_at` identifies the record incarnation that expired, so a backup
/// never drops a newer write to the same key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpiredKey {
    pub key: String,
    pub created_at: Option<u64>,
}

/// Unbounded FIFO of pending expired-key notifications for one
/// (map, partition).
///
/// Invariant: at most one drainer at any instant. The drain guard is a plain
/// mutual-exclusion flag, acquired with a compare-and-set and released
/// unconditionally when the scoped [`DrainGuard`] drops, so a failure during
/// draining cannot leave it held.
pub struct ExpirationQueue {
    items: Mutex<VecDeque<ExpiredKey>>,
    draining: AtomicBool,
}

impl ExpirationQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        }
    }

    pub fn push(&self, item: ExpiredKey) {
        self.items
            .lock()
            .expect("expiration queue poisoned")
            .push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("expiration queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-blocking attempt to become the single drainer. Returns `None` when
    /// another drain is already in flight; that caller simply skips its turn.
    pub fn try_begin_drain(&self) -> Option<DrainGuard<'_>> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(DrainGuard { queue: self })
        } else {
            None
        }
    }
}

impl Default for ExpirationQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive permission to drain the queue. Releases the drain flag on drop.
pub struct DrainGuard<'a> {
    queue: &'a ExpirationQueue,
}

impl DrainGuard<'_> {
    /// Removes everything currently queued, first-come-first-served. An item
    /// leaves the queue exactly once, so no two snapshots ever share a key
    /// notification.
    pub fn drain_all(&self) -> Vec<ExpiredKey> {
        self.queue
            .items
            .lock()
            .expect("expiration queue poisoned")
            .drain(..)
            .collect()
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.queue.draining.store(false, Ordering::Release);
    }
}
