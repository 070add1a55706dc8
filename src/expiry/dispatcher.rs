use super::queue::{ExpirationQueue, ExpiredKey};
use crate::cluster::invoker::ReplicaBroadcaster;
use crate::store::protocol::StoreOperation;
use crate::store::record::RecordStore;

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;

/// A non-forced drain waits until at least this many expired keys queued up,
/// amortizing one backup operation over a full batch.
pub const MAX_EXPIRED_KEYS_PER_BATCH: usize = 100;

/// Decides per (partition, replica index) whether a backup receives the
/// expiration operation. The default policy accepts every replica.
pub type BackupOpFilter = Arc<dyn Fn(u32, u32) -> bool + Send + Sync>;

/// Builds the backup operation shipped to one replica from the record store,
/// the map the queue belongs to, and the drained snapshot.
pub type BackupOpBuilder<K, V> =
    Arc<dyn Fn(&RecordStore<K, V>, &str, &[ExpiredKey]) -> StoreOperation + Send + Sync>;

/// Creates and sends backup expiration operations.
///
/// Drains an `ExpirationQueue` under its single-drainer guard and fans the
/// snapshot out to the backup replicas of the partition. Dispatch is
/// fire-and-forget: invocation failures are logged by the invocation layer
/// and the affected keys are lost for this round, which is acceptable since
/// they already left the queue and the next expiration cycle is unaffected.
pub struct ExpiryBackupSender<K, V> {
    broadcaster: Arc<ReplicaBroadcaster>,
    filter: BackupOpFilter,
    builder: BackupOpBuilder<K, V>,
}

impl<K, V> ExpiryBackupSender<K, V>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + PartialEq + Send + Sync,
{
    pub fn new(
        broadcaster: Arc<ReplicaBroadcaster>,
        builder: BackupOpBuilder<K, V>,
        filter: BackupOpFilter,
    ) -> Arc<Self> {
        Arc::new(Self {
            broadcaster,
            filter,
            builder,
        })
    }

    /// Sender with the default operation builder and the accept-all filter.
    pub fn with_defaults(broadcaster: Arc<ReplicaBroadcaster>) -> Arc<Self> {
        Self::new(
            broadcaster,
            Arc::new(|_store, map, expired| StoreOperation::ExpireKeys {
                map: map.to_string(),
                keys: expired.to_vec(),
            }),
            Arc::new(|_partition, _replica_index| true),
        )
    }

    /// Attempts one drain-and-dispatch round for a queue.
    ///
    /// Returns without doing anything when the queue is empty, when a
    /// non-forced call finds fewer than [`MAX_EXPIRED_KEYS_PER_BATCH`] keys,
    /// or when another caller is already draining (skipping a concurrent
    /// drain is expected, not an error). Otherwise the entire queue is
    /// drained into a snapshot and one backup operation per eligible replica
    /// index 1..=backup_replica_count is dispatched. Keys rejected by every
    /// replica filter are still consumed, never requeued.
    pub fn try_send_expiry_op(
        &self,
        store: &RecordStore<K, V>,
        map: &str,
        queue: &ExpirationQueue,
        backup_replica_count: u32,
        partition_id: u32,
        force_flush: bool,
    ) {
        let Some(expired_keys) = try_take_expired_keys(queue, force_flush) else {
            return;
        };
        if expired_keys.is_empty() {
            return;
        }

        tracing::debug!(
            "Sending {} expired keys of map {} (partition {}) to {} backup replica(s)",
            expired_keys.len(),
            map,
            partition_id,
            backup_replica_count
        );

        self.invoke_backup_expiry_operation(
            store,
            map,
            &expired_keys,
            backup_replica_count,
            partition_id,
        );
    }

    fn invoke_backup_expiry_operation(
        &self,
        store: &RecordStore<K, V>,
        map: &str,
        expired_keys: &[ExpiredKey],
        backup_replica_count: u32,
        partition_id: u32,
    ) {
        for replica_index in 1..=backup_replica_count {
            if (self.filter)(partition_id, replica_index) {
                let operation = (self.builder)(store, map, expired_keys);
                self.broadcaster
                    .dispatch(operation, partition_id, replica_index);
            }
        }
    }
}

/// Takes everything out of the queue if a drain is warranted and nobody else
/// is draining. The guard is released even when collecting the snapshot
/// fails, via the scoped `DrainGuard`.
fn try_take_expired_keys(queue: &ExpirationQueue, force_flush: bool) -> Option<Vec<ExpiredKey>> {
    let size = queue.len();
    if size == 0 || (!force_flush && size < MAX_EXPIRED_KEYS_PER_BATCH) {
        return None;
    }

    let guard = queue.try_begin_drain()?;
    Some(guard.drain_all())
}
