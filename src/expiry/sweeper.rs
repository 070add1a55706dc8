use super::dispatcher::ExpiryBackupSender;
use crate::cluster::topology::ClusterTopology;
use crate::store::record::RecordStore;
use crate::store::types::now_ms;

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
/// Every Nth sweep flushes the queues regardless of batch size, so keys of a
/// quiet map still reach the backups in bounded time.
const FORCE_FLUSH_EVERY: u64 = 10;

/// Periodic driver of the expiration path on one node.
///
/// Each cycle evicts expired records from the partitions this node is primary
/// for (which feeds the expiration queues), reaps orphaned prepared writes on
/// every partition holding them, and hands every queue to the dispatcher.
pub struct ExpirySweeper<K, V> {
    store: Arc<RecordStore<K, V>>,
    topology: Arc<ClusterTopology>,
    sender: Arc<ExpiryBackupSender<K, V>>,
}

impl<K, V> ExpirySweeper<K, V>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + PartialEq + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<RecordStore<K, V>>,
        topology: Arc<ClusterTopology>,
        sender: Arc<ExpiryBackupSender<K, V>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            topology,
            sender,
        })
    }

    /// Spawns the sweep loop and returns immediately.
    pub fn start(self: Arc<Self>) {
        tracing::info!("Starting expiry sweeper");

        tokio::spawn(async move {
            self.sweep_loop().await;
        });
    }

    async fn sweep_loop(&self) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        let mut cycle: u64 = 0;

        loop {
            interval.tick().await;
            cycle += 1;

            let force_flush = cycle % FORCE_FLUSH_EVERY == 0;
            self.sweep_once(force_flush);
        }
    }

    /// One full cycle. Exposed separately so callers can trigger an
    /// opportunistic sweep outside the periodic schedule.
    pub fn sweep_once(&self, force_flush: bool) {
        let now = now_ms();
        let mut evicted = 0;

        for partition in self.topology.my_primary_partitions() {
            evicted += self.store.evict_expired(partition, now);
        }

        // Prepared writes also land on backup replicas during the prepare
        // broadcast, so the reaper covers every partition holding prepared
        // state, not just primary-owned ones.
        for partition in self.store.prepared_partitions() {
            self.store.discard_expired_prepared(partition, now);
        }

        if evicted > 0 {
            tracing::debug!("Evicted {} expired record(s)", evicted);
        }

        for (map, partition, queue) in self.store.iter_expiry_queues() {
            if !self.topology.is_local_primary(partition) {
                continue;
            }
            self.sender.try_send_expiry_op(
                &self.store,
                &map,
                &queue,
                self.topology.backup_count(),
                partition,
                force_flush,
            );
        }
    }
}
