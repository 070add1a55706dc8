use crate::cluster::invoker::{OperationOutcome, ReplicaBroadcaster};
use crate::cluster::topology::ClusterTopology;
use crate::store::protocol::StoreOperation;
use crate::store::record::RecordStore;

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;

/// Client-facing view over the grid's named maps.
///
/// Acts as a smart client: a write is routed to the owning partition's
/// primary and fanned out to the backups, a read prefers the local committed
/// state and falls back to the primary and then the backups. Transactional
/// access goes through `txn::TransactionManager` instead; this surface only
/// ever sees committed values.
pub struct ReplicatedMap<K, V> {
    store: Arc<RecordStore<K, V>>,
    topology: Arc<ClusterTopology>,
    broadcaster: Arc<ReplicaBroadcaster>,
}

impl<K, V> ReplicatedMap<K, V>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + PartialEq + Send + Sync,
{
    pub fn new(
        store: Arc<RecordStore<K, V>>,
        topology: Arc<ClusterTopology>,
        broadcaster: Arc<ReplicaBroadcaster>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            topology,
            broadcaster,
        })
    }

    /// Writes a committed value: primary first, then every backup replica.
    /// A failed backup replication fails the write, matching the durability
    /// expectations of the synchronous replication path.
    pub async fn put(&self, map: &str, key: K, value: V, ttl_ms: Option<u64>) -> Result<()> {
        let partition = self.topology.partition_for(&key.to_string());
        let op = StoreOperation::Put {
            map: map.to_string(),
            key: key.to_string(),
            value_json: serde_json::to_string(&value)?,
            ttl_ms,
        };

        self.broadcaster
            .invoker()
            .invoke(op.clone(), partition, 0)
            .await?;

        let results = self
            .broadcaster
            .broadcast(&op, partition, self.topology.backup_count(), |_, _| true)
            .await;

        for (replica_index, result) in results {
            if let Err(e) = result {
                return Err(anyhow::anyhow!(
                    "replication to partition {} replica {} failed: {}",
                    partition,
                    replica_index,
                    e
                ));
            }
        }

        Ok(())
    }

    /// Reads the committed value of a key as an external reader sees it.
    pub async fn get(&self, map: &str, key: &K) -> Result<Option<V>> {
        let partition = self.topology.partition_for(&key.to_string());

        if self.topology.is_local_primary(partition) {
            return Ok(self.store.get_committed(partition, map, key));
        }

        let op = StoreOperation::Get {
            map: map.to_string(),
            key: key.to_string(),
        };

        match self
            .broadcaster
            .invoker()
            .invoke(op.clone(), partition, 0)
            .await
        {
            Ok(outcome) => decode_value(outcome),
            Err(e) => {
                tracing::warn!("GET: primary of partition {} unreachable: {}", partition, e);

                // Fall back to the backups before giving up.
                for replica_index in 1..=self.topology.backup_count() {
                    if let Ok(outcome) = self
                        .broadcaster
                        .invoker()
                        .invoke(op.clone(), partition, replica_index)
                        .await
                    {
                        return decode_value(outcome);
                    }
                }
                Err(e)
            }
        }
    }

    pub fn local_entry_count(&self) -> usize {
        self.store.entry_count()
    }
}

fn decode_value<V: DeserializeOwned>(outcome: OperationOutcome) -> Result<Option<V>> {
    match outcome {
        OperationOutcome::Value(Some(json)) => Ok(Some(serde_json::from_str(&json)?)),
        OperationOutcome::Value(None) => Ok(None),
        OperationOutcome::Ack => Err(anyhow::anyhow!("read returned no value payload")),
    }
}
