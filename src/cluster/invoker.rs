//! Operation Invocation Layer
//!
//! Routes units of work to a specific (partition, replica index) address.
//! Remote replicas are reached over HTTP; an operation addressed to a replica
//! hosted by the local node is applied directly against the local record
//! store, skipping the network round trip.
//!
//! `ReplicaBroadcaster` builds on the invoker: it fans one logical operation
//! out to every eligible backup replica of a partition, either awaiting all
//! acknowledgements (transaction prepare/commit) or dispatching
//! fire-and-forget (expiration propagation).

use super::topology::ClusterTopology;
use crate::store::protocol::{ENDPOINT_OPERATION, OpEnvelope, OpResponse, StoreOperation};
use crate::store::record::{RecordStore, apply_operation};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;

/// Result of a single invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    /// The operation was applied; it carries no payload.
    Ack,
    /// The operation produced a value (serialized JSON, `None` = absent).
    Value(Option<String>),
}

/// Routes one operation to one partition replica.
///
/// Delivery is at-most-once per call from the caller's perspective: failures
/// are reported back, never silently retried into duplicate effects (every
/// wire operation is idempotent for the same transaction/key, which is what
/// permits the transport-level retry below).
#[async_trait]
pub trait OperationInvoker: Send + Sync {
    async fn invoke(
        &self,
        op: StoreOperation,
        partition_id: u32,
        replica_index: u32,
    ) -> Result<OperationOutcome>;
}

/// Production invoker: local replicas short-circuit into the local record
/// store, remote replicas go over HTTP.
pub struct ClusterInvoker<K, V> {
    store: Arc<RecordStore<K, V>>,
    topology: Arc<ClusterTopology>,
    http_client: reqwest::Client,
}

impl<K, V> ClusterInvoker<K, V>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + PartialEq + Send + Sync,
{
    pub fn new(store: Arc<RecordStore<K, V>>, topology: Arc<ClusterTopology>) -> Arc<Self> {
        Arc::new(Self {
            store,
            topology,
            http_client: reqwest::Client::new(),
        })
    }

    async fn post_with_retry<T: Serialize>(
        &self,
        url: String,
        payload: &T,
        timeout: std::time::Duration,
        attempts: usize,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }
}

#[async_trait]
impl<K, V> OperationInvoker for ClusterInvoker<K, V>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + PartialEq + Send + Sync,
{
    async fn invoke(
        &self,
        op: StoreOperation,
        partition_id: u32,
        replica_index: u32,
    ) -> Result<OperationOutcome> {
        let node = self
            .topology
            .replica_node(partition_id, replica_index)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no node for partition {} replica {}",
                    partition_id,
                    replica_index
                )
            })?;

        if &node.id == self.topology.local_node_id() {
            return apply_operation(&self.store, partition_id, op);
        }

        let envelope = OpEnvelope {
            partition: partition_id,
            replica_index,
            op,
        };
        let response = self
            .post_with_retry(
                format!("http://{}{}", node.http_addr, ENDPOINT_OPERATION),
                &envelope,
                std::time::Duration::from_millis(500),
                3,
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "operation to {:?} failed: {}",
                node.id,
                response.status()
            ));
        }

        let op_response: OpResponse = response.json().await?;
        if !op_response.success {
            return Err(anyhow::anyhow!(
                "operation rejected by {:?}: {}",
                node.id,
                op_response.error.unwrap_or_else(|| "unknown".to_string())
            ));
        }

        Ok(match op_response.value_json {
            Some(json) => OperationOutcome::Value(Some(json)),
            None if op_response.is_value => OperationOutcome::Value(None),
            None => OperationOutcome::Ack,
        })
    }
}

/// Fans one logical operation out to the backup replicas of a partition.
///
/// One write on the primary becomes N backup invocations addressed by replica
/// index 1..=backup_count. The eligibility filter decides per (partition,
/// replica index) whether a backup receives the operation; the default policy
/// accepts every index.
pub struct ReplicaBroadcaster {
    service_name: String,
    invoker: Arc<dyn OperationInvoker>,
}

impl ReplicaBroadcaster {
    pub fn new(service_name: &str, invoker: Arc<dyn OperationInvoker>) -> Arc<Self> {
        Arc::new(Self {
            service_name: service_name.to_string(),
            invoker,
        })
    }

    pub fn invoker(&self) -> Arc<dyn OperationInvoker> {
        self.invoker.clone()
    }

    /// Invokes `op` on every eligible backup replica concurrently and waits
    /// for all of them. Returns the per-replica outcomes so the caller can
    /// decide which failures matter (e.g. only replicas within the required
    /// durability count).
    pub async fn broadcast<F>(
        &self,
        op: &StoreOperation,
        partition_id: u32,
        backup_count: u32,
        filter: F,
    ) -> Vec<(u32, Result<OperationOutcome>)>
    where
        F: Fn(u32, u32) -> bool,
    {
        let calls = (1..=backup_count)
            .filter(|replica_index| filter(partition_id, *replica_index))
            .map(|replica_index| {
                let op = op.clone();
                let invoker = self.invoker.clone();
                async move { (replica_index, invoker.invoke(op, partition_id, replica_index).await) }
            });

        futures::future::join_all(calls).await
    }

    /// Dispatches `op` to a single backup replica without awaiting the result.
    /// Failures are logged and otherwise dropped; the key is considered lost
    /// for this round.
    pub fn dispatch(&self, op: StoreOperation, partition_id: u32, replica_index: u32) {
        let invoker = self.invoker.clone();
        let service = self.service_name.clone();

        tokio::spawn(async move {
            if let Err(e) = invoker.invoke(op, partition_id, replica_index).await {
                tracing::warn!(
                    "{}: backup operation to partition {} replica {} failed: {}",
                    service,
                    partition_id,
                    replica_index,
                    e
                );
            }
        });
    }
}
