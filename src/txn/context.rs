use super::error::TxnError;
use super::locks::LockTable;
use super::map::TransactionalMap;
use super::types::{TransactionOptions, TxnId, TxnState};
use crate::cluster::invoker::{OperationInvoker, OperationOutcome, ReplicaBroadcaster};
use crate::cluster::topology::ClusterTopology;
use crate::store::protocol::{PreparedWrite, StoreOperation};
use crate::store::types::{EntryKey, now_ms};

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Entry point for transactional access on one node.
///
/// Owns the per-key lock table shared by every context it creates, so two
/// local transactions touching the same key exclude each other here, while
/// transactions coordinated elsewhere are excluded by the partition owners
/// rejecting a second prepared write for the same key.
pub struct TransactionManager<K, V> {
    topology: Arc<ClusterTopology>,
    invoker: Arc<dyn OperationInvoker>,
    broadcaster: Arc<ReplicaBroadcaster>,
    lock_table: Arc<LockTable>,
    _marker: std::marker::PhantomData<fn() -> (K, V)>,
}

impl<K, V> TransactionManager<K, V>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + PartialEq + Send + Sync,
{
    pub fn new(topology: Arc<ClusterTopology>, invoker: Arc<dyn OperationInvoker>) -> Arc<Self> {
        Arc::new(Self {
            topology,
            broadcaster: ReplicaBroadcaster::new("transactions", invoker.clone()),
            invoker,
            lock_table: LockTable::new(),
            _marker: std::marker::PhantomData,
        })
    }

    pub fn lock_table(&self) -> Arc<LockTable> {
        self.lock_table.clone()
    }

    /// Opens a new transaction context.
    pub fn begin(&self, options: TransactionOptions) -> Arc<TransactionContext<K, V>> {
        let id = TxnId::new();
        tracing::debug!(
            "Began transaction {} (timeout {:?}, durability {})",
            id.0,
            options.timeout,
            options.durability
        );

        Arc::new(TransactionContext {
            id,
            options,
            started: tokio::time::Instant::now(),
            state: Mutex::new(TxnState::Active),
            entries: DashMap::new(),
            topology: self.topology.clone(),
            invoker: self.invoker.clone(),
            broadcaster: self.broadcaster.clone(),
            lock_table: self.lock_table.clone(),
        })
    }
}

/// A transaction-local pending value for one key.
///
/// `value` of `None` means "known absent", distinct from an untouched key,
/// which has no entry at all and falls through to committed state. Only
/// `dirty` entries are written at commit; a clean entry just pins the value
/// observed at first touch (repeatable read).
#[derive(Debug, Clone)]
pub(crate) struct BufferedEntry<V> {
    pub value: Option<V>,
    pub dirty: bool,
}

/// One logical transaction: the buffered operation log, the set of held
/// per-key locks (owned via the shared lock table), and the state machine
/// driving two-phase commit.
pub struct TransactionContext<K, V> {
    id: TxnId,
    options: TransactionOptions,
    started: tokio::time::Instant,
    state: Mutex<TxnState>,
    entries: DashMap<EntryKey<K>, BufferedEntry<V>>,
    topology: Arc<ClusterTopology>,
    invoker: Arc<dyn OperationInvoker>,
    broadcaster: Arc<ReplicaBroadcaster>,
    lock_table: Arc<LockTable>,
}

impl<K, V> TransactionContext<K, V>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + PartialEq + Send + Sync,
{
    pub fn id(&self) -> &TxnId {
        &self.id
    }

    pub fn state(&self) -> TxnState {
        *self.state.lock().expect("transaction state poisoned")
    }

    /// A transactional view over one named map, bound to this context.
    pub fn map(self: &Arc<Self>, name: &str) -> TransactionalMap<K, V> {
        TransactionalMap::new(name, self.clone())
    }

    fn deadline(&self) -> tokio::time::Instant {
        self.started + self.options.timeout
    }

    fn remaining(&self) -> Duration {
        self.deadline()
            .saturating_duration_since(tokio::time::Instant::now())
    }

    pub(crate) fn ensure_active(&self) -> Result<(), TxnError> {
        let state = self.state();
        if state != TxnState::Active {
            return Err(TxnError::NotActive {
                id: self.id.0.clone(),
                state,
            });
        }
        Ok(())
    }

    // --- Operation support (used by TransactionalMap) ---

    /// First-touch path: acquires the key's lock, seeds the overlay from
    /// committed state if the key was never touched, and returns the value
    /// currently visible inside this transaction.
    pub(crate) async fn touch(&self, map: &str, key: &K) -> Result<Option<V>, TxnError> {
        self.lock_key(map, key).await?;

        let entry_key = EntryKey::new(map, key.clone());
        if let Some(entry) = self.entries.get(&entry_key) {
            return Ok(entry.value.clone());
        }

        let committed = match self.committed_value(map, key).await {
            Ok(value) => value,
            Err(e) => {
                self.fail_local(&format!("read failed: {}", e));
                return Err(e);
            }
        };

        self.entries.insert(
            entry_key,
            BufferedEntry {
                value: committed.clone(),
                dirty: false,
            },
        );
        Ok(committed)
    }

    /// Lock-only variant for operations that never look at the prior value
    /// (`set`, `delete`).
    pub(crate) async fn lock_key(&self, map: &str, key: &K) -> Result<(), TxnError> {
        self.ensure_active()?;

        match self
            .lock_table
            .acquire(map, &key.to_string(), &self.id, self.deadline())
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                self.abort_on_lock_timeout();
                Err(e)
            }
        }
    }

    /// Records a buffered mutation for the key. Requires the lock to already
    /// be held by this transaction.
    pub(crate) fn buffer(&self, map: &str, key: &K, value: Option<V>) {
        self.entries
            .insert(EntryKey::new(map, key.clone()), BufferedEntry { value, dirty: true });
    }

    /// Reads the committed value of a key from the owning partition's
    /// primary, bounded by the context deadline.
    async fn committed_value(&self, map: &str, key: &K) -> Result<Option<V>, TxnError> {
        let key_str = key.to_string();
        let partition = self.topology.partition_for(&key_str);
        let op = StoreOperation::Get {
            map: map.to_string(),
            key: key_str,
        };

        let outcome = tokio::time::timeout(self.remaining(), self.invoker.invoke(op, partition, 0))
            .await
            .map_err(|_| TxnError::PartitionUnreachable {
                partition,
                reason: "read timed out".to_string(),
            })?
            .map_err(|e| TxnError::PartitionUnreachable {
                partition,
                reason: e.to_string(),
            })?;

        match outcome {
            OperationOutcome::Value(Some(json)) => {
                serde_json::from_str(&json)
                    .map(Some)
                    .map_err(|e| TxnError::PartitionUnreachable {
                        partition,
                        reason: format!("undecodable value: {}", e),
                    })
            }
            OperationOutcome::Value(None) => Ok(None),
            OperationOutcome::Ack => Err(TxnError::PartitionUnreachable {
                partition,
                reason: "read returned no value payload".to_string(),
            }),
        }
    }

    // --- Commit / rollback ---

    /// Two-phase commit across every partition this transaction touched.
    ///
    /// Phase one prepares all buffered mutations on their partition primaries
    /// and the required backup replicas in parallel, joining synchronously.
    /// Any failure rolls the already-prepared partitions back before the
    /// error surfaces. Phase two flips visibility partition by partition;
    /// afterwards every lock is released.
    pub async fn commit(&self) -> Result<(), TxnError> {
        self.transition(TxnState::Active, TxnState::Preparing)?;

        let by_partition = match self.collect_writes() {
            Ok(writes) => writes,
            Err(reason) => {
                self.finish(TxnState::Failed);
                return Err(TxnError::PrepareFailure { reason });
            }
        };

        if by_partition.is_empty() {
            // Read-only transaction: nothing to prepare or flip.
            self.finish(TxnState::Committed);
            return Ok(());
        }

        let partitions: Vec<u32> = by_partition.keys().copied().collect();
        let deadline_ms = now_ms() + self.remaining().as_millis() as u64;

        let prepare_calls = by_partition
            .iter()
            .map(|(partition, writes)| self.prepare_partition(*partition, writes.clone(), deadline_ms));
        let prepared = tokio::time::timeout(self.remaining(), join_all(prepare_calls)).await;

        let failure = match &prepared {
            Err(_) => Some("prepare timed out".to_string()),
            Ok(results) => results.iter().find_map(|r| r.as_ref().err().cloned()),
        };

        if let Some(reason) = failure {
            tracing::warn!("Transaction {} prepare failed: {}", self.id.0, reason);
            self.compensate(&partitions).await;
            self.finish(TxnState::Failed);
            return Err(TxnError::PrepareFailure { reason });
        }

        self.transition(TxnState::Preparing, TxnState::Committing)?;

        let commit_calls = partitions
            .iter()
            .map(|partition| self.commit_partition(*partition));
        let committed = join_all(commit_calls).await;

        if let Some(reason) = committed.into_iter().find_map(|r| r.err()) {
            // Must not happen once every partition acknowledged prepare;
            // fatal and surfaced, never swallowed.
            tracing::error!("Transaction {} commit failed: {}", self.id.0, reason);
            self.finish(TxnState::Failed);
            return Err(TxnError::CommitFailure { reason });
        }

        self.finish(TxnState::Committed);
        tracing::debug!("Transaction {} committed", self.id.0);
        Ok(())
    }

    /// Discards the buffered log. Nothing was made externally visible before
    /// commit, so rollback is local and cannot fail.
    pub fn rollback(&self) -> Result<(), TxnError> {
        self.transition(TxnState::Active, TxnState::RollingBack)?;
        self.entries.clear();
        self.finish(TxnState::RolledBack);
        tracing::debug!("Transaction {} rolled back", self.id.0);
        Ok(())
    }

    /// Groups the dirty buffered entries by owning partition.
    fn collect_writes(&self) -> Result<HashMap<u32, Vec<PreparedWrite>>, String> {
        let mut by_partition: HashMap<u32, Vec<PreparedWrite>> = HashMap::new();

        for entry in self.entries.iter() {
            if !entry.value().dirty {
                continue;
            }
            let key_str = entry.key().key.to_string();
            let partition = self.topology.partition_for(&key_str);
            let value_json = entry
                .value()
                .value
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| format!("unserializable value for key {}: {}", key_str, e))?;

            by_partition.entry(partition).or_default().push(PreparedWrite {
                map: entry.key().map.clone(),
                key: key_str,
                value_json,
            });
        }

        Ok(by_partition)
    }

    /// Prepares one partition: tentative write on the primary, then
    /// synchronous acknowledgement from the backup replicas. Only replicas
    /// within the durability count are required; the rest are best-effort.
    async fn prepare_partition(
        &self,
        partition: u32,
        writes: Vec<PreparedWrite>,
        deadline_ms: u64,
    ) -> Result<(), String> {
        let op = StoreOperation::PrepareWrites {
            txn_id: self.id.clone(),
            writes,
            deadline_ms,
        };

        self.invoker
            .invoke(op.clone(), partition, 0)
            .await
            .map_err(|e| format!("partition {} rejected prepare: {}", partition, e))?;

        self.require_backup_acks(&op, partition, "prepare").await
    }

    /// Makes every prepared write of this transaction visible on one
    /// partition, primary and backups alike.
    async fn commit_partition(&self, partition: u32) -> Result<(), String> {
        let op = StoreOperation::CommitTxn {
            txn_id: self.id.clone(),
        };

        self.invoker
            .invoke(op.clone(), partition, 0)
            .await
            .map_err(|e| format!("partition {} rejected commit: {}", partition, e))?;

        self.require_backup_acks(&op, partition, "commit").await
    }

    async fn require_backup_acks(
        &self,
        op: &StoreOperation,
        partition: u32,
        phase: &str,
    ) -> Result<(), String> {
        let required = self.options.durability.min(self.topology.backup_count());
        let results = self
            .broadcaster
            .broadcast(op, partition, self.topology.backup_count(), |_, _| true)
            .await;

        for (replica_index, result) in results {
            if let Err(e) = result {
                if replica_index <= required {
                    return Err(format!(
                        "partition {} backup replica {} did not acknowledge {}: {}",
                        partition, replica_index, phase, e
                    ));
                }
                tracing::warn!(
                    "Best-effort {} to partition {} replica {} failed: {}",
                    phase,
                    partition,
                    replica_index,
                    e
                );
            }
        }

        Ok(())
    }

    /// Compensating rollback: undoes prepared-but-not-committed effects on
    /// every partition this transaction may have touched. Best-effort: a
    /// replica that cannot be reached reaps the orphaned prepare on its own
    /// once the deadline passes.
    async fn compensate(&self, partitions: &[u32]) {
        let op = StoreOperation::RollbackTxn {
            txn_id: self.id.clone(),
        };

        for &partition in partitions {
            if let Err(e) = self.invoker.invoke(op.clone(), partition, 0).await {
                tracing::warn!(
                    "Compensating rollback on partition {} primary failed: {}",
                    partition,
                    e
                );
            }

            let results = self
                .broadcaster
                .broadcast(&op, partition, self.topology.backup_count(), |_, _| true)
                .await;
            for (replica_index, result) in results {
                if let Err(e) = result {
                    tracing::warn!(
                        "Compensating rollback on partition {} replica {} failed: {}",
                        partition,
                        replica_index,
                        e
                    );
                }
            }
        }
    }

    // --- State machine plumbing ---

    fn transition(&self, from: TxnState, to: TxnState) -> Result<(), TxnError> {
        let mut state = self.state.lock().expect("transaction state poisoned");
        if *state != from {
            return Err(TxnError::NotActive {
                id: self.id.0.clone(),
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    /// Enters a terminal state and releases every held resource.
    fn finish(&self, terminal: TxnState) {
        debug_assert!(terminal.is_terminal());
        *self.state.lock().expect("transaction state poisoned") = terminal;
        self.entries.clear();
        self.lock_table.release_all(&self.id);
    }

    /// Lock-wait timeout aborts the whole context through the rollback path:
    /// nothing was sent anywhere, so discarding locally suffices.
    fn abort_on_lock_timeout(&self) {
        tracing::warn!("Transaction {} aborted: lock wait timed out", self.id.0);
        *self.state.lock().expect("transaction state poisoned") = TxnState::RollingBack;
        self.finish(TxnState::RolledBack);
    }

    /// Unrecoverable failure while still buffering: terminal, rollback-like.
    fn fail_local(&self, reason: &str) {
        tracing::warn!("Transaction {} failed: {}", self.id.0, reason);
        self.finish(TxnState::Failed);
    }
}

impl<K, V> Drop for TransactionContext<K, V> {
    fn drop(&mut self) {
        let state = *self.state.lock().expect("transaction state poisoned");
        if !state.is_terminal() {
            // Abandoned context (e.g. the coordinating task died). Locks are
            // freed here; any prepared write left behind is reaped by every
            // replica holding it once the transaction deadline passes.
            tracing::warn!(
                "Transaction {} dropped while {:?}; releasing its locks",
                self.id.0,
                state
            );
            self.lock_table.release_all(&self.id);
        }
    }
}
