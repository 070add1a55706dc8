use super::protocol::StoreOperation;
use super::types::{EntryKey, PreparedChange, Record, now_ms};
use crate::cluster::invoker::OperationOutcome;
use crate::expiry::queue::{ExpirationQueue, ExpiredKey};
use crate::txn::types::TxnId;

use anyhow::Result;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;

/// The per-partition record store hosted by one node.
///
/// Holds committed entries and the prepared-write overlay for every partition
/// this node owns a replica of, plus the expiration queues fed by the primary
/// eviction scan. Committed and prepared state never mix: readers only see
/// committed records, and a prepared change becomes committed only through
/// `commit_prepared`.
pub struct RecordStore<K, V> {
    /// Committed state. Structure: `Partition ID -> EntryKey -> Record`.
    committed: DashMap<u32, DashMap<EntryKey<K>, Record<V>>>,
    /// Tentative transaction writes, keyed the same way.
    prepared: DashMap<u32, DashMap<EntryKey<K>, PreparedChange<V>>>,
    /// Pending expired-key notifications per (map name, partition).
    expiry_queues: DashMap<(String, u32), Arc<ExpirationQueue>>,
}

impl<K, V> RecordStore<K, V>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + PartialEq + Send + Sync,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            committed: DashMap::new(),
            prepared: DashMap::new(),
            expiry_queues: DashMap::new(),
        })
    }

    // --- Committed state ---

    /// Reads the committed value of a key. A record past its expiration time
    /// is reported absent even before the sweeper evicts it.
    pub fn get_committed(&self, partition: u32, map: &str, key: &K) -> Option<V> {
        let records = self.committed.get(&partition)?;
        let record = records.get(&EntryKey::new(map, key.clone()))?;

        if record
            .expires_at
            .map(|at| at <= now_ms())
            .unwrap_or(false)
        {
            return None;
        }

        Some(record.value.clone())
    }

    /// Applies a committed write locally, returning the prior value.
    /// Used both for primary writes and for backup replication.
    pub fn apply_put(
        &self,
        partition: u32,
        map: &str,
        key: K,
        value: V,
        ttl_ms: Option<u64>,
    ) -> Option<V> {
        let records = self.committed.entry(partition).or_insert_with(DashMap::new);
        let now = now_ms();
        let record = Record {
            value,
            created_at: now,
            expires_at: ttl_ms.map(|ttl| now + ttl),
        };

        records
            .insert(EntryKey::new(map, key), record)
            .map(|prev| prev.value)
    }

    // --- Prepared overlay ---

    /// Applies one tentative write of a transaction.
    ///
    /// A key already prepared by a different transaction rejects the write;
    /// re-preparing the same key for the same transaction overwrites the
    /// pending change, which makes retried prepare operations idempotent.
    pub fn apply_prepared(
        &self,
        partition: u32,
        txn_id: &TxnId,
        map: &str,
        key: K,
        change: Option<V>,
        deadline_ms: u64,
    ) -> Result<()> {
        let prepared = self.prepared.entry(partition).or_insert_with(DashMap::new);
        let key_display = key.to_string();
        let entry_key = EntryKey::new(map, key);

        match prepared.entry(entry_key) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().txn_id != *txn_id {
                    return Err(anyhow::anyhow!(
                        "key {}/{} already prepared by transaction {}",
                        map,
                        key_display,
                        occupied.get().txn_id.0
                    ));
                }
                occupied.insert(PreparedChange {
                    txn_id: txn_id.clone(),
                    change,
                    deadline_ms,
                });
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(PreparedChange {
                    txn_id: txn_id.clone(),
                    change,
                    deadline_ms,
                });
            }
        }

        Ok(())
    }

    /// Flips every prepared write of a transaction on this partition into
    /// committed state. Returns how many entries became visible.
    pub fn commit_prepared(&self, partition: u32, txn_id: &TxnId) -> usize {
        let Some(prepared) = self.prepared.get(&partition) else {
            return 0;
        };

        let keys: Vec<EntryKey<K>> = prepared
            .iter()
            .filter(|entry| entry.value().txn_id == *txn_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut flipped = 0;
        for entry_key in keys {
            let Some((_, pending)) = prepared.remove_if(&entry_key, |_, c| c.txn_id == *txn_id)
            else {
                continue;
            };

            let records = self.committed.entry(partition).or_insert_with(DashMap::new);
            match pending.change {
                Some(value) => {
                    records.insert(
                        entry_key,
                        Record {
                            value,
                            created_at: now_ms(),
                            expires_at: None,
                        },
                    );
                }
                None => {
                    records.remove(&entry_key);
                }
            }
            flipped += 1;
        }

        flipped
    }

    /// Discards every prepared write of a transaction on this partition.
    /// Committed state is untouched; rollback of unprepared state is a no-op.
    pub fn discard_prepared(&self, partition: u32, txn_id: &TxnId) -> usize {
        let Some(prepared) = self.prepared.get(&partition) else {
            return 0;
        };

        let keys: Vec<EntryKey<K>> = prepared
            .iter()
            .filter(|entry| entry.value().txn_id == *txn_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut discarded = 0;
        for entry_key in keys {
            if prepared
                .remove_if(&entry_key, |_, c| c.txn_id == *txn_id)
                .is_some()
            {
                discarded += 1;
            }
        }

        discarded
    }

    /// Partition ids currently holding prepared state, primary and backup
    /// alike. The deadline reaper iterates these so an orphaned prepare on a
    /// backup replica is found too.
    pub fn prepared_partitions(&self) -> Vec<u32> {
        self.prepared.iter().map(|entry| *entry.key()).collect()
    }

    /// Reaps prepared writes whose transaction deadline passed. The owning
    /// coordinator is gone; keeping them would pin the keys forever.
    pub fn discard_expired_prepared(&self, partition: u32, now: u64) -> usize {
        let Some(prepared) = self.prepared.get(&partition) else {
            return 0;
        };

        let stale: Vec<(EntryKey<K>, TxnId)> = prepared
            .iter()
            .filter(|entry| entry.value().deadline_ms <= now)
            .map(|entry| (entry.key().clone(), entry.value().txn_id.clone()))
            .collect();

        let mut reaped = 0;
        for (entry_key, txn_id) in stale {
            if prepared
                .remove_if(&entry_key, |_, c| c.deadline_ms <= now)
                .is_some()
            {
                tracing::warn!(
                    "Reaped orphaned prepared write for {}/{} (transaction {})",
                    entry_key.map,
                    entry_key.key.to_string(),
                    txn_id.0
                );
                reaped += 1;
            }
        }

        reaped
    }

    // --- Expiration ---

    /// Primary-side eviction scan: removes expired committed records and
    /// enqueues one expired-key notification per removal.
    pub fn evict_expired(&self, partition: u32, now: u64) -> usize {
        let Some(records) = self.committed.get(&partition) else {
            return 0;
        };

        let expired: Vec<(EntryKey<K>, u64)> = records
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .expires_at
                    .map(|at| at <= now)
                    .unwrap_or(false)
            })
            .map(|entry| (entry.key().clone(), entry.value().created_at))
            .collect();

        let mut evicted = 0;
        for (entry_key, created_at) in expired {
            if records
                .remove_if(&entry_key, |_, r| {
                    r.expires_at.map(|at| at <= now).unwrap_or(false)
                })
                .is_some()
            {
                self.enqueue_expired_key(
                    partition,
                    &entry_key.map,
                    entry_key.key.to_string(),
                    Some(created_at),
                );
                evicted += 1;
            }
        }

        evicted
    }

    /// Backup-side application of an expiration operation: drops the listed
    /// keys, but only when the record's creation time still matches the one
    /// observed at expiration. A newer write to the same key survives.
    pub fn apply_expired_backup(
        &self,
        partition: u32,
        map: &str,
        keys: Vec<ExpiredKey>,
    ) -> Result<()> {
        let Some(records) = self.committed.get(&partition) else {
            return Ok(());
        };

        for expired in keys {
            let key: K = parse_key(&expired.key)?;
            records.remove_if(&EntryKey::new(map, key), |_, record| {
                match expired.created_at {
                    Some(created_at) => record.created_at == created_at,
                    None => true,
                }
            });
        }

        Ok(())
    }

    /// The expiration queue for one (map, partition), created on first use.
    pub fn expiry_queue(&self, map: &str, partition: u32) -> Arc<ExpirationQueue> {
        self.expiry_queues
            .entry((map.to_string(), partition))
            .or_insert_with(|| Arc::new(ExpirationQueue::new()))
            .clone()
    }

    /// Feeds one expired-key notification into the partition's queue.
    /// Exposed to the owning record store's eviction path.
    pub fn enqueue_expired_key(
        &self,
        partition: u32,
        map: &str,
        key: String,
        created_at: Option<u64>,
    ) {
        self.expiry_queue(map, partition)
            .push(ExpiredKey { key, created_at });
    }

    /// Snapshot of every known (map, partition, queue) triple.
    pub fn iter_expiry_queues(&self) -> Vec<(String, u32, Arc<ExpirationQueue>)> {
        self.expiry_queues
            .iter()
            .map(|entry| (entry.key().0.clone(), entry.key().1, entry.value().clone()))
            .collect()
    }

    // --- Introspection ---

    pub fn entry_count(&self) -> usize {
        self.committed
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }

    pub fn prepared_count(&self) -> usize {
        self.prepared.iter().map(|entry| entry.value().len()).sum()
    }
}

/// Applies one wire operation against the local store. Shared by the HTTP
/// operation handler and the invoker's local short-circuit path.
pub fn apply_operation<K, V>(
    store: &RecordStore<K, V>,
    partition: u32,
    op: StoreOperation,
) -> Result<OperationOutcome>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + PartialEq + Send + Sync,
{
    match op {
        StoreOperation::Put {
            map,
            key,
            value_json,
            ttl_ms,
        } => {
            let key: K = parse_key(&key)?;
            let value: V = serde_json::from_str(&value_json)?;
            store.apply_put(partition, &map, key, value, ttl_ms);
            Ok(OperationOutcome::Ack)
        }
        StoreOperation::Get { map, key } => {
            let key: K = parse_key(&key)?;
            let value_json = store
                .get_committed(partition, &map, &key)
                .map(|value| serde_json::to_string(&value))
                .transpose()?;
            Ok(OperationOutcome::Value(value_json))
        }
        StoreOperation::PrepareWrites {
            txn_id,
            writes,
            deadline_ms,
        } => {
            for write in writes {
                let key: K = parse_key(&write.key)?;
                let change: Option<V> = write
                    .value_json
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()?;
                store.apply_prepared(partition, &txn_id, &write.map, key, change, deadline_ms)?;
            }
            Ok(OperationOutcome::Ack)
        }
        StoreOperation::CommitTxn { txn_id } => {
            store.commit_prepared(partition, &txn_id);
            Ok(OperationOutcome::Ack)
        }
        StoreOperation::RollbackTxn { txn_id } => {
            store.discard_prepared(partition, &txn_id);
            Ok(OperationOutcome::Ack)
        }
        StoreOperation::ExpireKeys { map, keys } => {
            store.apply_expired_backup(partition, &map, keys)?;
            Ok(OperationOutcome::Ack)
        }
    }
}

fn parse_key<K>(raw: &str) -> Result<K>
where
    K: FromStr,
    <K as FromStr>::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: <K as FromStr>::Err| anyhow::anyhow!(e.to_string()))
}
