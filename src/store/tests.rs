//! Record Store Tests
//!
//! Validates local store mechanics: committed reads and writes, the prepared
//! overlay driving two-phase commit, per-record expiry, and the wire
//! operation application path.
//!
//! *Note: routing and replication across nodes are covered by the
//! transaction and expiry test suites with their in-process clusters.*

#[cfg(test)]
mod tests {
    use crate::cluster::invoker::{ClusterInvoker, OperationOutcome, ReplicaBroadcaster};
    use crate::cluster::topology::ClusterTopology;
    use crate::cluster::types::Node;
    use crate::expiry::queue::ExpiredKey;
    use crate::store::gateway::ReplicatedMap;
    use crate::store::protocol::{PreparedWrite, StoreOperation};
    use crate::store::record::{RecordStore, apply_operation};
    use crate::store::types::now_ms;
    use crate::txn::types::TxnId;
    use std::sync::Arc;
    use std::time::Duration;

    type TestStore = RecordStore<String, String>;

    // ============================================================
    // COMMITTED STATE
    // ============================================================

    #[tokio::test]
    async fn test_put_and_get_committed() {
        let store = TestStore::new();

        let prior = store.apply_put(3, "default", "k".to_string(), "v1".to_string(), None);
        assert_eq!(prior, None);

        let prior = store.apply_put(3, "default", "k".to_string(), "v2".to_string(), None);
        assert_eq!(prior, Some("v1".to_string()));

        assert_eq!(
            store.get_committed(3, "default", &"k".to_string()),
            Some("v2".to_string())
        );
        assert_eq!(store.get_committed(3, "other", &"k".to_string()), None);
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_record_reads_as_absent() {
        let store = TestStore::new();
        store.apply_put(3, "default", "k".to_string(), "v".to_string(), Some(1));

        tokio::time::sleep(Duration::from_millis(10)).await;

        // Not yet evicted, but already invisible.
        assert_eq!(store.get_committed(3, "default", &"k".to_string()), None);
    }

    #[tokio::test]
    async fn test_evict_expired_removes_and_enqueues() {
        let store = TestStore::new();
        store.apply_put(3, "default", "gone".to_string(), "v".to_string(), Some(1));
        store.apply_put(3, "default", "stays".to_string(), "v".to_string(), None);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let evicted = store.evict_expired(3, now_ms());

        assert_eq!(evicted, 1);
        assert_eq!(store.get_committed(3, "default", &"gone".to_string()), None);
        assert_eq!(
            store.get_committed(3, "default", &"stays".to_string()),
            Some("v".to_string())
        );

        // The eviction left one notification carrying the record's identity.
        let queue = store.expiry_queue("default", 3);
        assert_eq!(queue.len(), 1);
        let drained = queue.try_begin_drain().unwrap().drain_all();
        assert_eq!(drained[0].key, "gone");
        assert!(drained[0].created_at.is_some());
    }

    #[tokio::test]
    async fn test_backup_expiration_spares_newer_incarnations() {
        let store = TestStore::new();
        store.apply_put(3, "default", "k".to_string(), "fresh".to_string(), None);

        // The expiration event refers to an older incarnation of the record;
        // the rewritten key survives it.
        let stale_event = ExpiredKey {
            key: "k".to_string(),
            created_at: Some(1),
        };
        store
            .apply_expired_backup(3, "default", vec![stale_event])
            .unwrap();
        assert_eq!(
            store.get_committed(3, "default", &"k".to_string()),
            Some("fresh".to_string())
        );

        // An event without incarnation metadata removes unconditionally.
        let unconditional = ExpiredKey {
            key: "k".to_string(),
            created_at: None,
        };
        store
            .apply_expired_backup(3, "default", vec![unconditional])
            .unwrap();
        assert_eq!(store.get_committed(3, "default", &"k".to_string()), None);
    }

    // ============================================================
    // PREPARED OVERLAY
    // ============================================================

    #[tokio::test]
    async fn test_prepared_write_invisible_until_committed() {
        let store = TestStore::new();
        let txn = TxnId::new();
        let deadline = now_ms() + 10_000;

        store
            .apply_prepared(3, &txn, "default", "k".to_string(), Some("v".to_string()), deadline)
            .unwrap();

        assert_eq!(store.get_committed(3, "default", &"k".to_string()), None);
        assert_eq!(store.prepared_count(), 1);

        let flipped = store.commit_prepared(3, &txn);
        assert_eq!(flipped, 1);
        assert_eq!(
            store.get_committed(3, "default", &"k".to_string()),
            Some("v".to_string())
        );
        assert_eq!(store.prepared_count(), 0);
    }

    #[tokio::test]
    async fn test_prepared_removal_commits_as_removal() {
        let store = TestStore::new();
        store.apply_put(3, "default", "k".to_string(), "v".to_string(), None);

        let txn = TxnId::new();
        store
            .apply_prepared(3, &txn, "default", "k".to_string(), None, now_ms() + 10_000)
            .unwrap();

        // Still visible while only prepared.
        assert_eq!(
            store.get_committed(3, "default", &"k".to_string()),
            Some("v".to_string())
        );

        store.commit_prepared(3, &txn);
        assert_eq!(store.get_committed(3, "default", &"k".to_string()), None);
    }

    #[tokio::test]
    async fn test_second_transaction_cannot_prepare_a_prepared_key() {
        let store = TestStore::new();
        let first = TxnId::new();
        let second = TxnId::new();
        let deadline = now_ms() + 10_000;

        store
            .apply_prepared(3, &first, "default", "k".to_string(), Some("a".to_string()), deadline)
            .unwrap();

        // A competing transaction is rejected outright.
        let conflict = store.apply_prepared(
            3,
            &second,
            "default",
            "k".to_string(),
            Some("b".to_string()),
            deadline,
        );
        assert!(conflict.is_err());

        // Re-preparing for the same transaction is idempotent.
        store
            .apply_prepared(3, &first, "default", "k".to_string(), Some("c".to_string()), deadline)
            .unwrap();
        assert_eq!(store.prepared_count(), 1);

        store.commit_prepared(3, &first);
        assert_eq!(
            store.get_committed(3, "default", &"k".to_string()),
            Some("c".to_string())
        );
    }

    #[tokio::test]
    async fn test_discard_prepared_leaves_committed_untouched() {
        let store = TestStore::new();
        store.apply_put(3, "default", "k".to_string(), "committed".to_string(), None);

        let txn = TxnId::new();
        store
            .apply_prepared(
                3,
                &txn,
                "default",
                "k".to_string(),
                Some("tentative".to_string()),
                now_ms() + 10_000,
            )
            .unwrap();

        let discarded = store.discard_prepared(3, &txn);
        assert_eq!(discarded, 1);
        assert_eq!(store.prepared_count(), 0);
        assert_eq!(
            store.get_committed(3, "default", &"k".to_string()),
            Some("committed".to_string())
        );

        // Rolling back a transaction with nothing prepared is a no-op.
        assert_eq!(store.discard_prepared(3, &txn), 0);
    }

    #[tokio::test]
    async fn test_commit_only_flips_the_owning_transactions_writes() {
        let store = TestStore::new();
        let first = TxnId::new();
        let second = TxnId::new();
        let deadline = now_ms() + 10_000;

        store
            .apply_prepared(3, &first, "default", "a".to_string(), Some("1".to_string()), deadline)
            .unwrap();
        store
            .apply_prepared(3, &second, "default", "b".to_string(), Some("2".to_string()), deadline)
            .unwrap();

        store.commit_prepared(3, &first);

        assert_eq!(
            store.get_committed(3, "default", &"a".to_string()),
            Some("1".to_string())
        );
        assert_eq!(store.get_committed(3, "default", &"b".to_string()), None);
        assert_eq!(store.prepared_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_prepared_writes_are_reaped_by_deadline() {
        let store = TestStore::new();
        let stale = TxnId::new();
        let live = TxnId::new();

        store
            .apply_prepared(
                3,
                &stale,
                "default",
                "orphan".to_string(),
                Some("v".to_string()),
                now_ms().saturating_sub(1),
            )
            .unwrap();
        store
            .apply_prepared(
                3,
                &live,
                "default",
                "active".to_string(),
                Some("v".to_string()),
                now_ms() + 10_000,
            )
            .unwrap();

        let reaped = store.discard_expired_prepared(3, now_ms());

        assert_eq!(reaped, 1);
        assert_eq!(store.prepared_count(), 1);
        assert_eq!(store.commit_prepared(3, &live), 1);
    }

    // ============================================================
    // WIRE OPERATION APPLICATION
    // ============================================================

    #[tokio::test]
    async fn test_apply_operation_put_then_get() {
        let store = TestStore::new();

        let put = StoreOperation::Put {
            map: "default".to_string(),
            key: "k".to_string(),
            value_json: serde_json::to_string(&"v".to_string()).unwrap(),
            ttl_ms: None,
        };
        assert_eq!(
            apply_operation(&store, 3, put).unwrap(),
            OperationOutcome::Ack
        );

        let get = StoreOperation::Get {
            map: "default".to_string(),
            key: "k".to_string(),
        };
        let outcome = apply_operation(&store, 3, get).unwrap();
        assert_eq!(
            outcome,
            OperationOutcome::Value(Some(serde_json::to_string(&"v".to_string()).unwrap()))
        );

        let miss = StoreOperation::Get {
            map: "default".to_string(),
            key: "missing".to_string(),
        };
        assert_eq!(
            apply_operation(&store, 3, miss).unwrap(),
            OperationOutcome::Value(None)
        );
    }

    #[tokio::test]
    async fn test_apply_operation_prepare_commit_rollback_cycle() {
        let store = TestStore::new();
        let txn = TxnId::new();

        let prepare = StoreOperation::PrepareWrites {
            txn_id: txn.clone(),
            writes: vec![
                PreparedWrite {
                    map: "default".to_string(),
                    key: "a".to_string(),
                    value_json: Some(serde_json::to_string(&"1".to_string()).unwrap()),
                },
                PreparedWrite {
                    map: "default".to_string(),
                    key: "b".to_string(),
                    value_json: None,
                },
            ],
            deadline_ms: now_ms() + 10_000,
        };
        apply_operation(&store, 3, prepare).unwrap();
        assert_eq!(store.prepared_count(), 2);

        apply_operation(
            &store,
            3,
            StoreOperation::CommitTxn { txn_id: txn.clone() },
        )
        .unwrap();
        assert_eq!(
            store.get_committed(3, "default", &"a".to_string()),
            Some("1".to_string())
        );
        assert_eq!(store.prepared_count(), 0);

        // Rolling back after commit finds nothing left to discard.
        apply_operation(&store, 3, StoreOperation::RollbackTxn { txn_id: txn })
            .unwrap();
        assert_eq!(
            store.get_committed(3, "default", &"a".to_string()),
            Some("1".to_string())
        );
    }

    #[tokio::test]
    async fn test_apply_operation_expire_keys() {
        let store = TestStore::new();
        store.apply_put(3, "default", "k".to_string(), "v".to_string(), None);

        let expire = StoreOperation::ExpireKeys {
            map: "default".to_string(),
            keys: vec![ExpiredKey {
                key: "k".to_string(),
                created_at: None,
            }],
        };
        apply_operation(&store, 3, expire).unwrap();

        assert_eq!(store.get_committed(3, "default", &"k".to_string()), None);
    }

    // ============================================================
    // REPLICATED MAP (single node, local invoker short-circuit)
    // ============================================================

    fn single_node_map() -> Arc<ReplicatedMap<String, String>> {
        let node = Node::new("127.0.0.1:7000".parse().unwrap());
        let topology = ClusterTopology::new(node.id.clone(), vec![node], 1);
        let store: Arc<TestStore> = RecordStore::new();
        let invoker = ClusterInvoker::new(store.clone(), topology.clone());
        let broadcaster = ReplicaBroadcaster::new("replication", invoker);
        ReplicatedMap::new(store, topology, broadcaster)
    }

    #[tokio::test]
    async fn test_replicated_map_put_and_get() {
        let map = single_node_map();

        map.put("default", "k".to_string(), "v".to_string(), None)
            .await
            .unwrap();

        assert_eq!(
            map.get("default", &"k".to_string()).await.unwrap(),
            Some("v".to_string())
        );
        assert_eq!(map.get("default", &"missing".to_string()).await.unwrap(), None);
        assert_eq!(map.local_entry_count(), 1);
    }

    #[tokio::test]
    async fn test_replicated_map_honors_ttl() {
        let map = single_node_map();

        map.put("default", "k".to_string(), "v".to_string(), Some(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(map.get("default", &"k".to_string()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_apply_operation_rejects_unparseable_payload() {
        let store = TestStore::new();

        let put = StoreOperation::Put {
            map: "default".to_string(),
            key: "k".to_string(),
            value_json: "not-json".to_string(),
            ttl_ms: None,
        };
        assert!(apply_operation(&store, 3, put).is_err());
        assert_eq!(store.entry_count(), 0);
    }
}
