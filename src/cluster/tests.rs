//! Cluster Module Tests
//!
//! Validates the deterministic partition placement and the replica fan-out
//! of the broadcaster.
//!
//! *Note: the HTTP path of the invoker is exercised in integration against a
//! running cluster; unit tests here use a recording invoker.*

#[cfg(test)]
mod tests {
    use crate::cluster::invoker::{OperationInvoker, OperationOutcome, ReplicaBroadcaster};
    use crate::cluster::topology::ClusterTopology;
    use crate::cluster::types::{Node, NodeId};
    use crate::store::protocol::StoreOperation;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn nodes(count: usize) -> Vec<Node> {
        (0..count)
            .map(|i| Node::new(format!("127.0.0.1:{}", 7000 + i).parse().unwrap()))
            .collect()
    }

    fn topology(node_count: usize, backup_count: u32) -> Arc<ClusterTopology> {
        let nodes = nodes(node_count);
        ClusterTopology::new(nodes[0].id.clone(), nodes, backup_count)
    }

    // ============================================================
    // PARTITION PLACEMENT
    // ============================================================

    #[tokio::test]
    async fn test_partition_is_deterministic() {
        let topology = topology(1, 0);

        // Same key -> same partition
        let p1 = topology.partition_for("entry_100");
        let p2 = topology.partition_for("entry_100");
        assert_eq!(p1, p2, "The same key should yield the same partition");
    }

    #[tokio::test]
    async fn test_partition_is_within_range() {
        let topology = topology(1, 0);

        for i in 0..1000 {
            let key = format!("test_key_{}", i);
            let partition = topology.partition_for(&key);
            assert!(
                partition < topology.num_partitions,
                "Partition {} should be < {}",
                partition,
                topology.num_partitions
            );
        }
    }

    #[tokio::test]
    async fn test_partition_distribution() {
        let topology = topology(1, 0);

        // Check partition distribution (ensure not all keys go to one bucket)
        let mut partition_counts = HashMap::new();

        for i in 0..10000 {
            let key = format!("entry_{}", i);
            let partition = topology.partition_for(&key);
            *partition_counts.entry(partition).or_insert(0) += 1;
        }

        assert!(
            partition_counts.len() > 100,
            "Should have more than 100 distinct partitions used, got: {}",
            partition_counts.len()
        );
    }

    #[tokio::test]
    async fn test_owners_are_primary_first_and_distinct() {
        let topology = topology(3, 2);

        for partition in 0..topology.num_partitions {
            let owners = topology.owners(partition);
            assert_eq!(owners.len(), 3, "primary plus two backups");

            let distinct: HashSet<NodeId> = owners.iter().map(|n| n.id.clone()).collect();
            assert_eq!(distinct.len(), 3, "each replica lives on its own node");

            // Replica addressing matches the owner list positions.
            assert_eq!(topology.replica_node(partition, 0).unwrap().id, owners[0].id);
            assert_eq!(topology.replica_node(partition, 2).unwrap().id, owners[2].id);
            assert!(topology.replica_node(partition, 3).is_none());
        }
    }

    #[tokio::test]
    async fn test_backup_count_is_capped_by_cluster_size() {
        // Two nodes cannot host three distinct copies.
        let topology = topology(2, 2);
        assert_eq!(topology.backup_count(), 1);

        let owners = topology.owners(0);
        assert_eq!(owners.len(), 2);
    }

    #[tokio::test]
    async fn test_single_node_owns_every_partition() {
        let topology = topology(1, 1);

        assert_eq!(
            topology.my_primary_partitions().len() as u32,
            topology.num_partitions,
            "Single node should be primary for all partitions"
        );
        assert_eq!(topology.backup_count(), 0);
    }

    #[tokio::test]
    async fn test_every_partition_has_a_primary_across_nodes() {
        let topology = topology(3, 1);
        let mut primaries = HashSet::new();

        for partition in 0..topology.num_partitions {
            let owners = topology.owners(partition);
            assert!(!owners.is_empty());
            primaries.insert(owners[0].id.clone());
        }

        assert_eq!(primaries.len(), 3, "all nodes serve as primary somewhere");
    }

    // ============================================================
    // REPLICA BROADCASTER
    // ============================================================

    #[derive(Default)]
    struct RecordingInvoker {
        calls: Mutex<Vec<(u32, u32)>>,
    }

    #[async_trait]
    impl OperationInvoker for RecordingInvoker {
        async fn invoke(
            &self,
            _op: StoreOperation,
            partition_id: u32,
            replica_index: u32,
        ) -> anyhow::Result<OperationOutcome> {
            self.calls.lock().unwrap().push((partition_id, replica_index));
            Ok(OperationOutcome::Ack)
        }
    }

    fn probe_op() -> StoreOperation {
        StoreOperation::Get {
            map: "default".to_string(),
            key: "k".to_string(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_backup_replica() {
        let invoker = Arc::new(RecordingInvoker::default());
        let broadcaster = ReplicaBroadcaster::new("test", invoker.clone());

        let results = broadcaster.broadcast(&probe_op(), 9, 3, |_, _| true).await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|(_, outcome)| outcome.is_ok()));

        let mut calls = invoker.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec![(9, 1), (9, 2), (9, 3)]);
    }

    #[tokio::test]
    async fn test_broadcast_filter_selects_replicas() {
        let invoker = Arc::new(RecordingInvoker::default());
        let broadcaster = ReplicaBroadcaster::new("test", invoker.clone());

        let results = broadcaster
            .broadcast(&probe_op(), 9, 3, |_, replica_index| replica_index != 2)
            .await;

        assert_eq!(results.len(), 2);
        let mut calls = invoker.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec![(9, 1), (9, 3)]);
    }

    #[tokio::test]
    async fn test_dispatch_is_fire_and_forget() {
        let invoker = Arc::new(RecordingInvoker::default());
        let broadcaster = ReplicaBroadcaster::new("test", invoker.clone());

        broadcaster.dispatch(probe_op(), 9, 1);

        // The call lands without anyone awaiting its result.
        for _ in 0..100 {
            if !invoker.calls.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(invoker.calls.lock().unwrap().clone(), vec![(9, 1)]);
    }
}
