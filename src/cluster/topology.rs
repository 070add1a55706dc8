use super::types::{Node, NodeId};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Static partition-to-node placement for the grid.
///
/// The node list is fixed configuration. Owners of a partition are chosen
/// deterministically from the sorted node list, so every member computes the
/// same placement without coordination: replica index 0 is the primary,
/// indices 1..=backup_count address the backups.
pub struct ClusterTopology {
    pub num_partitions: u32,
    backup_count: u32,
    nodes: Vec<Node>,
    local: NodeId,
}

impl ClusterTopology {
    pub fn new(local: NodeId, mut nodes: Vec<Node>, backup_count: u32) -> Arc<Self> {
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes.dedup_by(|a, b| a.id == b.id);

        Arc::new(Self {
            num_partitions: 256,
            backup_count,
            nodes,
            local,
        })
    }

    pub fn local_node_id(&self) -> &NodeId {
        &self.local
    }

    /// Maps a key to its partition. Deterministic for a given key.
    pub fn partition_for(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let hash = hasher.finish() as u32;
        hash % self.num_partitions
    }

    /// Configured backup replica count, capped by the number of nodes that can
    /// actually hold a distinct copy.
    pub fn backup_count(&self) -> u32 {
        self.backup_count.min(self.nodes.len().saturating_sub(1) as u32)
    }

    /// Ordered owner list for a partition: primary first, then backups.
    pub fn owners(&self, partition: u32) -> Vec<Node> {
        if self.nodes.is_empty() {
            return vec![];
        }
        let replicas = (self.backup_count() + 1) as usize;
        let primary_idx = partition as usize % self.nodes.len();

        (0..replicas)
            .map(|offset| self.nodes[(primary_idx + offset) % self.nodes.len()].clone())
            .collect()
    }

    /// Resolves the node hosting a specific replica of a partition.
    /// Replica index 0 is the primary, 1..=backup_count the backups.
    pub fn replica_node(&self, partition: u32, replica_index: u32) -> Option<Node> {
        self.owners(partition).into_iter().nth(replica_index as usize)
    }

    pub fn is_local_primary(&self, partition: u32) -> bool {
        self.owners(partition)
            .first()
            .map(|node| node.id == self.local)
            .unwrap_or(false)
    }

    /// Partitions for which the local node is the primary owner.
    pub fn my_primary_partitions(&self) -> Vec<u32> {
        (0..self.num_partitions)
            .filter(|&partition| self.is_local_primary(partition))
            .collect()
    }
}
