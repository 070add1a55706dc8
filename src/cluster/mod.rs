//! Cluster Addressing Module
//!
//! Implements the partition-to-node addressing layer of the grid.
//!
//! ## Core Concepts
//! - **Partitioning**: Keys hash into a fixed number of partitions (shards).
//! - **Placement**: `ClusterTopology` maps each partition to an ordered owner
//!   list: replica index 0 is the primary, indices 1..=backup_count are the
//!   backups. The node list is static configuration; membership changes and
//!   failure detection are outside this crate's scope.
//! - **Invocation**: `OperationInvoker` routes a single operation to one
//!   (partition, replica index) address. `ReplicaBroadcaster` fans one logical
//!   operation out to every eligible backup replica of a partition.

pub mod invoker;
pub mod topology;
pub mod types;

#[cfg(test)]
mod tests;
