use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Stable identity of a cluster member.
///
/// Derived from the node's HTTP address so every member of a statically
/// configured cluster computes the same identifier for the same node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

/// A single member of the grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub http_addr: SocketAddr,
}

impl Node {
    pub fn new(http_addr: SocketAddr) -> Self {
        Self {
            id: NodeId::from_addr(http_addr),
            http_addr,
        }
    }
}
