//! Static cluster roster.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mailmesh_consensus::NodeId;

/// One entry in the cluster roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPeer {
    pub id: NodeId,
    /// `host:port` the peer's RPC surface listens on.
    pub address: String,
}

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("cluster roster is empty")]
    EmptyRoster,
    #[error("local node {0} is not in the cluster roster")]
    UnknownLocalNode(NodeId),
    #[error("duplicate node id {0} in cluster roster")]
    DuplicateNode(NodeId),
}

/// The ordered membership shared by every node.
///
/// Read-only after startup; reconfiguration requires a coordinated cluster
/// restart. The roster order is significant: it defines each node's rank,
/// which seeds the proposal-id tiebreaker and breaks load ties during
/// candidate selection.
#[derive(Debug, Clone)]
pub struct ClusterMembership {
    local: NodeId,
    peers: Vec<ClusterPeer>,
}

impl ClusterMembership {
    pub fn new(local: NodeId, peers: Vec<ClusterPeer>) -> Result<Self, MembershipError> {
        if peers.is_empty() {
            return Err(MembershipError::EmptyRoster);
        }
        for (i, peer) in peers.iter().enumerate() {
            if peers[..i].iter().any(|p| p.id == peer.id) {
                return Err(MembershipError::DuplicateNode(peer.id.clone()));
            }
        }
        if !peers.iter().any(|p| p.id == local) {
            return Err(MembershipError::UnknownLocalNode(local));
        }
        Ok(Self { local, peers })
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    /// This node's position in the roster order.
    pub fn local_rank(&self) -> u32 {
        self.peers
            .iter()
            .position(|p| p.id == self.local)
            .map(|i| i as u32)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Majority quorum: any two quorums intersect.
    pub fn quorum(&self) -> usize {
        self.peers.len() / 2 + 1
    }

    pub fn peers(&self) -> &[ClusterPeer] {
        &self.peers
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.peers.iter().map(|p| p.id.clone()).collect()
    }

    pub fn remote_ids(&self) -> Vec<NodeId> {
        self.peers
            .iter()
            .filter(|p| p.id != self.local)
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn address_of(&self, node: &NodeId) -> Option<&str> {
        self.peers
            .iter()
            .find(|p| &p.id == node)
            .map(|p| p.address.as_str())
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.peers.iter().any(|p| &p.id == node)
    }
}
