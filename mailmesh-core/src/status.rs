//! Read-only observation surface.

use std::collections::HashMap;

use serde::Serialize;

use mailmesh_cluster::PeerHealth;
use mailmesh_consensus::NodeId;

/// Snapshot of one node's view of the system, served over the status
/// endpoint. Building it only reads; it never blocks coordination work.
#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub node_id: NodeId,
    pub running: bool,
    pub peers: HashMap<NodeId, PeerHealth>,
    pub conversation_count: usize,
    pub assignments_by_specialization: HashMap<String, usize>,
}
