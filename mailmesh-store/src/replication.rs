//! Replica selection and the push path.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use mailmesh_consensus::NodeId;

use crate::conversation::ConversationState;

/// Outbound channel for `StateSync` pushes. Implementations enforce a short
/// per-peer deadline and must not retry.
#[async_trait]
pub trait StatePusher: Send + Sync {
    async fn push(&self, target: &NodeId, state: &ConversationState) -> anyhow::Result<()>;
}

/// Pick the replica set for a thread: the origin first, then healthy peers
/// in the order of a keyed hash of `(thread_id, node_id)`, truncated to the
/// replication factor.
///
/// Deterministic for a fixed healthy set, so every node that observes the
/// same health state computes the same placement.
pub fn select_replicas(
    thread_id: &str,
    local: &NodeId,
    healthy: &[NodeId],
    factor: usize,
) -> BTreeSet<NodeId> {
    let mut ordered: Vec<&NodeId> = healthy.iter().filter(|n| *n != local).collect();
    ordered.sort_by_key(|node| placement_key(thread_id, node));

    let mut replicas = BTreeSet::new();
    replicas.insert(local.clone());
    for node in ordered {
        if replicas.len() >= factor.max(1) {
            break;
        }
        replicas.insert(node.clone());
    }
    replicas
}

fn placement_key(thread_id: &str, node: &NodeId) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(thread_id.as_bytes());
    hasher.update(b"/");
    hasher.update(node.as_bytes());
    let hash = hasher.finalize();
    let mut key = [0u8; 8];
    key.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(key)
}

/// Fans a fresh conversation state out to its replica set.
pub struct Replicator {
    local: NodeId,
    pusher: Arc<dyn StatePusher>,
}

impl Replicator {
    pub fn new(local: NodeId, pusher: Arc<dyn StatePusher>) -> Self {
        Self { local, pusher }
    }

    /// Push `state` to every replica except self. Fire-and-forget: each push
    /// runs in its own task and failures are only logged.
    pub fn replicate(&self, state: ConversationState) {
        for target in state.replicas.iter().filter(|r| **r != self.local) {
            let target = target.clone();
            let pusher = Arc::clone(&self.pusher);
            let state = state.clone();
            tokio::spawn(async move {
                match pusher.push(&target, &state).await {
                    Ok(()) => debug!(
                        replica = %target,
                        thread = %state.thread_id,
                        version = state.version,
                        "state pushed"
                    ),
                    Err(err) => warn!(
                        replica = %target,
                        thread = %state.thread_id,
                        error = %err,
                        "state push failed"
                    ),
                }
            });
        }
    }
}
