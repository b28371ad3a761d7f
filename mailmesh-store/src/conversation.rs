//! The versioned conversation map.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use mailmesh_cluster::PeerHealthTable;
use mailmesh_consensus::NodeId;

use crate::replication::{select_replicas, Replicator};

/// Context captured from the inbound message that produced an assignment.
///
/// Fields the coordinator does not understand are preserved opaquely in
/// `extra` for the downstream reply path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageContext {
    pub classification: String,
    pub sender: String,
    pub content_digest: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MessageContext {
    pub fn new(classification: &str, sender: &str, content: &str) -> Self {
        Self {
            classification: classification.to_owned(),
            sender: sender.to_owned(),
            content_digest: blake3::hash(content.as_bytes()).to_hex().to_string(),
            extra: serde_json::Map::new(),
        }
    }
}

/// One conversation's binding to its handler node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_id: String,
    pub assigned_node: NodeId,
    /// Node that drove the consensus round producing this version.
    pub origin: NodeId,
    pub context: MessageContext,
    pub last_updated: DateTime<Utc>,
    pub version: u64,
    pub replicas: BTreeSet<NodeId>,
}

/// Outcome of applying a remotely pushed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApply {
    Installed,
    /// The local copy was already as new or newer; the push was dropped.
    Stale,
}

/// In-memory map of `thread_id → ConversationState`.
///
/// Local `upsert` and remote `apply_remote` contend on the same per-entry
/// guard; the per-thread version sequence is strictly increasing for local
/// writes and non-decreasing overall.
pub struct ConversationStore {
    local: NodeId,
    replication_factor: usize,
    health: Arc<PeerHealthTable>,
    replicator: Replicator,
    entries: DashMap<String, ConversationState>,
}

impl ConversationStore {
    pub fn new(
        local: NodeId,
        replication_factor: usize,
        health: Arc<PeerHealthTable>,
        replicator: Replicator,
    ) -> Self {
        Self {
            local,
            replication_factor,
            health,
            replicator,
            entries: DashMap::new(),
        }
    }

    /// Record a decided assignment under a fresh version and hand the new
    /// state to the replication layer.
    ///
    /// Version bump, replica selection, and installation all happen under
    /// the entry guard; the replication push is asynchronous and best-effort.
    pub fn upsert(
        &self,
        thread_id: &str,
        assigned_node: &NodeId,
        context: MessageContext,
    ) -> ConversationState {
        let healthy = self.health.healthy_nodes();
        let replicas = select_replicas(thread_id, &self.local, &healthy, self.replication_factor);

        let state = match self.entries.entry(thread_id.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let next = ConversationState {
                    thread_id: thread_id.to_owned(),
                    assigned_node: assigned_node.clone(),
                    origin: self.local.clone(),
                    context,
                    last_updated: Utc::now(),
                    version: occupied.get().version + 1,
                    replicas,
                };
                occupied.insert(next.clone());
                next
            }
            Entry::Vacant(vacant) => {
                let first = ConversationState {
                    thread_id: thread_id.to_owned(),
                    assigned_node: assigned_node.clone(),
                    origin: self.local.clone(),
                    context,
                    last_updated: Utc::now(),
                    version: 1,
                    replicas,
                };
                vacant.insert(first.clone());
                first
            }
        };

        self.replicator.replicate(state.clone());
        state
    }

    /// Install a state pushed by a peer iff it is newer than the local copy.
    /// Ties on version go to the higher origin id, so concurrent writers
    /// resolve the same way everywhere.
    pub fn apply_remote(&self, state: ConversationState) -> RemoteApply {
        match self.entries.entry(state.thread_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if (state.version, &state.origin) > (current.version, &current.origin) {
                    occupied.insert(state);
                    RemoteApply::Installed
                } else {
                    debug!(
                        thread = %state.thread_id,
                        pushed = state.version,
                        held = current.version,
                        "dropping stale state push"
                    );
                    RemoteApply::Stale
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(state);
                RemoteApply::Installed
            }
        }
    }

    pub fn get(&self, thread_id: &str) -> Option<ConversationState> {
        self.entries.get(thread_id).map(|e| e.clone())
    }

    /// Threads currently bound to `node`.
    pub fn list_by_assignee(&self, node: &NodeId) -> Vec<ConversationState> {
        self.entries
            .iter()
            .filter(|e| &e.assigned_node == node)
            .map(|e| e.clone())
            .collect()
    }

    /// States this node originated, for the periodic re-push loop.
    pub fn locally_originated(&self) -> Vec<ConversationState> {
        self.entries
            .iter()
            .filter(|e| e.origin == self.local)
            .map(|e| e.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live assignment counts keyed by classification, for the status
    /// surface.
    pub fn assignments_by_classification(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for entry in self.entries.iter() {
            *counts
                .entry(entry.context.classification.clone())
                .or_insert(0) += 1;
        }
        counts
    }

    /// Re-replicate every locally originated state. Used by the periodic
    /// sync tick so replicas that missed a push catch up.
    pub fn resync(&self) -> usize {
        let states = self.locally_originated();
        let count = states.len();
        for state in states {
            self.replicator.replicate(state);
        }
        count
    }
}
