//! Peer health tracking and the heartbeat failure detector.
//!
//! Every cluster member, the local node included, has an entry in the health
//! table. Heartbeat ingress only refreshes the entry's data; all state
//! transitions happen in the periodic scan so the timing semantics stay in
//! one place. A missed heartbeat is suspicion, not a verdict: only reaching
//! the failure threshold produces a `FAILED` transition, and each such
//! transition emits exactly one event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use mailmesh_consensus::NodeId;

use crate::membership::ClusterMembership;

/// Liveness state of one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    Healthy,
    Suspected,
    Failed,
    Recovering,
}

impl std::fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PeerStatus::Healthy => "healthy",
            PeerStatus::Suspected => "suspected",
            PeerStatus::Failed => "failed",
            PeerStatus::Recovering => "recovering",
        };
        f.write_str(s)
    }
}

/// Last observed health of one peer.
#[derive(Debug, Clone, Serialize)]
pub struct PeerHealth {
    pub status: PeerStatus,
    pub load: f64,
    pub specializations: Vec<String>,
    pub failure_count: u32,
    pub last_heartbeat: DateTime<Utc>,
}

impl PeerHealth {
    fn fresh(at: DateTime<Utc>) -> Self {
        Self {
            status: PeerStatus::Healthy,
            load: 0.0,
            specializations: Vec::new(),
            failure_count: 0,
            last_heartbeat: at,
        }
    }
}

/// Health table for the whole roster.
///
/// Read concurrently by candidate selection and status reporting; mutated
/// only by heartbeat ingress and the detector scan. The lock is never held
/// across I/O.
pub struct PeerHealthTable {
    local: NodeId,
    healthy_interval: Duration,
    failure_threshold: u32,
    peers: RwLock<HashMap<NodeId, PeerHealth>>,
}

impl PeerHealthTable {
    /// Seeds an entry per roster member; everyone starts out healthy.
    pub fn new(
        membership: &ClusterMembership,
        healthy_interval: Duration,
        failure_threshold: u32,
    ) -> Self {
        let now = Utc::now();
        let peers = membership
            .node_ids()
            .into_iter()
            .map(|id| (id, PeerHealth::fresh(now)))
            .collect();
        Self {
            local: membership.local_id().clone(),
            healthy_interval,
            failure_threshold,
            peers: RwLock::new(peers),
        }
    }

    /// Heartbeat ingress: refresh the peer's advertised data and timestamp.
    pub fn record_heartbeat(&self, node: &NodeId, load: f64, specializations: Vec<String>) {
        self.record_heartbeat_at(node, load, specializations, Utc::now());
    }

    pub fn record_heartbeat_at(
        &self,
        node: &NodeId,
        load: f64,
        specializations: Vec<String>,
        at: DateTime<Utc>,
    ) {
        let mut peers = self.peers.write();
        let entry = peers
            .entry(node.clone())
            .or_insert_with(|| PeerHealth::fresh(at));
        entry.last_heartbeat = at;
        entry.load = load;
        entry.specializations = specializations;
    }

    /// Refresh the local node's own entry. The local entry never expires; it
    /// exists so candidate selection treats self like any other member.
    pub fn record_local(&self, load: f64, specializations: Vec<String>) {
        let local = self.local.clone();
        self.record_heartbeat(&local, load, specializations);
    }

    /// Run one detector pass and return peers that newly transitioned to
    /// `FAILED` during it.
    pub fn scan(&self) -> Vec<NodeId> {
        self.scan_at(Utc::now())
    }

    pub fn scan_at(&self, now: DateTime<Utc>) -> Vec<NodeId> {
        let window = chrono::Duration::milliseconds((2 * self.healthy_interval).as_millis() as i64);
        let mut newly_failed = Vec::new();

        let mut peers = self.peers.write();
        for (node, health) in peers.iter_mut() {
            if node == &self.local {
                continue;
            }

            let stale = now.signed_duration_since(health.last_heartbeat) > window;
            if stale {
                health.failure_count += 1;
                if health.failure_count >= self.failure_threshold {
                    if health.status != PeerStatus::Failed {
                        health.status = PeerStatus::Failed;
                        warn!(peer = %node, misses = health.failure_count, "peer marked as failed");
                        newly_failed.push(node.clone());
                    }
                } else if health.status == PeerStatus::Healthy {
                    health.status = PeerStatus::Suspected;
                    warn!(peer = %node, "peer suspected of failure");
                }
            } else {
                health.failure_count = 0;
                match health.status {
                    PeerStatus::Suspected | PeerStatus::Failed => {
                        health.status = PeerStatus::Recovering;
                        info!(peer = %node, "peer recovering");
                    }
                    PeerStatus::Recovering => {
                        health.status = PeerStatus::Healthy;
                        info!(peer = %node, "peer healthy again");
                    }
                    PeerStatus::Healthy => {}
                }
            }
        }

        newly_failed
    }

    /// Nodes currently eligible to take work for `specialization`: healthy
    /// and advertising the tag. Returned with their advertised load.
    pub fn eligible(&self, specialization: &str) -> Vec<(NodeId, f64)> {
        let peers = self.peers.read();
        peers
            .iter()
            .filter(|(_, h)| h.status == PeerStatus::Healthy)
            .filter(|(_, h)| h.specializations.iter().any(|s| s == specialization))
            .map(|(id, h)| (id.clone(), h.load))
            .collect()
    }

    pub fn healthy_nodes(&self) -> Vec<NodeId> {
        let peers = self.peers.read();
        peers
            .iter()
            .filter(|(_, h)| h.status == PeerStatus::Healthy)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn status_of(&self, node: &NodeId) -> Option<PeerStatus> {
        self.peers.read().get(node).map(|h| h.status)
    }

    /// Nudge a node's advertised load after assigning it work, so repeated
    /// selections between heartbeats spread out.
    pub fn bump_load(&self, node: &NodeId, delta: f64) {
        if let Some(health) = self.peers.write().get_mut(node) {
            health.load += delta;
            debug!(peer = %node, load = health.load, "advertised load bumped");
        }
    }

    pub fn local_load(&self) -> f64 {
        self.peers
            .read()
            .get(&self.local)
            .map(|h| h.load)
            .unwrap_or(0.0)
    }

    pub fn snapshot(&self) -> HashMap<NodeId, PeerHealth> {
        self.peers.read().clone()
    }
}

/// Periodic scan loop wrapping the health table.
///
/// Owns the sending half of the failure-event channel; the coordinator
/// consumes the receiving half and triggers reassignment.
pub struct FailureDetector {
    table: Arc<PeerHealthTable>,
    interval: Duration,
    failed_tx: mpsc::UnboundedSender<NodeId>,
}

impl FailureDetector {
    pub fn new(
        table: Arc<PeerHealthTable>,
        interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<NodeId>) {
        let (failed_tx, failed_rx) = mpsc::unbounded_channel();
        (
            Self {
                table,
                interval,
                failed_tx,
            },
            failed_rx,
        )
    }

    /// Scan until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval = ?self.interval, "failure detector started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for node in self.table.scan() {
                        if self.failed_tx.send(node).is_err() {
                            debug!("failure event receiver dropped");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("failure detector stopped");
    }
}
