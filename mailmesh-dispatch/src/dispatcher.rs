//! The assignment path.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use mailmesh_cluster::PeerHealthTable;
use mailmesh_consensus::{Assignment, NodeId, ProposalEngine};
use mailmesh_store::{ConversationStore, MessageContext};

use crate::error::AssignError;
use crate::singleflight::{Flight, SingleFlight};
use crate::types::{Classifier, InboundMessage};

/// How much an assignment nudges the target's advertised load between
/// heartbeats, so back-to-back selections spread out.
const LOAD_STEP: f64 = 0.1;

/// Retry policy for consensus rounds.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Initial backoff after a failed round; doubles per attempt.
    pub retry_interval: Duration,
    pub max_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

pub struct Dispatcher {
    node_id: NodeId,
    health: Arc<PeerHealthTable>,
    store: Arc<ConversationStore>,
    engine: Arc<ProposalEngine>,
    classifier: Arc<dyn Classifier>,
    config: DispatchConfig,
    flights: SingleFlight,
}

impl Dispatcher {
    pub fn new(
        node_id: NodeId,
        health: Arc<PeerHealthTable>,
        store: Arc<ConversationStore>,
        engine: Arc<ProposalEngine>,
        classifier: Arc<dyn Classifier>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            node_id,
            health,
            store,
            engine,
            classifier,
            config,
            flights: SingleFlight::new(),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Assign a handler for an inbound message event.
    pub async fn assign_message(&self, message: &InboundMessage) -> Result<NodeId, AssignError> {
        let content = message.content();
        let specialization = self.classifier.classify(&content, &message.sender);
        let mut context = MessageContext::new(&specialization, &message.sender, &content);
        if !message.inbox_id.is_empty() {
            context
                .extra
                .insert("inbox_id".into(), message.inbox_id.clone().into());
        }
        if !message.message_id.is_empty() {
            context
                .extra
                .insert("message_id".into(), message.message_id.clone().into());
        }
        for (key, value) in &message.extra {
            context.extra.insert(key.clone(), value.clone());
        }
        self.assign_with_context(&message.thread_id, context).await
    }

    /// Assign a handler from raw content, classifying first.
    pub async fn assign(
        &self,
        thread_id: &str,
        content: &str,
        sender: &str,
    ) -> Result<NodeId, AssignError> {
        let specialization = self.classifier.classify(content, sender);
        let context = MessageContext::new(&specialization, sender, content);
        self.assign_with_context(thread_id, context).await
    }

    /// Assignment with an already-built context. Used directly for
    /// reassignment, where the original classification is preserved instead
    /// of re-classifying.
    pub async fn assign_with_context(
        &self,
        thread_id: &str,
        context: MessageContext,
    ) -> Result<NodeId, AssignError> {
        loop {
            match self.flights.join(thread_id) {
                Flight::Leader => {
                    let outcome = self.decide(thread_id, context).await;
                    self.flights.complete(thread_id, outcome.clone());
                    return outcome;
                }
                Flight::Follower(mut rx) => match rx.recv().await {
                    Ok(outcome) => return outcome,
                    // Leader vanished without publishing; take over.
                    Err(_) => continue,
                },
            }
        }
    }

    /// Reassign every conversation bound to a failed peer.
    ///
    /// Insufficient candidates leave a thread on the failed peer; it is
    /// picked up again when a candidate appears or the peer recovers.
    pub async fn on_peer_failed(&self, failed: &NodeId) {
        let owned = self.store.list_by_assignee(failed);
        if owned.is_empty() {
            debug!(peer = %failed, "failed peer owned no conversations");
            return;
        }
        info!(peer = %failed, count = owned.len(), "reassigning conversations from failed peer");

        for state in owned {
            match self
                .assign_with_context(&state.thread_id, state.context.clone())
                .await
            {
                Ok(node) => {
                    info!(thread = %state.thread_id, %node, "conversation reassigned");
                }
                Err(err) => {
                    warn!(
                        thread = %state.thread_id,
                        error = %err,
                        "reassignment failed; thread stays unassigned until a candidate appears"
                    );
                }
            }
        }
    }

    async fn decide(
        &self,
        thread_id: &str,
        context: MessageContext,
    ) -> Result<NodeId, AssignError> {
        let specialization = context.classification.clone();
        let best = self.pick_candidate(&specialization).ok_or_else(|| {
            warn!(thread = %thread_id, %specialization, "no eligible candidate");
            AssignError::NoEligibleCandidate {
                specialization: specialization.clone(),
            }
        })?;

        // One assignment is one consensus instance: key it by the version
        // this write will produce so reassignment opens a fresh decree.
        let epoch = self.store.get(thread_id).map(|s| s.version + 1).unwrap_or(1);
        let instance = format!("{thread_id}/{epoch}");
        let proposal = Assignment {
            thread_id: thread_id.to_owned(),
            node: best,
            specialization,
        };

        let mut delay = self.config.retry_interval;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.engine.propose(&instance, proposal.clone()).await {
                Ok(decided) => {
                    // The decided value is authoritative even when it names
                    // a node that is no longer healthy; a later heartbeat
                    // cycle drives reassignment.
                    let state = self.store.upsert(thread_id, &decided.node, context);
                    self.health.bump_load(&decided.node, LOAD_STEP);
                    info!(
                        thread = %thread_id,
                        node = %decided.node,
                        version = state.version,
                        "conversation assigned"
                    );
                    return Ok(decided.node);
                }
                Err(err) if attempt < self.config.max_attempts => {
                    warn!(thread = %thread_id, attempt, error = %err, "consensus round failed, backing off");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => {
                    warn!(thread = %thread_id, attempt, error = %err, "consensus retries exhausted");
                    return Err(AssignError::ConsensusUnavailable {
                        thread_id: thread_id.to_owned(),
                        attempts: attempt,
                    });
                }
            }
        }
    }

    /// Lowest advertised load wins; ties break on node id so every node
    /// observing the same health state selects the same candidate.
    fn pick_candidate(&self, specialization: &str) -> Option<NodeId> {
        let mut eligible = self.health.eligible(specialization);
        eligible.sort_by(|(a_id, a_load), (b_id, b_load)| {
            a_load
                .partial_cmp(b_load)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a_id.cmp(b_id))
        });
        eligible.into_iter().next().map(|(id, _)| id)
    }
}
