//! Inbound side of the peer RPC surface.
//!
//! The HTTP endpoints hand every decoded envelope to [`MessageHandler`],
//! which routes it to the acceptor registry, the health table, or the
//! conversation store. Handling is non-suspending: one mutex-protected
//! critical section per message, no I/O.

use std::sync::Arc;

use tracing::{debug, warn};

use mailmesh_cluster::PeerHealthTable;
use mailmesh_consensus::{AcceptorRegistry, NodeId};
use mailmesh_store::ConversationStore;

use crate::wire::PeerEnvelope;

pub struct MessageHandler {
    node_id: NodeId,
    acceptors: Arc<AcceptorRegistry>,
    health: Arc<PeerHealthTable>,
    store: Arc<ConversationStore>,
}

impl MessageHandler {
    pub fn new(
        node_id: NodeId,
        acceptors: Arc<AcceptorRegistry>,
        health: Arc<PeerHealthTable>,
        store: Arc<ConversationStore>,
    ) -> Self {
        Self {
            node_id,
            acceptors,
            health,
            store,
        }
    }

    /// Dispatch one inbound envelope and produce the reply envelope.
    pub fn handle(&self, envelope: PeerEnvelope) -> PeerEnvelope {
        match envelope {
            PeerEnvelope::Prepare {
                instance,
                proposal_id,
                sender,
                ..
            } => {
                debug!(from = %sender, %instance, proposal = %proposal_id, "prepare received");
                let reply = self.acceptors.handle_prepare(&instance, proposal_id);
                PeerEnvelope::from_prepare_reply(&instance, reply, &self.node_id)
            }
            PeerEnvelope::Accept {
                instance,
                proposal_id,
                value,
                sender,
                ..
            } => {
                debug!(from = %sender, %instance, proposal = %proposal_id, "accept received");
                let reply = self.acceptors.handle_accept(&instance, proposal_id, value);
                PeerEnvelope::from_accept_reply(&instance, reply, &self.node_id)
            }
            PeerEnvelope::Heartbeat {
                node_id,
                load,
                specializations,
                ..
            } => {
                debug!(from = %node_id, load, "heartbeat received");
                self.health.record_heartbeat(&node_id, load, specializations);
                PeerEnvelope::ack(&self.node_id)
            }
            PeerEnvelope::StateSync { state, sender, .. } => {
                debug!(
                    from = %sender,
                    thread = %state.thread_id,
                    version = state.version,
                    "state sync received"
                );
                self.store.apply_remote(state);
                PeerEnvelope::ack(&self.node_id)
            }
            other => {
                // Promise/Accepted/Nack/Ack are replies; they never arrive
                // as requests from a well-behaved peer.
                warn!(kind = other.kind_name(), "ignoring unexpected request envelope");
                PeerEnvelope::ack(&self.node_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mailmesh_cluster::{ClusterMembership, ClusterPeer, PeerStatus};
    use mailmesh_consensus::{Assignment, ProposalId};
    use mailmesh_store::{ConversationState, MessageContext, Replicator, StatePusher};
    use std::collections::BTreeSet;
    use std::time::Duration;

    struct Discard;

    #[async_trait::async_trait]
    impl StatePusher for Discard {
        async fn push(
            &self,
            _target: &NodeId,
            _state: &ConversationState,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn handler() -> (MessageHandler, Arc<PeerHealthTable>, Arc<ConversationStore>) {
        let peers = ["node-a", "node-b", "node-c"]
            .iter()
            .enumerate()
            .map(|(i, id)| ClusterPeer {
                id: id.to_string(),
                address: format!("127.0.0.1:{}", 7000 + i),
            })
            .collect();
        let membership = ClusterMembership::new("node-a".into(), peers).unwrap();
        let health = Arc::new(PeerHealthTable::new(&membership, Duration::from_secs(10), 3));
        let store = Arc::new(ConversationStore::new(
            "node-a".into(),
            3,
            Arc::clone(&health),
            Replicator::new("node-a".into(), Arc::new(Discard)),
        ));
        let handler = MessageHandler::new(
            "node-a".into(),
            Arc::new(AcceptorRegistry::new()),
            Arc::clone(&health),
            Arc::clone(&store),
        );
        (handler, health, store)
    }

    #[test]
    fn prepare_round_trips_through_the_acceptor() {
        let (handler, _, _) = handler();
        let reply = handler.handle(PeerEnvelope::prepare(
            "t1",
            ProposalId { round: 5, proposer: 1 },
            &"node-b".into(),
        ));
        assert_eq!(reply.kind_name(), "promise");
    }

    #[test]
    fn accept_then_lower_prepare_is_nacked() {
        let (handler, _, _) = handler();
        handler.handle(PeerEnvelope::prepare(
            "t1",
            ProposalId { round: 5, proposer: 1 },
            &"node-b".into(),
        ));
        let accepted = handler.handle(PeerEnvelope::accept(
            "t1",
            ProposalId { round: 5, proposer: 1 },
            Assignment {
                thread_id: "t1".into(),
                node: "node-b".into(),
                specialization: "support".into(),
            },
            &"node-b".into(),
        ));
        assert_eq!(accepted.kind_name(), "accepted");

        let nack = handler.handle(PeerEnvelope::prepare(
            "t1",
            ProposalId { round: 4, proposer: 0 },
            &"node-c".into(),
        ));
        assert_eq!(nack.kind_name(), "nack");
    }

    #[test]
    fn heartbeat_updates_the_health_table() {
        let (handler, health, _) = handler();
        let reply = handler.handle(PeerEnvelope::heartbeat(
            &"node-b".into(),
            0.4,
            vec!["sales".into()],
        ));
        assert_eq!(reply.kind_name(), "ack");
        assert_eq!(health.status_of(&"node-b".into()), Some(PeerStatus::Healthy));
        let eligible = health.eligible("sales");
        assert!(eligible.iter().any(|(id, load)| id == "node-b" && *load == 0.4));
    }

    #[test]
    fn state_sync_installs_into_the_store() {
        let (handler, _, store) = handler();
        let state = ConversationState {
            thread_id: "t9".into(),
            assigned_node: "node-b".into(),
            origin: "node-b".into(),
            context: MessageContext::new("support", "alice@example.com", "body"),
            last_updated: Utc::now(),
            version: 4,
            replicas: BTreeSet::from(["node-a".to_string(), "node-b".to_string()]),
        };
        let reply = handler.handle(PeerEnvelope::state_sync(state, &"node-b".into()));
        assert_eq!(reply.kind_name(), "ack");
        assert_eq!(store.get("t9").unwrap().version, 4);
    }

    #[test]
    fn reply_envelopes_are_ignored() {
        let (handler, _, _) = handler();
        let reply = handler.handle(PeerEnvelope::ack(&"node-b".into()));
        assert_eq!(reply.kind_name(), "ack");
    }
}
