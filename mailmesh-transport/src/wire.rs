//! The JSON envelope exchanged between nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mailmesh_consensus::{
    AcceptReply, AcceptedValue, Assignment, NodeId, PrepareReply, ProposalId,
};
use mailmesh_store::ConversationState;

/// Self-describing peer message. The `kind` tag selects the variant;
/// timestamps are advisory only and never drive protocol decisions.
///
/// Consensus messages carry the `instance` key they participate in. One
/// assignment is one instance, so the key is the thread id qualified by the
/// assignment epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeerEnvelope {
    Prepare {
        instance: String,
        proposal_id: ProposalId,
        sender: NodeId,
        ts: DateTime<Utc>,
    },
    Promise {
        instance: String,
        proposal_id: ProposalId,
        accepted_id: Option<ProposalId>,
        accepted_value: Option<Assignment>,
        sender: NodeId,
        ts: DateTime<Utc>,
    },
    Accept {
        instance: String,
        proposal_id: ProposalId,
        value: Assignment,
        sender: NodeId,
        ts: DateTime<Utc>,
    },
    Accepted {
        instance: String,
        proposal_id: ProposalId,
        sender: NodeId,
        ts: DateTime<Utc>,
    },
    /// Rejection of a Prepare or Accept; `promised_id` names the promise
    /// that outranked the proposal.
    Nack {
        instance: String,
        proposal_id: ProposalId,
        promised_id: ProposalId,
        sender: NodeId,
        ts: DateTime<Utc>,
    },
    Heartbeat {
        node_id: NodeId,
        load: f64,
        specializations: Vec<String>,
        ts: DateTime<Utc>,
    },
    StateSync {
        state: ConversationState,
        sender: NodeId,
        ts: DateTime<Utc>,
    },
    /// Generic positive acknowledgement for heartbeat and sync messages.
    Ack {
        sender: NodeId,
        ts: DateTime<Utc>,
    },
}

impl PeerEnvelope {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PeerEnvelope::Prepare { .. } => "prepare",
            PeerEnvelope::Promise { .. } => "promise",
            PeerEnvelope::Accept { .. } => "accept",
            PeerEnvelope::Accepted { .. } => "accepted",
            PeerEnvelope::Nack { .. } => "nack",
            PeerEnvelope::Heartbeat { .. } => "heartbeat",
            PeerEnvelope::StateSync { .. } => "state_sync",
            PeerEnvelope::Ack { .. } => "ack",
        }
    }

    pub fn prepare(instance: &str, proposal_id: ProposalId, sender: &NodeId) -> Self {
        PeerEnvelope::Prepare {
            instance: instance.to_owned(),
            proposal_id,
            sender: sender.clone(),
            ts: Utc::now(),
        }
    }

    pub fn accept(
        instance: &str,
        proposal_id: ProposalId,
        value: Assignment,
        sender: &NodeId,
    ) -> Self {
        PeerEnvelope::Accept {
            instance: instance.to_owned(),
            proposal_id,
            value,
            sender: sender.clone(),
            ts: Utc::now(),
        }
    }

    pub fn heartbeat(node_id: &NodeId, load: f64, specializations: Vec<String>) -> Self {
        PeerEnvelope::Heartbeat {
            node_id: node_id.clone(),
            load,
            specializations,
            ts: Utc::now(),
        }
    }

    pub fn state_sync(state: ConversationState, sender: &NodeId) -> Self {
        PeerEnvelope::StateSync {
            state,
            sender: sender.clone(),
            ts: Utc::now(),
        }
    }

    pub fn ack(sender: &NodeId) -> Self {
        PeerEnvelope::Ack {
            sender: sender.clone(),
            ts: Utc::now(),
        }
    }

    /// Wrap an acceptor's prepare reply for the wire.
    pub fn from_prepare_reply(instance: &str, reply: PrepareReply, sender: &NodeId) -> Self {
        match reply {
            PrepareReply::Promise {
                proposal_id,
                accepted,
            } => {
                let (accepted_id, accepted_value) = match accepted {
                    Some(AcceptedValue { id, value }) => (Some(id), Some(value)),
                    None => (None, None),
                };
                PeerEnvelope::Promise {
                    instance: instance.to_owned(),
                    proposal_id,
                    accepted_id,
                    accepted_value,
                    sender: sender.clone(),
                    ts: Utc::now(),
                }
            }
            PrepareReply::Nack {
                proposal_id,
                promised_id,
            } => PeerEnvelope::Nack {
                instance: instance.to_owned(),
                proposal_id,
                promised_id,
                sender: sender.clone(),
                ts: Utc::now(),
            },
        }
    }

    /// Wrap an acceptor's accept reply for the wire.
    pub fn from_accept_reply(instance: &str, reply: AcceptReply, sender: &NodeId) -> Self {
        match reply {
            AcceptReply::Accepted { proposal_id } => PeerEnvelope::Accepted {
                instance: instance.to_owned(),
                proposal_id,
                sender: sender.clone(),
                ts: Utc::now(),
            },
            AcceptReply::Nack {
                proposal_id,
                promised_id,
            } => PeerEnvelope::Nack {
                instance: instance.to_owned(),
                proposal_id,
                promised_id,
                sender: sender.clone(),
                ts: Utc::now(),
            },
        }
    }

    /// Interpret an envelope as the reply to a Prepare.
    pub fn into_prepare_reply(self) -> Option<PrepareReply> {
        match self {
            PeerEnvelope::Promise {
                proposal_id,
                accepted_id,
                accepted_value,
                ..
            } => {
                let accepted = match (accepted_id, accepted_value) {
                    (Some(id), Some(value)) => Some(AcceptedValue { id, value }),
                    _ => None,
                };
                Some(PrepareReply::Promise {
                    proposal_id,
                    accepted,
                })
            }
            PeerEnvelope::Nack {
                proposal_id,
                promised_id,
                ..
            } => Some(PrepareReply::Nack {
                proposal_id,
                promised_id,
            }),
            _ => None,
        }
    }

    /// Interpret an envelope as the reply to an Accept.
    pub fn into_accept_reply(self) -> Option<AcceptReply> {
        match self {
            PeerEnvelope::Accepted { proposal_id, .. } => {
                Some(AcceptReply::Accepted { proposal_id })
            }
            PeerEnvelope::Nack {
                proposal_id,
                promised_id,
                ..
            } => Some(AcceptReply::Nack {
                proposal_id,
                promised_id,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelopes_are_tagged_by_kind() {
        let env =
            PeerEnvelope::prepare("t1/1", ProposalId { round: 9, proposer: 1 }, &"node-a".into());
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["kind"], "prepare");
        assert_eq!(json["instance"], "t1/1");
        assert_eq!(json["sender"], "node-a");
    }

    #[test]
    fn nack_is_a_distinct_kind_not_a_degenerate_promise() {
        let reply = PrepareReply::Nack {
            proposal_id: ProposalId { round: 3, proposer: 0 },
            promised_id: ProposalId { round: 7, proposer: 2 },
        };
        let env = PeerEnvelope::from_prepare_reply("t1/1", reply.clone(), &"node-b".into());
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["kind"], "nack");

        let parsed: PeerEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.into_prepare_reply(), Some(reply));
    }

    #[test]
    fn promise_carries_previously_accepted_binding() {
        let reply = PrepareReply::Promise {
            proposal_id: ProposalId { round: 10, proposer: 1 },
            accepted: Some(AcceptedValue {
                id: ProposalId { round: 4, proposer: 0 },
                value: Assignment {
                    thread_id: "t1".into(),
                    node: "node-c".into(),
                    specialization: "sales".into(),
                },
            }),
        };
        let env = PeerEnvelope::from_prepare_reply("t1/1", reply.clone(), &"node-b".into());
        let json = serde_json::to_string(&env).unwrap();
        let parsed: PeerEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.into_prepare_reply(), Some(reply));
    }

    #[test]
    fn consensus_replies_do_not_parse_as_the_wrong_phase() {
        let env = PeerEnvelope::Accepted {
            instance: "t1/1".into(),
            proposal_id: ProposalId { round: 2, proposer: 0 },
            sender: "node-a".into(),
            ts: Utc::now(),
        };
        assert_eq!(env.into_prepare_reply(), None);
    }
}
