//! Core types shared across the consensus protocol.

use serde::{Deserialize, Serialize};

use crate::proposal::ProposalId;

/// Unique identifier for nodes in the cluster.
///
/// This is the stable name a node is configured with; the ordered membership
/// list maps it to a network address.
pub type NodeId = String;

/// The value a consensus instance decides: the binding of a conversation
/// thread to the node responsible for handling it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Conversation thread this binding is for
    pub thread_id: String,
    /// Node chosen to handle the thread
    pub node: NodeId,
    /// Specialization that drove candidate selection
    pub specialization: String,
}

/// A previously accepted `(id, value)` pair reported back in a Promise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedValue {
    pub id: ProposalId,
    pub value: Assignment,
}

/// Acceptor reply to a Prepare message.
///
/// A rejection is its own variant rather than a promise with sentinel
/// fields, so callers can never mistake one for the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PrepareReply {
    /// The acceptor promises not to accept proposals below `proposal_id`,
    /// and reports the highest value it has already accepted, if any.
    Promise {
        proposal_id: ProposalId,
        accepted: Option<AcceptedValue>,
    },
    /// The acceptor has already promised a higher proposal.
    Nack {
        proposal_id: ProposalId,
        promised_id: ProposalId,
    },
}

/// Acceptor reply to an Accept message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AcceptReply {
    /// The value was accepted under `proposal_id`.
    Accepted { proposal_id: ProposalId },
    /// A higher promise supersedes this proposal.
    Nack {
        proposal_id: ProposalId,
        promised_id: ProposalId,
    },
}
