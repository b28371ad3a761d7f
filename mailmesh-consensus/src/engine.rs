//! Proposer side of the protocol.
//!
//! [`ProposalEngine::propose`] runs one two-phase round against every cluster
//! member, itself included. Peer calls fan out concurrently and the round
//! proceeds as soon as a quorum of positive replies is in; replies that never
//! arrive count as neither promise nor rejection. The transport owns the
//! per-call deadline and must not retry on its own.
//!
//! Each call names the consensus instance it participates in. One assignment
//! is one instance: reassigning a thread after its handler failed opens a
//! fresh instance rather than re-deciding a closed one.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::proposal::{ProposalId, ProposalIdGenerator};
use crate::types::{AcceptReply, Assignment, NodeId, PrepareReply};

/// Outbound channel the proposer uses to reach acceptors.
///
/// Implementations resolve the target to an address, enforce a deadline, and
/// short-circuit calls addressed to the local node into the in-process
/// acceptor registry.
#[async_trait]
pub trait ProposerTransport: Send + Sync {
    async fn prepare(
        &self,
        target: &NodeId,
        instance: &str,
        id: ProposalId,
    ) -> anyhow::Result<PrepareReply>;

    async fn accept(
        &self,
        target: &NodeId,
        instance: &str,
        id: ProposalId,
        value: Assignment,
    ) -> anyhow::Result<AcceptReply>;
}

/// A consensus round that could not gather a quorum. Retry policy lives with
/// the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("prepare quorum not reached for instance {instance}: {got}/{need} promises")]
    PrepareQuorum {
        instance: String,
        got: usize,
        need: usize,
    },
    #[error("accept quorum not reached for instance {instance}: {got}/{need} acceptances")]
    AcceptQuorum {
        instance: String,
        got: usize,
        need: usize,
    },
}

/// Drives single-decree rounds for this node.
pub struct ProposalEngine {
    node_id: NodeId,
    members: Vec<NodeId>,
    quorum: usize,
    generator: ProposalIdGenerator,
    transport: Arc<dyn ProposerTransport>,
}

impl ProposalEngine {
    /// `rank` is this node's position in the ordered membership list and
    /// becomes the proposal-id tiebreaker.
    pub fn new(
        node_id: NodeId,
        members: Vec<NodeId>,
        rank: u32,
        transport: Arc<dyn ProposerTransport>,
    ) -> Self {
        let quorum = members.len() / 2 + 1;
        Self {
            node_id,
            members,
            quorum,
            generator: ProposalIdGenerator::new(rank),
            transport,
        }
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Run one consensus round for `instance`.
    ///
    /// Returns the decided assignment, which is the caller's value only when
    /// no competing value was already accepted by some quorum member. Callers
    /// must treat the returned value as authoritative even when it differs
    /// from what they proposed.
    pub async fn propose(
        &self,
        instance: &str,
        value: Assignment,
    ) -> Result<Assignment, ConsensusError> {
        let id = self.generator.next();
        debug!(node = %self.node_id, %instance, proposal = %id, "starting consensus round");

        // Phase 1: Prepare.
        let mut prepares: FuturesUnordered<_> = self
            .members
            .iter()
            .map(|member| async move {
                (member, self.transport.prepare(member, instance, id).await)
            })
            .collect();

        let mut promises = Vec::new();
        while let Some((member, result)) = prepares.next().await {
            match result {
                Ok(PrepareReply::Promise { accepted, .. }) => {
                    promises.push(accepted);
                    if promises.len() >= self.quorum {
                        break;
                    }
                }
                Ok(PrepareReply::Nack { promised_id, .. }) => {
                    debug!(node = %member, %promised_id, "prepare rejected by higher promise");
                }
                Err(err) => {
                    warn!(node = %member, error = %err, "prepare delivery failed");
                }
            }
        }
        drop(prepares);

        if promises.len() < self.quorum {
            return Err(ConsensusError::PrepareQuorum {
                instance: instance.to_owned(),
                got: promises.len(),
                need: self.quorum,
            });
        }

        // Adopt the value accepted under the highest proposal id, if any
        // quorum member reported one; otherwise propose our own.
        let chosen = promises
            .into_iter()
            .flatten()
            .max_by_key(|accepted| accepted.id)
            .map(|accepted| accepted.value)
            .unwrap_or(value);

        // Phase 2: Accept.
        let mut accepts: FuturesUnordered<_> = self
            .members
            .iter()
            .map(|member| {
                let proposal = chosen.clone();
                async move {
                    (member, self.transport.accept(member, instance, id, proposal).await)
                }
            })
            .collect();

        let mut accepted = 0usize;
        while let Some((member, result)) = accepts.next().await {
            match result {
                Ok(AcceptReply::Accepted { .. }) => {
                    accepted += 1;
                    if accepted >= self.quorum {
                        break;
                    }
                }
                Ok(AcceptReply::Nack { promised_id, .. }) => {
                    debug!(node = %member, %promised_id, "accept rejected by higher promise");
                }
                Err(err) => {
                    warn!(node = %member, error = %err, "accept delivery failed");
                }
            }
        }
        drop(accepts);

        if accepted < self.quorum {
            return Err(ConsensusError::AcceptQuorum {
                instance: instance.to_owned(),
                got: accepted,
                need: self.quorum,
            });
        }

        info!(
            node = %self.node_id,
            %instance,
            proposal = %id,
            decided = %chosen.node,
            "consensus reached"
        );
        Ok(chosen)
    }
}
