//! Outbound HTTP RPC to cluster peers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, warn};

use mailmesh_cluster::ClusterMembership;
use mailmesh_consensus::{
    AcceptReply, AcceptorRegistry, Assignment, NodeId, PrepareReply, ProposalId,
    ProposerTransport,
};
use mailmesh_store::{ConversationState, StatePusher};

use crate::wire::PeerEnvelope;

const CONSENSUS_PATH: &str = "/internal/consensus";
const HEARTBEAT_PATH: &str = "/internal/heartbeat";
const SYNC_PATH: &str = "/internal/sync";

/// An individual RPC failure. Never fatal on its own; missed heartbeats are
/// what eventually mark the peer as failed.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("no address known for node {0}")]
    UnknownNode(NodeId),
    #[error("peer {node} returned HTTP {status}")]
    Status { node: NodeId, status: u16 },
    #[error("peer {node} unreachable: {source}")]
    Unreachable {
        node: NodeId,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected {got} reply from {node}")]
    UnexpectedReply { node: NodeId, got: &'static str },
}

/// HTTP client for the consensus and heartbeat paths.
///
/// Calls addressed to the local node skip the wire and run against the
/// in-process acceptor registry; everything else is a JSON POST with the
/// configured deadline. Consensus messages are never retried here.
pub struct HttpPeerClient {
    node_id: NodeId,
    membership: Arc<ClusterMembership>,
    acceptors: Arc<AcceptorRegistry>,
    http: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new(
        node_id: NodeId,
        membership: Arc<ClusterMembership>,
        acceptors: Arc<AcceptorRegistry>,
        rpc_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(rpc_timeout).build()?;
        Ok(Self {
            node_id,
            membership,
            acceptors,
            http,
        })
    }

    async fn post(
        &self,
        target: &NodeId,
        path: &str,
        envelope: &PeerEnvelope,
    ) -> Result<PeerEnvelope, RpcError> {
        let address = self
            .membership
            .address_of(target)
            .ok_or_else(|| RpcError::UnknownNode(target.clone()))?;
        let url = format!("http://{address}{path}");

        let response = self
            .http
            .post(&url)
            .json(envelope)
            .send()
            .await
            .map_err(|source| RpcError::Unreachable {
                node: target.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(RpcError::Status {
                node: target.clone(),
                status: response.status().as_u16(),
            });
        }

        response.json().await.map_err(|source| RpcError::Unreachable {
            node: target.clone(),
            source,
        })
    }

    /// Broadcast this node's heartbeat to every remote member. Failures are
    /// logged and swallowed; a peer that cannot be reached will simply not
    /// refresh us, and vice versa.
    pub async fn broadcast_heartbeat(&self, load: f64, specializations: Vec<String>) {
        let envelope = PeerEnvelope::heartbeat(&self.node_id, load, specializations);
        let sends = self.membership.remote_ids().into_iter().map(|peer| {
            let envelope = envelope.clone();
            async move {
                match self.post(&peer, HEARTBEAT_PATH, &envelope).await {
                    Ok(_) => debug!(peer = %peer, "heartbeat delivered"),
                    Err(err) => debug!(peer = %peer, error = %err, "heartbeat not delivered"),
                }
            }
        });
        join_all(sends).await;
    }
}

#[async_trait]
impl ProposerTransport for HttpPeerClient {
    async fn prepare(
        &self,
        target: &NodeId,
        instance: &str,
        id: ProposalId,
    ) -> anyhow::Result<PrepareReply> {
        if target == &self.node_id {
            return Ok(self.acceptors.handle_prepare(instance, id));
        }

        let envelope = PeerEnvelope::prepare(instance, id, &self.node_id);
        let reply = self.post(target, CONSENSUS_PATH, &envelope).await?;
        let kind = reply.kind_name();
        reply.into_prepare_reply().ok_or_else(|| {
            RpcError::UnexpectedReply {
                node: target.clone(),
                got: kind,
            }
            .into()
        })
    }

    async fn accept(
        &self,
        target: &NodeId,
        instance: &str,
        id: ProposalId,
        value: Assignment,
    ) -> anyhow::Result<AcceptReply> {
        if target == &self.node_id {
            return Ok(self.acceptors.handle_accept(instance, id, value));
        }

        let envelope = PeerEnvelope::accept(instance, id, value, &self.node_id);
        let reply = self.post(target, CONSENSUS_PATH, &envelope).await?;
        let kind = reply.kind_name();
        reply.into_accept_reply().ok_or_else(|| {
            RpcError::UnexpectedReply {
                node: target.clone(),
                got: kind,
            }
            .into()
        })
    }
}

/// Push half of the replication layer: one `StateSync` POST per replica,
/// with a short deadline and no retry.
pub struct HttpStatePusher {
    node_id: NodeId,
    membership: Arc<ClusterMembership>,
    http: reqwest::Client,
}

impl HttpStatePusher {
    pub fn new(
        node_id: NodeId,
        membership: Arc<ClusterMembership>,
        push_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(push_timeout).build()?;
        Ok(Self {
            node_id,
            membership,
            http,
        })
    }
}

#[async_trait]
impl StatePusher for HttpStatePusher {
    async fn push(&self, target: &NodeId, state: &ConversationState) -> anyhow::Result<()> {
        let address = self
            .membership
            .address_of(target)
            .ok_or_else(|| RpcError::UnknownNode(target.clone()))?;
        let url = format!("http://{address}{SYNC_PATH}");
        let envelope = PeerEnvelope::state_sync(state.clone(), &self.node_id);

        let response = self
            .http
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|source| RpcError::Unreachable {
                node: target.clone(),
                source,
            })?;

        if !response.status().is_success() {
            warn!(peer = %target, status = %response.status(), "state sync rejected");
            return Err(RpcError::Status {
                node: target.clone(),
                status: response.status().as_u16(),
            }
            .into());
        }
        Ok(())
    }
}
