//! # Mailmesh Core - Coordinator Orchestration
//!
//! Wires the coordination fabric together and manages its lifecycle. One
//! [`MeshCoordinator`] per process owns:
//!
//! - the static cluster membership and the peer health table
//! - the per-instance acceptor registry and the consensus proposer
//! - the versioned conversation store with its replication layer
//! - the assignment dispatcher with its injectable classifier and reply path
//! - the background loops: heartbeat broadcast, failure-detector scan,
//!   failure-event consumption, and the periodic state re-push
//!
//! Handlers receive the coordinator as an explicit handle; there is no
//! process-global instance. Startup validates configuration fatally, and
//! shutdown drains background tasks under a bounded grace period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mailmesh_cluster::{ClusterMembership, FailureDetector, PeerHealthTable};
use mailmesh_consensus::{AcceptorRegistry, NodeId, ProposalEngine, ProposerTransport};
use mailmesh_dispatch::{
    AssignError, Classifier, DispatchConfig, Dispatcher, InboundMessage, ReplyHandler,
    ReplyOutcome,
};
use mailmesh_processor::{KeywordClassifier, LogMailer, TemplateResponder};
use mailmesh_store::{ConversationStore, Replicator, StatePusher};
use mailmesh_transport::{HttpPeerClient, HttpStatePusher, MessageHandler};

pub mod config;
pub mod status;

pub use config::{ConfigError, MeshConfig};
pub use status::SystemStatus;

/// Advertised load contributed by each conversation currently assigned to
/// this node.
const LOAD_PER_CONVERSATION: f64 = 0.1;

/// What became of one inbound event.
#[derive(Debug)]
pub struct EventOutcome {
    pub assigned_node: NodeId,
    pub handled_locally: bool,
    pub reply: Option<ReplyOutcome>,
}

impl std::fmt::Debug for MeshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshCoordinator").finish_non_exhaustive()
    }
}

/// The per-process coordinator instance.
pub struct MeshCoordinator {
    config: MeshConfig,
    membership: Arc<ClusterMembership>,
    health: Arc<PeerHealthTable>,
    store: Arc<ConversationStore>,
    dispatcher: Arc<Dispatcher>,
    handler: Arc<MessageHandler>,
    client: Arc<HttpPeerClient>,
    reply_handler: Arc<dyn ReplyHandler>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    detector: Mutex<Option<FailureDetector>>,
    failed_rx: Mutex<Option<mpsc::UnboundedReceiver<NodeId>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MeshCoordinator {
    /// Build a coordinator with the default keyword classifier and the
    /// log-only auto-responder.
    pub async fn new(config: MeshConfig) -> Result<Self> {
        Self::with_handlers(
            config,
            Arc::new(KeywordClassifier::new()),
            Arc::new(TemplateResponder::new(Arc::new(LogMailer))),
        )
    }

    /// Build a coordinator with injected classifier and reply path.
    pub fn with_handlers(
        config: MeshConfig,
        classifier: Arc<dyn Classifier>,
        reply_handler: Arc<dyn ReplyHandler>,
    ) -> Result<Self> {
        config.validate()?;

        let node_id = config.node.node_id.clone();
        let membership = Arc::new(ClusterMembership::new(
            node_id.clone(),
            config.cluster.nodes.clone(),
        )?);
        let health = Arc::new(PeerHealthTable::new(
            &membership,
            config.health.healthy_interval,
            config.health.failure_threshold,
        ));
        health.record_local(0.0, config.node.specializations.clone());

        let acceptors = Arc::new(AcceptorRegistry::new());
        let pusher = Arc::new(HttpStatePusher::new(
            node_id.clone(),
            Arc::clone(&membership),
            config.cluster.rpc_timeout,
        )?);
        let store = Arc::new(ConversationStore::new(
            node_id.clone(),
            config.effective_replication_factor(),
            Arc::clone(&health),
            Replicator::new(node_id.clone(), pusher as Arc<dyn StatePusher>),
        ));
        let client = Arc::new(HttpPeerClient::new(
            node_id.clone(),
            Arc::clone(&membership),
            Arc::clone(&acceptors),
            config.cluster.rpc_timeout,
        )?);
        let engine = Arc::new(ProposalEngine::new(
            node_id.clone(),
            membership.node_ids(),
            membership.local_rank(),
            Arc::clone(&client) as Arc<dyn ProposerTransport>,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            node_id.clone(),
            Arc::clone(&health),
            Arc::clone(&store),
            engine,
            classifier,
            DispatchConfig {
                retry_interval: config.cluster.retry_interval,
                max_attempts: config.cluster.max_consensus_attempts,
            },
        ));
        let handler = Arc::new(MessageHandler::new(
            node_id.clone(),
            Arc::clone(&acceptors),
            Arc::clone(&health),
            Arc::clone(&store),
        ));
        let (detector, failed_rx) = FailureDetector::new(
            Arc::clone(&health),
            config.health.healthy_interval,
        );
        let (shutdown, _) = watch::channel(false);

        info!(
            node = %node_id,
            cluster = membership.len(),
            quorum = membership.quorum(),
            "🚀 mailmesh coordinator initialized"
        );

        Ok(Self {
            config,
            membership,
            health,
            store,
            dispatcher,
            handler,
            client,
            reply_handler,
            running: AtomicBool::new(false),
            shutdown,
            detector: Mutex::new(Some(detector)),
            failed_rx: Mutex::new(Some(failed_rx)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the background loops.
    pub async fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let mut tasks = self.tasks.lock();

        // Failure detector scan loop.
        if let Some(detector) = self.detector.lock().take() {
            let shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(detector.run(shutdown)));
        }

        // Failure event consumer: reassignment driver.
        if let Some(mut failed_rx) = self.failed_rx.lock().take() {
            let dispatcher = Arc::clone(&self.dispatcher);
            let mut shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        event = failed_rx.recv() => match event {
                            Some(node) => dispatcher.on_peer_failed(&node).await,
                            None => break,
                        },
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
                debug!("failure event consumer stopped");
            }));
        }

        // Heartbeat broadcast loop. The advertised load is recomputed from
        // the conversations currently bound to this node.
        {
            let client = Arc::clone(&self.client);
            let health = Arc::clone(&self.health);
            let store = Arc::clone(&self.store);
            let node_id = self.membership.local_id().clone();
            let specializations = self.config.node.specializations.clone();
            let interval = self.config.health.healthy_interval;
            let mut shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let load = LOAD_PER_CONVERSATION
                                * store.list_by_assignee(&node_id).len() as f64;
                            health.record_local(load, specializations.clone());
                            client.broadcast_heartbeat(load, specializations.clone()).await;
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
                debug!("heartbeat loop stopped");
            }));
        }

        // Anti-entropy: periodically re-push locally originated state so
        // replicas that missed a push converge.
        {
            let store = Arc::clone(&self.store);
            let interval = self.config.replication.sync_interval;
            let mut shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let count = store.resync();
                            if count > 0 {
                                debug!(count, "re-pushed locally originated conversations");
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
                debug!("state sync loop stopped");
            }));
        }

        info!("✅ mailmesh coordinator started");
        Ok(())
    }

    /// Signal shutdown and drain background tasks under a bounded grace
    /// period.
    pub async fn stop(&self) -> Result<()> {
        info!("stopping mailmesh coordinator");
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        let grace = 2 * self.config.cluster.rpc_timeout;
        for mut task in tasks {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!("background task did not stop within grace period, aborting");
                task.abort();
            }
        }

        info!("mailmesh coordinator stopped");
        Ok(())
    }

    /// Coordinate one inbound message event: assign a handler by consensus,
    /// and run the reply path when the decided handler is this node.
    pub async fn handle_event(
        &self,
        message: &InboundMessage,
    ) -> Result<EventOutcome, AssignError> {
        let assigned_node = self.dispatcher.assign_message(message).await?;
        let handled_locally = &assigned_node == self.membership.local_id();

        let reply = if handled_locally {
            match self.reply_handler.handle_assigned(message).await {
                Ok(outcome) => {
                    info!(
                        thread = %message.thread_id,
                        action = %outcome.action,
                        "assigned message handled locally"
                    );
                    Some(outcome)
                }
                Err(err) => {
                    error!(thread = %message.thread_id, error = %err, "reply handler failed");
                    None
                }
            }
        } else {
            debug!(
                thread = %message.thread_id,
                node = %assigned_node,
                "message owned by remote node"
            );
            None
        };

        Ok(EventOutcome {
            assigned_node,
            handled_locally,
            reply,
        })
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            node_id: self.membership.local_id().clone(),
            running: self.running.load(Ordering::SeqCst),
            peers: self.health.snapshot(),
            conversation_count: self.store.len(),
            assignments_by_specialization: self.store.assignments_by_classification(),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        self.membership.local_id()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Handler for the peer RPC endpoints.
    pub fn message_handler(&self) -> Arc<MessageHandler> {
        Arc::clone(&self.handler)
    }

    pub fn conversation(&self, thread_id: &str) -> Option<mailmesh_store::ConversationState> {
        self.store.get(thread_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mailmesh_dispatch::ReplyOutcome;
    use parking_lot::Mutex as PlMutex;
    use serde_json::json;

    struct RecordingReplies {
        threads: PlMutex<Vec<String>>,
    }

    #[async_trait]
    impl ReplyHandler for RecordingReplies {
        async fn handle_assigned(
            &self,
            message: &InboundMessage,
        ) -> anyhow::Result<ReplyOutcome> {
            self.threads.lock().push(message.thread_id.clone());
            Ok(ReplyOutcome {
                response_sent: true,
                action: "recorded".into(),
            })
        }
    }

    fn message(thread: &str, subject: &str, body: &str) -> InboundMessage {
        serde_json::from_value(json!({
            "thread_id": thread,
            "inbox_id": "inbox-1",
            "from": "alice@example.com",
            "subject": subject,
            "text": body,
            "message_id": "m-1",
            "campaign": "spring"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn single_node_assigns_and_replies_locally() {
        let replies = Arc::new(RecordingReplies {
            threads: PlMutex::new(Vec::new()),
        });
        let coordinator = MeshCoordinator::with_handlers(
            MeshConfig::default(),
            Arc::new(KeywordClassifier::new()),
            replies.clone(),
        )
        .unwrap();
        coordinator.start().await.unwrap();

        let outcome = coordinator
            .handle_event(&message("t1", "billing issue", "my invoice is wrong"))
            .await
            .unwrap();

        assert_eq!(outcome.assigned_node, "node-1");
        assert!(outcome.handled_locally);
        assert_eq!(outcome.reply.as_ref().unwrap().action, "recorded");
        assert_eq!(replies.threads.lock().as_slice(), ["t1"]);

        let status = coordinator.status();
        assert!(status.running);
        assert_eq!(status.conversation_count, 1);
        assert_eq!(status.assignments_by_specialization.get("support"), Some(&1));

        coordinator.stop().await.unwrap();
        assert!(!coordinator.is_running());
    }

    #[tokio::test]
    async fn repeated_events_bump_the_version_not_the_count() {
        let coordinator = MeshCoordinator::new(MeshConfig::default()).await.unwrap();
        coordinator.start().await.unwrap();

        coordinator
            .handle_event(&message("t1", "hello", "first"))
            .await
            .unwrap();
        coordinator
            .handle_event(&message("t1", "hello again", "second"))
            .await
            .unwrap();

        let status = coordinator.status();
        assert_eq!(status.conversation_count, 1);

        coordinator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_construction() {
        let mut config = MeshConfig::default();
        config.node.node_id = String::new();
        let err = MeshCoordinator::new(config).await.unwrap_err();
        assert!(err.to_string().contains("node_id"));
    }
}
