//! Route handlers and server lifecycle.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use mailmesh_core::MeshCoordinator;
use mailmesh_dispatch::{AssignError, InboundMessage};
use mailmesh_transport::PeerEnvelope;

use crate::metrics;

#[derive(Clone)]
struct AppState {
    coordinator: Arc<MeshCoordinator>,
}

/// Inbound webhook payload. Event types other than `message.received` are
/// acknowledged and counted but never enter the coordination path.
#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(default, alias = "type")]
    event_type: String,
    message: Option<InboundMessage>,
}

/// The node's HTTP server.
pub struct ApiServer {
    coordinator: Arc<MeshCoordinator>,
    shutdown: watch::Sender<bool>,
}

impl ApiServer {
    pub fn new(coordinator: Arc<MeshCoordinator>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            coordinator,
            shutdown,
        }
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            coordinator: Arc::clone(&self.coordinator),
        };
        Router::new()
            .route("/webhook/message", post(handle_webhook))
            .route("/internal/consensus", post(handle_peer_message))
            .route("/internal/heartbeat", post(handle_peer_message))
            .route("/internal/sync", post(handle_peer_message))
            .route("/status", get(get_status))
            .route("/health", get(health_check))
            .route("/metrics", get(get_metrics))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind and serve in the background until [`ApiServer::stop`].
    pub async fn start(&self) -> Result<()> {
        let config = self.coordinator.config();
        let addr = format!("{}:{}", config.node.bind_address, config.node.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("🌐 mailmesh API listening on {addr}");

        let app = self.router();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            });
            if let Err(err) = serve.await {
                warn!(error = %err, "API server error");
            }
        });
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn handle_webhook(
    State(state): State<AppState>,
    Json(event): Json<WebhookEvent>,
) -> (StatusCode, Json<Value>) {
    let event_type = if event.event_type.is_empty() {
        "unknown".to_string()
    } else {
        event.event_type.clone()
    };

    if event_type != "message.received" {
        metrics::WEBHOOK_EVENTS
            .with_label_values(&[event_type.as_str(), "ignored"])
            .inc();
        return (StatusCode::OK, Json(json!({ "status": "ignored" })));
    }

    let Some(message) = event.message else {
        metrics::WEBHOOK_EVENTS
            .with_label_values(&[event_type.as_str(), "invalid"])
            .inc();
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "message.received event without message" })),
        );
    };

    match state.coordinator.handle_event(&message).await {
        Ok(outcome) => {
            metrics::WEBHOOK_EVENTS
                .with_label_values(&[event_type.as_str(), "ok"])
                .inc();
            metrics::CONSENSUS_ROUNDS.with_label_values(&["decided"]).inc();
            let specialization = state
                .coordinator
                .conversation(&message.thread_id)
                .map(|s| s.context.classification)
                .unwrap_or_else(|| "unknown".to_string());
            metrics::ASSIGNMENTS
                .with_label_values(&[outcome.assigned_node.as_str(), specialization.as_str()])
                .inc();
            metrics::ACTIVE_CONVERSATIONS.set(state.coordinator.status().conversation_count as i64);

            (
                StatusCode::OK,
                Json(json!({
                    "status": "assigned",
                    "assigned_node": outcome.assigned_node,
                    "handled_locally": outcome.handled_locally,
                    "reply_action": outcome.reply.map(|r| r.action),
                })),
            )
        }
        Err(err @ AssignError::NoEligibleCandidate { .. }) => {
            metrics::WEBHOOK_EVENTS
                .with_label_values(&[event_type.as_str(), "no_candidate"])
                .inc();
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": err.to_string() })),
            )
        }
        Err(err @ AssignError::ConsensusUnavailable { .. }) => {
            metrics::WEBHOOK_EVENTS
                .with_label_values(&[event_type.as_str(), "consensus_unavailable"])
                .inc();
            metrics::CONSENSUS_ROUNDS.with_label_values(&["failed"]).inc();
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": err.to_string() })),
            )
        }
    }
}

/// All three peer endpoints share one handler: decode the envelope, run it
/// through the in-process message handler, return the reply envelope.
async fn handle_peer_message(
    State(state): State<AppState>,
    Json(envelope): Json<PeerEnvelope>,
) -> Json<PeerEnvelope> {
    Json(state.coordinator.message_handler().handle(envelope))
}

async fn get_status(State(state): State<AppState>) -> Json<Value> {
    let status = state.coordinator.status();
    metrics::ACTIVE_CONVERSATIONS.set(status.conversation_count as i64);
    Json(serde_json::to_value(&status).unwrap_or_else(|_| json!({})))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "node_id": state.coordinator.node_id(),
        "running": state.coordinator.is_running(),
    }))
}

async fn get_metrics(State(state): State<AppState>) -> String {
    metrics::ACTIVE_CONVERSATIONS.set(state.coordinator.status().conversation_count as i64);
    metrics::render()
}
