//! Prometheus counters for the HTTP surface.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec, register_int_gauge, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref WEBHOOK_EVENTS: IntCounterVec = register_int_counter_vec!(
        "mailmesh_webhook_events_total",
        "Inbound webhook events by type and outcome",
        &["event_type", "status"]
    )
    .unwrap();
    pub static ref ASSIGNMENTS: IntCounterVec = register_int_counter_vec!(
        "mailmesh_assignments_total",
        "Conversation assignments decided, by handler node and specialization",
        &["node", "specialization"]
    )
    .unwrap();
    pub static ref CONSENSUS_ROUNDS: IntCounterVec = register_int_counter_vec!(
        "mailmesh_consensus_rounds_total",
        "Assignment consensus outcomes observed at the webhook entry point",
        &["result"]
    )
    .unwrap();
    pub static ref ACTIVE_CONVERSATIONS: IntGauge = register_int_gauge!(
        "mailmesh_active_conversations",
        "Conversations currently known to this node"
    )
    .unwrap();
}

pub fn render() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&prometheus::gather())
        .unwrap_or_default()
}
