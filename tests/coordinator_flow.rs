//! End-to-end flow on a single-node cluster: inbound event through
//! classification, consensus (loopback), store, and the local reply path.

use std::sync::Arc;

use mailmesh_core::{MeshConfig, MeshCoordinator};
use mailmesh_dispatch::InboundMessage;
use serde_json::json;

fn event(thread: &str, subject: &str, body: &str) -> InboundMessage {
    serde_json::from_value(json!({
        "thread_id": thread,
        "inbox_id": "inbox-1",
        "from": "customer@example.com",
        "subject": subject,
        "text": body,
        "message_id": "m-1"
    }))
    .unwrap()
}

#[tokio::test]
async fn inbound_events_flow_through_assignment_and_reply() {
    let coordinator = Arc::new(MeshCoordinator::new(MeshConfig::default()).await.unwrap());
    coordinator.start().await.unwrap();

    // Billing content routes to support; the single node owns everything.
    let outcome = coordinator
        .handle_event(&event("t-billing", "Invoice dispute", "charge on my invoice is wrong"))
        .await
        .unwrap();
    assert_eq!(outcome.assigned_node, "node-1");
    assert!(outcome.handled_locally);
    let reply = outcome.reply.expect("local assignment must run the reply path");
    assert_eq!(reply.action, "auto_response_sent");

    // Sales content lands in its own bucket.
    coordinator
        .handle_event(&event("t-sales", "Demo please", "we want a demo and pricing"))
        .await
        .unwrap();

    let status = coordinator.status();
    assert!(status.running);
    assert_eq!(status.conversation_count, 2);
    assert_eq!(status.assignments_by_specialization.get("support"), Some(&1));
    assert_eq!(status.assignments_by_specialization.get("sales"), Some(&1));

    let state = coordinator.conversation("t-billing").unwrap();
    assert_eq!(state.version, 1);
    assert_eq!(state.origin, "node-1");
    assert!(state.replicas.contains("node-1"));

    coordinator.stop().await.unwrap();
    assert!(!coordinator.is_running());
}

#[tokio::test]
async fn followup_messages_reuse_the_thread() {
    let coordinator = Arc::new(MeshCoordinator::new(MeshConfig::default()).await.unwrap());
    coordinator.start().await.unwrap();

    coordinator
        .handle_event(&event("t1", "question", "first message"))
        .await
        .unwrap();
    coordinator
        .handle_event(&event("t1", "re: question", "second message"))
        .await
        .unwrap();

    assert_eq!(coordinator.status().conversation_count, 1);
    assert_eq!(coordinator.conversation("t1").unwrap().version, 2);

    coordinator.stop().await.unwrap();
}

#[tokio::test]
async fn escalation_keywords_suppress_the_auto_response() {
    let coordinator = Arc::new(MeshCoordinator::new(MeshConfig::default()).await.unwrap());
    coordinator.start().await.unwrap();

    let outcome = coordinator
        .handle_event(&event("t-hot", "URGENT outage", "everything is down"))
        .await
        .unwrap();
    let reply = outcome.reply.unwrap();
    assert!(!reply.response_sent);
    assert_eq!(reply.action, "escalated_to_human");

    coordinator.stop().await.unwrap();
}
