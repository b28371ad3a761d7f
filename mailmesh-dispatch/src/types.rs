//! Inbound event shape and the injectable seams around the dispatcher.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A message event as delivered by the inbound mail transport.
///
/// Only `thread_id`, `sender`, `subject`, and `body` feed the coordination
/// path; everything else rides along opaquely in `extra` and is preserved in
/// the stored conversation context for downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub thread_id: String,
    #[serde(default)]
    pub inbox_id: String,
    #[serde(alias = "from", alias = "from_")]
    pub sender: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default, alias = "text")]
    pub body: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl InboundMessage {
    /// Subject and body combined, the way the classifier consumes them.
    pub fn content(&self) -> String {
        format!("{}\n{}", self.subject, self.body)
    }
}

/// Labels a message with the specialization required to handle it.
///
/// Deterministic within one call; the dispatcher treats it as a pure
/// function.
pub trait Classifier: Send + Sync {
    fn classify(&self, content: &str, sender: &str) -> String;
}

/// What the reply path did with a message, as far as the coordinator cares.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyOutcome {
    pub response_sent: bool,
    pub action: String,
}

/// Downstream reply path, invoked only on the node that owns the decided
/// assignment. The coordinator logs the outcome and nothing more.
#[async_trait]
pub trait ReplyHandler: Send + Sync {
    async fn handle_assigned(&self, message: &InboundMessage) -> anyhow::Result<ReplyOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_are_preserved() {
        let raw = serde_json::json!({
            "thread_id": "t1",
            "inbox_id": "inbox-1",
            "from": "alice@example.com",
            "subject": "billing question",
            "text": "please help",
            "message_id": "m-1",
            "labels": ["vip"],
            "priority": 3
        });
        let message: InboundMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(message.sender, "alice@example.com");
        assert_eq!(message.body, "please help");
        assert_eq!(message.extra["labels"][0], "vip");
        assert_eq!(message.extra["priority"], 3);
    }

    #[test]
    fn missing_optional_fields_default() {
        let raw = serde_json::json!({
            "thread_id": "t2",
            "sender": "bob@example.com"
        });
        let message: InboundMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(message.subject, "");
        assert_eq!(message.body, "");
        assert_eq!(message.content(), "\n");
    }
}
