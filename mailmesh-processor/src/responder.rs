//! Template-based auto-responses for messages this node owns.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use mailmesh_dispatch::{Classifier, InboundMessage, ReplyHandler, ReplyOutcome};

use crate::classify::KeywordClassifier;

/// Messages containing these are never auto-answered; they are flagged for a
/// human instead.
const ESCALATION_KEYWORDS: &[&str] = &["urgent", "critical", "down", "not working"];

/// Outbound delivery seam. The coordinator never talks to a mail API
/// directly.
#[async_trait]
pub trait OutboundMailer: Send + Sync {
    async fn send_reply(
        &self,
        inbox_id: &str,
        thread_id: &str,
        to: &str,
        body: &str,
    ) -> anyhow::Result<()>;
}

/// Default mailer: logs the reply instead of sending it.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl OutboundMailer for LogMailer {
    async fn send_reply(
        &self,
        inbox_id: &str,
        thread_id: &str,
        to: &str,
        body: &str,
    ) -> anyhow::Result<()> {
        info!(%inbox_id, %thread_id, %to, chars = body.len(), "outbound reply (log only)");
        Ok(())
    }
}

/// Answers assigned messages with a per-specialization template, escalating
/// anything that looks too hot to auto-answer.
pub struct TemplateResponder {
    classifier: KeywordClassifier,
    mailer: Arc<dyn OutboundMailer>,
}

impl TemplateResponder {
    pub fn new(mailer: Arc<dyn OutboundMailer>) -> Self {
        Self {
            classifier: KeywordClassifier::new(),
            mailer,
        }
    }

    fn needs_escalation(content: &str) -> bool {
        let content = content.to_lowercase();
        ESCALATION_KEYWORDS.iter().any(|kw| content.contains(kw))
    }

    fn render_reply(specialization: &str, subject: &str) -> String {
        match specialization {
            "support" => format!(
                "Hi,\n\nThank you for contacting our support team regarding '{subject}'. \
                 I've received your message and our team will review your request shortly.\n\n\
                 We typically respond to support inquiries within 2-4 hours during business hours.\n\n\
                 Best regards,\nSupport"
            ),
            "sales" => format!(
                "Hi,\n\nThank you for your interest in our services! I've received your inquiry \
                 about '{subject}' and our sales team will be in touch within 24 hours.\n\n\
                 Best regards,\nSales"
            ),
            _ => format!(
                "Hi,\n\nThank you for your message regarding '{subject}'. I've received your \
                 inquiry and will make sure it gets to the right team.\n\n\
                 You can expect a response within 1-2 business days.\n\n\
                 Best regards,\nThe Team"
            ),
        }
    }
}

#[async_trait]
impl ReplyHandler for TemplateResponder {
    async fn handle_assigned(&self, message: &InboundMessage) -> anyhow::Result<ReplyOutcome> {
        let content = message.content();

        if Self::needs_escalation(&content) {
            warn!(
                thread = %message.thread_id,
                sender = %message.sender,
                "message escalated to a human"
            );
            return Ok(ReplyOutcome {
                response_sent: false,
                action: "escalated_to_human".to_owned(),
            });
        }

        let specialization = self.classifier.classify(&content, &message.sender);
        let body = Self::render_reply(&specialization, &message.subject);
        self.mailer
            .send_reply(&message.inbox_id, &message.thread_id, &message.sender, &body)
            .await?;

        info!(
            thread = %message.thread_id,
            %specialization,
            "auto-response sent"
        );
        Ok(ReplyOutcome {
            response_sent: true,
            action: "auto_response_sent".to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl OutboundMailer for Recording {
        async fn send_reply(
            &self,
            _inbox_id: &str,
            thread_id: &str,
            _to: &str,
            body: &str,
        ) -> anyhow::Result<()> {
            self.sent.lock().push((thread_id.to_owned(), body.to_owned()));
            Ok(())
        }
    }

    fn message(subject: &str, body: &str) -> InboundMessage {
        InboundMessage {
            thread_id: "t1".into(),
            inbox_id: "inbox-1".into(),
            sender: "alice@example.com".into(),
            subject: subject.into(),
            body: body.into(),
            message_id: "m-1".into(),
            extra: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn support_messages_get_a_support_reply() {
        let mailer = Arc::new(Recording::default());
        let responder = TemplateResponder::new(mailer.clone());

        let outcome = responder
            .handle_assigned(&message("Invoice problem", "my invoice looks wrong"))
            .await
            .unwrap();
        assert!(outcome.response_sent);
        assert_eq!(outcome.action, "auto_response_sent");

        let sent = mailer.sent.lock();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("support team"));
        assert!(sent[0].1.contains("Invoice problem"));
    }

    #[tokio::test]
    async fn sales_messages_get_a_sales_reply() {
        let mailer = Arc::new(Recording::default());
        let responder = TemplateResponder::new(mailer.clone());

        responder
            .handle_assigned(&message("Demo request", "we would like a demo"))
            .await
            .unwrap();
        assert!(mailer.sent.lock()[0].1.contains("sales team"));
    }

    #[tokio::test]
    async fn hot_messages_are_escalated_not_answered() {
        let mailer = Arc::new(Recording::default());
        let responder = TemplateResponder::new(mailer.clone());

        let outcome = responder
            .handle_assigned(&message("URGENT: production down", "everything is down"))
            .await
            .unwrap();
        assert!(!outcome.response_sent);
        assert_eq!(outcome.action, "escalated_to_human");
        assert!(mailer.sent.lock().is_empty());
    }
}
