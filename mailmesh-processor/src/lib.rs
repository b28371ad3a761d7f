//! # Mailmesh Message Processor
//!
//! Default implementations of the dispatcher's injectable seams: a keyword
//! classifier that routes messages to a specialization, and a template
//! responder that answers messages assigned to this node. Outbound delivery
//! goes through the [`OutboundMailer`] trait; the default mailer only logs,
//! keeping real mail APIs out of the coordination core.

pub mod classify;
pub mod responder;

pub use classify::KeywordClassifier;
pub use responder::{LogMailer, OutboundMailer, TemplateResponder};
