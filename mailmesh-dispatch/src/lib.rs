//! # Mailmesh Assignment Dispatcher
//!
//! Ties the coordination fabric together: classify an inbound message, pick
//! the least-loaded healthy node advertising the required specialization,
//! drive a consensus round on the binding, and record the decided value in
//! the conversation store. Whatever consensus decides wins, even when it is
//! not the local pick.
//!
//! Assignment attempts are serialized per thread through a single-flight
//! table: concurrent callers for the same thread coalesce onto one consensus
//! round and all observe the same decided value. When the failure detector
//! reports a dead peer, every conversation bound to it is re-dispatched the
//! same way, preserving the original classification.

pub mod dispatcher;
pub mod error;
pub mod singleflight;
pub mod types;

pub use dispatcher::{DispatchConfig, Dispatcher};
pub use error::AssignError;
pub use singleflight::{Flight, SingleFlight};
pub use types::{Classifier, InboundMessage, ReplyHandler, ReplyOutcome};
