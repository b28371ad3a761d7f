//! # Mailmesh HTTP Surface
//!
//! One axum server per node carrying three kinds of traffic:
//!
//! - the inbound webhook that feeds message events into the dispatcher
//! - the peer RPC endpoints (`/internal/consensus`, `/internal/heartbeat`,
//!   `/internal/sync`) that terminate in the in-process message handler
//! - the observation endpoints: `/status`, `/health`, `/metrics`
//!
//! Handlers take the coordinator as shared state; nothing here holds
//! coordination state of its own.

pub mod metrics;
pub mod rest;

pub use rest::ApiServer;
