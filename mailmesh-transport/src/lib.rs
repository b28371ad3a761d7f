//! # Mailmesh Peer Transport
//!
//! Request/response messaging between cluster nodes over plain HTTP. Every
//! message is a self-describing JSON envelope posted to one of the peer's
//! `/internal/*` endpoints; the response body is another envelope. Outbound
//! calls carry a deadline and are never retried here — retry policy belongs
//! to the dispatcher.
//!
//! Consensus calls addressed to the local node bypass the wire and invoke
//! the acceptor registry in-process, under the same locking discipline as a
//! call arriving over HTTP.

pub mod client;
pub mod handler;
pub mod wire;

pub use client::{HttpPeerClient, HttpStatePusher, RpcError};
pub use handler::MessageHandler;
pub use wire::PeerEnvelope;
