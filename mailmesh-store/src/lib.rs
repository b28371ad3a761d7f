//! # Mailmesh Conversation Store
//!
//! In-memory versioned map of conversation thread to handler assignment,
//! plus the best-effort replication layer that pushes fresh bindings to a
//! deterministic replica set. Local writes strictly increase the per-thread
//! version; remote pushes install last-writer-wins by `(version, origin)`.
//! Replication is fire-and-forget: a failed push never fails the assignment
//! that produced it, and convergence comes from later pushes carrying
//! strictly higher versions.

pub mod conversation;
pub mod replication;

pub use conversation::{ConversationState, ConversationStore, MessageContext, RemoteApply};
pub use replication::{select_replicas, Replicator, StatePusher};
