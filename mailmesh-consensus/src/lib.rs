//! # Mailmesh Consensus Engine
//!
//! Single-decree Paxos for agreeing on conversation assignments across the
//! cluster. Every conversation thread gets its own consensus instance: the
//! acceptor side shards its state by thread id, and the proposer side runs
//! one two-phase round (Prepare/Promise, Accept/Accepted) per assignment
//! attempt.
//!
//! ## Safety and liveness
//!
//! At most one value is ever chosen per instance; any value returned by a
//! successful [`ProposalEngine::propose`] call was chosen. Liveness is not
//! guaranteed under dueling proposers — the dispatcher serializes attempts
//! per thread and retries with backoff on contention.
//!
//! ## Wiring
//!
//! The proposer talks to peers through the [`ProposerTransport`] trait so the
//! engine stays independent of the HTTP plumbing; the acceptor side is a
//! plain registry that message handlers call into. A call addressed to the
//! local node should short-circuit into the registry without touching the
//! wire.

pub mod acceptor;
pub mod engine;
pub mod proposal;
pub mod types;

pub use acceptor::{AcceptorRegistry, AcceptorState};
pub use engine::{ConsensusError, ProposalEngine, ProposerTransport};
pub use proposal::{ProposalId, ProposalIdGenerator};
pub use types::{AcceptReply, AcceptedValue, Assignment, NodeId, PrepareReply};
