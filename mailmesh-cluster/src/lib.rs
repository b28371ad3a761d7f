//! # Mailmesh Cluster Membership and Liveness
//!
//! The cluster roster is a static ordered list of `(node id, address)` pairs
//! known to every node at startup; quorum size is derived from it and never
//! changes at runtime. On top of the roster sits the peer health table and
//! the heartbeat failure detector: heartbeat ingress refreshes a peer's
//! entry, a periodic scan drives the `HEALTHY ⇄ SUSPECTED → FAILED →
//! RECOVERING → HEALTHY` state machine, and each transition into `FAILED`
//! emits exactly one event for the dispatcher to act on.

pub mod health;
pub mod membership;

pub use health::{FailureDetector, PeerHealth, PeerHealthTable, PeerStatus};
pub use membership::{ClusterMembership, ClusterPeer, MembershipError};
