//! Acceptor side of the protocol.
//!
//! State is sharded by instance key: each assignment runs as an independent
//! consensus instance with its own promised/accepted register, so deciding
//! one conversation never interferes with another. Entries are mutated only
//! while the map guard for that instance is held, and never across I/O.

use dashmap::DashMap;
use tracing::debug;

use crate::proposal::ProposalId;
use crate::types::{AcceptReply, AcceptedValue, Assignment, PrepareReply};

/// Register of one consensus instance.
///
/// `accepted.id <= promised_id` whenever both are set; an accepted value is
/// only ever replaced under a strictly higher proposal id.
#[derive(Debug, Clone, Default)]
pub struct AcceptorState {
    pub promised_id: Option<ProposalId>,
    pub accepted: Option<AcceptedValue>,
}

/// All acceptor instances hosted by this node, keyed by instance key.
#[derive(Debug, Default)]
pub struct AcceptorRegistry {
    instances: DashMap<String, AcceptorState>,
}

impl AcceptorRegistry {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }

    /// Handle a Prepare: promise iff the proposal is higher than anything
    /// promised so far. The accepted register survives prepare handling.
    pub fn handle_prepare(&self, instance: &str, id: ProposalId) -> PrepareReply {
        let mut state = self.instances.entry(instance.to_owned()).or_default();
        match state.promised_id {
            Some(promised) if id <= promised => {
                debug!(%instance, proposal = %id, %promised, "rejecting prepare below promise");
                PrepareReply::Nack {
                    proposal_id: id,
                    promised_id: promised,
                }
            }
            _ => {
                state.promised_id = Some(id);
                PrepareReply::Promise {
                    proposal_id: id,
                    accepted: state.accepted.clone(),
                }
            }
        }
    }

    /// Handle an Accept: accept iff no higher promise has been made.
    pub fn handle_accept(
        &self,
        instance: &str,
        id: ProposalId,
        value: Assignment,
    ) -> AcceptReply {
        let mut state = self.instances.entry(instance.to_owned()).or_default();
        match state.promised_id {
            Some(promised) if id < promised => {
                debug!(%instance, proposal = %id, %promised, "rejecting accept below promise");
                AcceptReply::Nack {
                    proposal_id: id,
                    promised_id: promised,
                }
            }
            _ => {
                state.promised_id = Some(id);
                state.accepted = Some(AcceptedValue { id, value });
                AcceptReply::Accepted { proposal_id: id }
            }
        }
    }

    /// Snapshot of one instance, for inspection in tests and status dumps.
    pub fn instance(&self, instance: &str) -> Option<AcceptorState> {
        self.instances.get(instance).map(|s| s.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(round: u64, proposer: u32) -> ProposalId {
        ProposalId { round, proposer }
    }

    fn binding(thread: &str, node: &str) -> Assignment {
        Assignment {
            thread_id: thread.to_owned(),
            node: node.to_owned(),
            specialization: "support".to_owned(),
        }
    }

    #[test]
    fn first_prepare_is_promised() {
        let reg = AcceptorRegistry::new();
        let reply = reg.handle_prepare("t1", pid(10, 0));
        assert_eq!(
            reply,
            PrepareReply::Promise {
                proposal_id: pid(10, 0),
                accepted: None,
            }
        );
    }

    #[test]
    fn lower_or_equal_prepare_is_nacked() {
        let reg = AcceptorRegistry::new();
        reg.handle_prepare("t1", pid(10, 1));
        let equal = reg.handle_prepare("t1", pid(10, 1));
        let lower = reg.handle_prepare("t1", pid(9, 2));
        for reply in [equal, lower] {
            assert!(matches!(reply, PrepareReply::Nack { promised_id, .. } if promised_id == pid(10, 1)));
        }
    }

    #[test]
    fn promise_reports_previously_accepted_value() {
        let reg = AcceptorRegistry::new();
        reg.handle_prepare("t1", pid(10, 0));
        reg.handle_accept("t1", pid(10, 0), binding("t1", "node-b"));

        let reply = reg.handle_prepare("t1", pid(20, 1));
        match reply {
            PrepareReply::Promise { accepted: Some(prev), .. } => {
                assert_eq!(prev.id, pid(10, 0));
                assert_eq!(prev.value.node, "node-b");
            }
            other => panic!("expected promise with accepted value, got {other:?}"),
        }
    }

    #[test]
    fn accept_at_promised_id_succeeds() {
        let reg = AcceptorRegistry::new();
        reg.handle_prepare("t1", pid(10, 0));
        let reply = reg.handle_accept("t1", pid(10, 0), binding("t1", "node-a"));
        assert_eq!(reply, AcceptReply::Accepted { proposal_id: pid(10, 0) });
    }

    #[test]
    fn accept_below_promise_is_nacked_and_keeps_register() {
        let reg = AcceptorRegistry::new();
        reg.handle_prepare("t1", pid(10, 0));
        reg.handle_accept("t1", pid(10, 0), binding("t1", "node-a"));
        reg.handle_prepare("t1", pid(30, 1));

        let reply = reg.handle_accept("t1", pid(20, 0), binding("t1", "node-c"));
        assert!(matches!(reply, AcceptReply::Nack { .. }));

        let state = reg.instance("t1").unwrap();
        let accepted = state.accepted.unwrap();
        assert_eq!(accepted.value.node, "node-a");
        assert!(state.promised_id.unwrap() >= accepted.id);
    }

    #[test]
    fn instances_are_independent_per_thread() {
        let reg = AcceptorRegistry::new();
        reg.handle_prepare("t1", pid(50, 0));
        let reply = reg.handle_prepare("t2", pid(1, 0));
        assert!(matches!(reply, PrepareReply::Promise { .. }));
    }
}
