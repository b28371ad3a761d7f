//! Proposal identifiers: totally ordered across the cluster, monotonic per
//! node even when the wall clock misbehaves.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Totally ordered proposal identifier.
///
/// `round` starts from a wall-clock millisecond reading and `proposer` is the
/// node's rank in the static membership order, so any two proposals generated
/// anywhere in the cluster compare strictly. Derived ordering is
/// lexicographic on `(round, proposer)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ProposalId {
    pub round: u64,
    pub proposer: u32,
}

impl std::fmt::Display for ProposalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.round, self.proposer)
    }
}

/// Issues strictly increasing proposal ids for one node.
///
/// The last issued id is cached; when the clock reads the same millisecond
/// twice or steps backwards, the next id bumps past the cached round instead
/// of reusing or regressing it.
pub struct ProposalIdGenerator {
    proposer: u32,
    last: Mutex<Option<ProposalId>>,
}

impl ProposalIdGenerator {
    /// `proposer` is this node's rank in the ordered membership list.
    pub fn new(proposer: u32) -> Self {
        Self {
            proposer,
            last: Mutex::new(None),
        }
    }

    /// Issue the next proposal id from the current wall clock.
    pub fn next(&self) -> ProposalId {
        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        self.next_at(now_ms)
    }

    /// Issue the next proposal id for an explicit clock reading.
    pub fn next_at(&self, now_ms: u64) -> ProposalId {
        let mut last = self.last.lock();
        let mut id = ProposalId {
            round: now_ms,
            proposer: self.proposer,
        };
        if let Some(prev) = *last {
            if id <= prev {
                id.round = prev.round + 1;
            }
        }
        *last = Some(id);
        id
    }
}
