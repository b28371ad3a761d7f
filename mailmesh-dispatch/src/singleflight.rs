//! Per-thread coalescing of assignment attempts.
//!
//! At most one consensus round is in flight per thread on a given node.
//! The first caller becomes the leader and runs the round; later callers
//! subscribe and receive the leader's outcome when it completes.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use mailmesh_consensus::NodeId;

use crate::error::AssignError;

pub type Outcome = Result<NodeId, AssignError>;

/// Role handed to a caller joining a flight.
pub enum Flight {
    /// Run the work, then publish via [`SingleFlight::complete`].
    Leader,
    /// Wait for the leader's outcome.
    Follower(broadcast::Receiver<Outcome>),
}

#[derive(Default)]
pub struct SingleFlight {
    inflight: Mutex<HashMap<String, broadcast::Sender<Outcome>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, key: &str) -> Flight {
        let mut inflight = self.inflight.lock();
        if let Some(tx) = inflight.get(key) {
            Flight::Follower(tx.subscribe())
        } else {
            let (tx, _) = broadcast::channel(1);
            inflight.insert(key.to_owned(), tx);
            Flight::Leader
        }
    }

    /// Close the flight and fan the outcome to every follower.
    pub fn complete(&self, key: &str, outcome: Outcome) {
        let tx = self.inflight.lock().remove(key);
        if let Some(tx) = tx {
            // No followers is fine; the leader already holds the outcome.
            let _ = tx.send(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn followers_receive_the_leader_outcome() {
        let flights = Arc::new(SingleFlight::new());

        assert!(matches!(flights.join("t1"), Flight::Leader));

        let mut followers = Vec::new();
        for _ in 0..3 {
            match flights.join("t1") {
                Flight::Follower(rx) => followers.push(rx),
                Flight::Leader => panic!("flight already has a leader"),
            }
        }

        flights.complete("t1", Ok("node-b".to_string()));
        for mut rx in followers {
            assert_eq!(rx.recv().await.unwrap(), Ok("node-b".to_string()));
        }
    }

    #[tokio::test]
    async fn completed_flight_allows_a_new_leader() {
        let flights = SingleFlight::new();
        assert!(matches!(flights.join("t1"), Flight::Leader));
        flights.complete("t1", Ok("node-a".to_string()));
        assert!(matches!(flights.join("t1"), Flight::Leader));
    }

    #[tokio::test]
    async fn flights_are_independent_per_key() {
        let flights = SingleFlight::new();
        assert!(matches!(flights.join("t1"), Flight::Leader));
        assert!(matches!(flights.join("t2"), Flight::Leader));
    }

    #[tokio::test]
    async fn follower_unblocks_when_leader_finishes_later() {
        let flights = Arc::new(SingleFlight::new());
        assert!(matches!(flights.join("t1"), Flight::Leader));

        let follower = match flights.join("t1") {
            Flight::Follower(rx) => rx,
            Flight::Leader => panic!("expected follower"),
        };

        let flights_bg = Arc::clone(&flights);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flights_bg.complete(
                "t1",
                Err(AssignError::NoEligibleCandidate {
                    specialization: "sales".into(),
                }),
            );
        });

        let mut follower = follower;
        let outcome = follower.recv().await.unwrap();
        assert!(matches!(outcome, Err(AssignError::NoEligibleCandidate { .. })));
    }
}
