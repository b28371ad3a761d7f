use thiserror::Error;

/// Why an assignment could not be made.
///
/// Cloneable so the single-flight table can fan one outcome back to every
/// coalesced caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssignError {
    /// No healthy node advertises the required specialization. The event is
    /// dropped from the coordination path; handling it is the inbound
    /// transport's concern.
    #[error("no eligible candidate for specialization {specialization}")]
    NoEligibleCandidate { specialization: String },

    /// Consensus could not gather a quorum within the retry budget.
    #[error("consensus unavailable for thread {thread_id} after {attempts} attempts")]
    ConsensusUnavailable { thread_id: String, attempts: u32 },
}
