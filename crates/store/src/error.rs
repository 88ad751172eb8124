//! Store error types.

use strom_core::{ExecutionId, NodeId};
use strom_execution::InvalidTransition;

/// Errors surfaced by a state-store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached; the operation may be retried.
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    /// A status CAS requested a transition the state machine forbids.
    ///
    /// This is a caller bug, caught before the compare is attempted.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// No records exist for the execution (never initialised or expired).
    #[error("unknown execution: {0}")]
    UnknownExecution(ExecutionId),

    /// The execution exists but holds no record for the node.
    #[error("unknown node {node} in execution {execution_id}")]
    UnknownNode {
        /// The execution addressed.
        execution_id: ExecutionId,
        /// The missing node.
        node: NodeId,
    },

    /// A blob reference points at a missing blob key.
    #[error("missing blob: {0}")]
    MissingBlob(String),

    /// A stored record failed to (de)serialize.
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns `true` for errors worth retrying with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
