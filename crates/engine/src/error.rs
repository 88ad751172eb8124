//! Engine error types.

use strom_core::ExecutionId;
use strom_execution::ExecutionStatus;
use strom_store::StoreError;

/// Errors surfaced by scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No execution exists under the id.
    #[error("unknown execution: {0}")]
    UnknownExecution(ExecutionId),

    /// Retry was requested for an execution that is not in `Failed`.
    #[error("execution {execution_id} is {status}, only failed executions can be retried")]
    NotRetryable {
        /// The addressed execution.
        execution_id: ExecutionId,
        /// Its current status.
        status: ExecutionStatus,
    },

    /// A store operation failed beyond the retry budget.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Stored records contradict each other.
    #[error("corrupt execution state: {0}")]
    Corrupt(String),
}
