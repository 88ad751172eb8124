//! Trigger and cancellation surfaces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strom_core::{ExecutionId, NodeId};
use strom_flow::ParseError;

/// How an execution was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Triggered interactively by a user.
    Manual,
    /// Triggered by an inbound webhook.
    Webhook,
    /// Triggered by the scheduler subsystem.
    Schedule,
    /// Re-admission of a previously failed execution.
    Retry,
}

/// Why a trigger was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// The definition failed validation; no execution id was allocated.
    Parse(ParseError),
    /// The concurrency cap is reached under `mode = deny`.
    ConcurrentDenied {
        /// Executions currently holding the scope's run slots.
        running: Vec<ExecutionId>,
    },
    /// The scope's trigger queue is at its bound.
    QueueFull,
    /// The flow is disabled in its settings.
    FlowDisabled,
}

impl RejectReason {
    /// Machine-readable code for callers.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse(_) => "PARSE_ERROR",
            Self::ConcurrentDenied { .. } => "CONCURRENT_DENIED",
            Self::QueueFull => "QUEUE_FULL",
            Self::FlowDisabled => "FLOW_DISABLED",
        }
    }
}

/// Outcome of a trigger call.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// The execution was admitted and started.
    Started(ExecutionId),
    /// The execution was enqueued behind the running ones.
    Queued {
        /// Id the execution will run under once drained.
        execution_id: ExecutionId,
        /// 1-based position in the scope's queue.
        position: usize,
    },
    /// The trigger was rejected.
    Rejected(RejectReason),
}

impl TriggerOutcome {
    /// The execution id, when one was allocated.
    #[must_use]
    pub fn execution_id(&self) -> Option<ExecutionId> {
        match self {
            Self::Started(id) => Some(*id),
            Self::Queued { execution_id, .. } => Some(*execution_id),
            Self::Rejected(_) => None,
        }
    }

    /// Returns `true` for the `Started` variant.
    #[must_use]
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

/// A trigger parked in a scope's FIFO queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTrigger {
    /// Id reserved for the queued execution.
    pub execution_id: ExecutionId,
    /// The trigger payload to start with.
    pub payload: serde_json::Value,
    /// When the trigger was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Who triggered it.
    pub triggered_by: String,
    /// How it was triggered.
    pub trigger_type: TriggerType,
}

/// Why an execution was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Cancelled by an explicit cancel call.
    Manual,
    /// Cancelled because the flow timeout expired.
    Timeout,
    /// Cancelled by a `replace`-mode trigger taking over the scope.
    Replaced,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Timeout => write!(f, "timeout"),
            Self::Replaced => write!(f, "replaced"),
        }
    }
}

/// Result of a cancel call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelOutcome {
    /// The cancelled execution.
    pub execution_id: ExecutionId,
    /// `false` when the cancel flag was already set by an earlier call.
    pub newly_cancelled: bool,
    /// Nodes observed `Running` at cancel time; they finish on their
    /// own (or abort cooperatively) before the execution terminates.
    pub running_nodes: Vec<NodeId>,
}
