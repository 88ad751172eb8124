//! Per-node run state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strom_core::NodeId;

/// Status of one node within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Waiting for upstream dependencies.
    Pending,
    /// All dependencies satisfied; eligible to launch.
    Ready,
    /// Handed to a handler on some engine replica.
    Running,
    /// Handler finished successfully.
    Completed,
    /// Handler failed (after exhausting retries).
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
    /// Never ran: an upstream failed or was cancelled with no recovery
    /// path through this node.
    Skipped,
}

impl NodeStatus {
    /// Returns `true` once the node has reached a final state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Skipped
        )
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Error recorded on a failed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeError {
    /// Machine-readable code (see `strom_handler::codes`).
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl NodeError {
    /// Build a node error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// The run record of one node within one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRunState {
    /// The node this record belongs to.
    pub node_id: NodeId,
    /// Current status.
    pub status: NodeStatus,
    /// When the current attempt started running.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the node reached a terminal state.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration of the final attempt.
    #[serde(default, with = "crate::serde_millis_opt")]
    pub duration: Option<Duration>,
    /// Number of retries performed so far (0 on the first attempt).
    #[serde(default)]
    pub retry_count: u32,
    /// Identifier of the engine replica that launched the node.
    #[serde(default)]
    pub worker_id: Option<String>,
    /// Error recorded when the node failed.
    #[serde(default)]
    pub error: Option<NodeError>,
    /// Set when this node failed but its error route was taken; such a
    /// failure does not force the execution to fail.
    #[serde(default)]
    pub error_routed: bool,
}

impl NodeRunState {
    /// A fresh record in the given initial status.
    #[must_use]
    pub fn new(node_id: NodeId, status: NodeStatus) -> Self {
        Self {
            node_id,
            status,
            started_at: None,
            completed_at: None,
            duration: None,
            retry_count: 0,
            worker_id: None,
            error: None,
            error_routed: false,
        }
    }

    /// The attempt number of the next launch (1-based).
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }
}
