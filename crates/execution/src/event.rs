//! Lifecycle events published on the event bus.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strom_core::{ExecutionId, NodeId};

use crate::node::NodeError;
use crate::trigger::CancelReason;

/// Discriminant of an [`ExecutionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// The execution was admitted and its roots scheduled.
    ExecutionStarted,
    /// A node attempt was launched.
    NodeStarted,
    /// A node completed successfully.
    NodeCompleted,
    /// A node failed after exhausting retries.
    NodeFailed,
    /// A node was cancelled.
    NodeCancelled,
    /// The execution completed.
    ExecutionCompleted,
    /// The execution failed.
    ExecutionFailed,
    /// The execution was cancelled.
    ExecutionCancelled,
    /// The subscriber's buffer overflowed; events were dropped.
    Lag,
}

/// Event-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    /// The execution was admitted and its roots scheduled.
    ExecutionStarted,
    /// A node attempt was launched (`attempt` is 1-based).
    NodeStarted {
        /// The launched node.
        node: NodeId,
        /// 1-based attempt number.
        attempt: u32,
    },
    /// A node completed successfully.
    NodeCompleted {
        /// The completed node.
        node: NodeId,
        /// Wall-clock duration of the final attempt.
        #[serde(default, with = "crate::serde_millis_opt")]
        duration: Option<Duration>,
    },
    /// A node failed after exhausting retries.
    NodeFailed {
        /// The failed node.
        node: NodeId,
        /// The recorded error.
        error: NodeError,
    },
    /// A node was cancelled.
    NodeCancelled {
        /// The cancelled node.
        node: NodeId,
    },
    /// The execution completed.
    ExecutionCompleted,
    /// The execution failed.
    ExecutionFailed,
    /// The execution was cancelled.
    ExecutionCancelled {
        /// Why it was cancelled.
        reason: CancelReason,
    },
    /// The subscriber's buffer overflowed; `missed` events were dropped.
    /// Refetch a snapshot and resume.
    Lag {
        /// Number of dropped events.
        missed: u64,
    },
}

/// One lifecycle event of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// The execution this event belongs to.
    pub execution_id: ExecutionId,
    /// When the event was published.
    pub at: DateTime<Utc>,
    /// What happened.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl ExecutionEvent {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn now(execution_id: ExecutionId, payload: EventPayload) -> Self {
        Self {
            execution_id,
            at: Utc::now(),
            payload,
        }
    }

    /// The event's discriminant.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::ExecutionStarted => EventKind::ExecutionStarted,
            EventPayload::NodeStarted { .. } => EventKind::NodeStarted,
            EventPayload::NodeCompleted { .. } => EventKind::NodeCompleted,
            EventPayload::NodeFailed { .. } => EventKind::NodeFailed,
            EventPayload::NodeCancelled { .. } => EventKind::NodeCancelled,
            EventPayload::ExecutionCompleted => EventKind::ExecutionCompleted,
            EventPayload::ExecutionFailed => EventKind::ExecutionFailed,
            EventPayload::ExecutionCancelled { .. } => EventKind::ExecutionCancelled,
            EventPayload::Lag { .. } => EventKind::Lag,
        }
    }

    /// Returns `true` for the three execution-terminal kinds; the topic
    /// closes after one of these.
    #[must_use]
    pub fn is_execution_terminal(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::ExecutionCompleted | EventKind::ExecutionFailed | EventKind::ExecutionCancelled
        )
    }

    /// The node this event concerns, if it is node-scoped.
    #[must_use]
    pub fn node(&self) -> Option<&NodeId> {
        match &self.payload {
            EventPayload::NodeStarted { node, .. }
            | EventPayload::NodeCompleted { node, .. }
            | EventPayload::NodeFailed { node, .. }
            | EventPayload::NodeCancelled { node } => Some(node),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn event(payload: EventPayload) -> ExecutionEvent {
        ExecutionEvent::now(ExecutionId::new(), payload)
    }

    #[test]
    fn kind_mapping() {
        assert_eq!(
            event(EventPayload::ExecutionStarted).kind(),
            EventKind::ExecutionStarted
        );
        assert_eq!(
            event(EventPayload::NodeStarted {
                node: NodeId::from("a"),
                attempt: 1
            })
            .kind(),
            EventKind::NodeStarted
        );
        assert_eq!(event(EventPayload::Lag { missed: 3 }).kind(), EventKind::Lag);
    }

    #[test]
    fn terminal_kinds() {
        assert!(event(EventPayload::ExecutionCompleted).is_execution_terminal());
        assert!(event(EventPayload::ExecutionFailed).is_execution_terminal());
        assert!(
            event(EventPayload::ExecutionCancelled {
                reason: CancelReason::Manual
            })
            .is_execution_terminal()
        );
        assert!(!event(EventPayload::ExecutionStarted).is_execution_terminal());
        assert!(!event(EventPayload::Lag { missed: 1 }).is_execution_terminal());
    }

    #[test]
    fn node_accessor() {
        let e = event(EventPayload::NodeCompleted {
            node: NodeId::from("b"),
            duration: Some(Duration::from_millis(7)),
        });
        assert_eq!(e.node(), Some(&NodeId::from("b")));
        assert_eq!(event(EventPayload::ExecutionCompleted).node(), None);
    }

    #[test]
    fn serde_tags_kind() {
        let e = event(EventPayload::NodeFailed {
            node: NodeId::from("x"),
            error: NodeError::new("NODE_TIMEOUT", "deadline"),
        });
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "NODE_FAILED");
        assert_eq!(json["node"], "x");

        let back: ExecutionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), EventKind::NodeFailed);
    }
}
