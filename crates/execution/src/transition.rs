//! State machine transition validation for execution and node statuses.

use crate::node::NodeStatus;
use crate::status::ExecutionStatus;

/// A state transition rejected by the tables below.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    /// Current status.
    pub from: String,
    /// Attempted target status.
    pub to: String,
}

/// Returns `true` if the execution-level transition is legal.
#[must_use]
pub fn can_transition_execution(from: ExecutionStatus, to: ExecutionStatus) -> bool {
    matches!(
        (from, to),
        (ExecutionStatus::Pending, ExecutionStatus::Running)
            | (ExecutionStatus::Running, ExecutionStatus::Cancelling)
            | (ExecutionStatus::Running, ExecutionStatus::Completed)
            | (ExecutionStatus::Running, ExecutionStatus::Failed)
            | (ExecutionStatus::Running, ExecutionStatus::Cancelled)
            | (ExecutionStatus::Cancelling, ExecutionStatus::Cancelled)
            | (ExecutionStatus::Cancelling, ExecutionStatus::Completed)
            | (ExecutionStatus::Cancelling, ExecutionStatus::Failed)
            // retry re-admission of a failed execution
            | (ExecutionStatus::Failed, ExecutionStatus::Running)
    )
}

/// Validate an execution-level transition.
pub fn validate_execution_transition(
    from: ExecutionStatus,
    to: ExecutionStatus,
) -> Result<(), InvalidTransition> {
    if can_transition_execution(from, to) {
        Ok(())
    } else {
        Err(InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Returns `true` if the node-level transition is legal.
#[must_use]
pub fn can_transition_node(from: NodeStatus, to: NodeStatus) -> bool {
    matches!(
        (from, to),
        (NodeStatus::Pending, NodeStatus::Ready)
            | (NodeStatus::Pending, NodeStatus::Skipped)
            | (NodeStatus::Pending, NodeStatus::Cancelled)
            | (NodeStatus::Ready, NodeStatus::Running)
            | (NodeStatus::Ready, NodeStatus::Skipped)
            | (NodeStatus::Ready, NodeStatus::Cancelled)
            | (NodeStatus::Running, NodeStatus::Completed)
            | (NodeStatus::Running, NodeStatus::Failed)
            | (NodeStatus::Running, NodeStatus::Cancelled)
            // crash recovery re-readies a stale running node
            | (NodeStatus::Running, NodeStatus::Ready)
            // retry of a failed execution
            | (NodeStatus::Failed, NodeStatus::Ready)
            | (NodeStatus::Skipped, NodeStatus::Pending)
    )
}

/// Validate a node-level transition.
pub fn validate_node_transition(from: NodeStatus, to: NodeStatus) -> Result<(), InvalidTransition> {
    if can_transition_node(from, to) {
        Ok(())
    } else {
        Err(InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ExecutionStatus::Pending, ExecutionStatus::Running)]
    #[case(ExecutionStatus::Running, ExecutionStatus::Completed)]
    #[case(ExecutionStatus::Running, ExecutionStatus::Failed)]
    #[case(ExecutionStatus::Running, ExecutionStatus::Cancelling)]
    #[case(ExecutionStatus::Cancelling, ExecutionStatus::Cancelled)]
    #[case(ExecutionStatus::Cancelling, ExecutionStatus::Completed)]
    #[case(ExecutionStatus::Failed, ExecutionStatus::Running)]
    fn valid_execution_transitions(#[case] from: ExecutionStatus, #[case] to: ExecutionStatus) {
        assert!(can_transition_execution(from, to));
    }

    #[rstest]
    #[case(ExecutionStatus::Pending, ExecutionStatus::Completed)]
    #[case(ExecutionStatus::Completed, ExecutionStatus::Running)]
    #[case(ExecutionStatus::Cancelled, ExecutionStatus::Running)]
    #[case(ExecutionStatus::Running, ExecutionStatus::Running)]
    fn invalid_execution_transitions(#[case] from: ExecutionStatus, #[case] to: ExecutionStatus) {
        assert!(!can_transition_execution(from, to));
    }

    #[rstest]
    #[case(NodeStatus::Pending, NodeStatus::Ready)]
    #[case(NodeStatus::Ready, NodeStatus::Running)]
    #[case(NodeStatus::Running, NodeStatus::Completed)]
    #[case(NodeStatus::Running, NodeStatus::Failed)]
    #[case(NodeStatus::Running, NodeStatus::Cancelled)]
    #[case(NodeStatus::Running, NodeStatus::Ready)]
    #[case(NodeStatus::Failed, NodeStatus::Ready)]
    #[case(NodeStatus::Pending, NodeStatus::Skipped)]
    #[case(NodeStatus::Skipped, NodeStatus::Pending)]
    fn valid_node_transitions(#[case] from: NodeStatus, #[case] to: NodeStatus) {
        assert!(can_transition_node(from, to));
    }

    #[rstest]
    #[case(NodeStatus::Pending, NodeStatus::Running)]
    #[case(NodeStatus::Completed, NodeStatus::Running)]
    #[case(NodeStatus::Cancelled, NodeStatus::Ready)]
    #[case(NodeStatus::Skipped, NodeStatus::Running)]
    fn invalid_node_transitions(#[case] from: NodeStatus, #[case] to: NodeStatus) {
        assert!(!can_transition_node(from, to));
    }

    #[test]
    fn validate_reports_both_ends() {
        let err = validate_node_transition(NodeStatus::Pending, NodeStatus::Running).unwrap_err();
        assert_eq!(err.to_string(), "invalid transition from pending to running");
        assert!(
            validate_execution_transition(ExecutionStatus::Pending, ExecutionStatus::Running)
                .is_ok()
        );
    }
}
