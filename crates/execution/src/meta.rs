//! Per-execution meta record and node accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strom_core::{ExecutionId, FlowId};

use crate::status::ExecutionStatus;
use crate::trigger::TriggerType;

/// The meta counter a node completion increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterField {
    /// `completed_nodes`.
    Completed,
    /// `failed_nodes`.
    Failed,
    /// `cancelled_nodes`.
    Cancelled,
    /// `skipped_nodes`.
    Skipped,
}

/// Node accounting for one execution.
///
/// Invariant: `accounted() <= total`; the execution is terminal exactly
/// when they are equal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounters {
    /// Number of nodes in the DAG.
    pub total: u32,
    /// Nodes that completed successfully.
    pub completed: u32,
    /// Nodes that failed.
    pub failed: u32,
    /// Nodes that were cancelled.
    pub cancelled: u32,
    /// Nodes that never ran because an upstream failed or was cancelled.
    pub skipped: u32,
}

impl NodeCounters {
    /// Counters for a DAG of `total` nodes, all outstanding.
    #[must_use]
    pub fn new(total: u32) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Nodes that have reached a terminal state.
    #[must_use]
    pub fn accounted(&self) -> u32 {
        self.completed + self.failed + self.cancelled + self.skipped
    }

    /// Returns `true` once every node is accounted for.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.accounted() == self.total
    }

    /// The counter addressed by `field`.
    #[must_use]
    pub fn get(&self, field: CounterField) -> u32 {
        match field {
            CounterField::Completed => self.completed,
            CounterField::Failed => self.failed,
            CounterField::Cancelled => self.cancelled,
            CounterField::Skipped => self.skipped,
        }
    }

    /// Increment the counter addressed by `field`, returning the new value.
    pub fn increment(&mut self, field: CounterField) -> u32 {
        let slot = match field {
            CounterField::Completed => &mut self.completed,
            CounterField::Failed => &mut self.failed,
            CounterField::Cancelled => &mut self.cancelled,
            CounterField::Skipped => &mut self.skipped,
        };
        *slot += 1;
        *slot
    }
}

/// The meta record of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMeta {
    /// Unique id of this execution.
    pub execution_id: ExecutionId,
    /// The flow being executed.
    pub flow_id: FlowId,
    /// Version of the flow definition at trigger time.
    pub flow_version: u32,
    /// Current status.
    pub status: ExecutionStatus,
    /// Node accounting.
    pub counters: NodeCounters,
    /// When the execution started running.
    pub started_at: DateTime<Utc>,
    /// When the execution reached a terminal state.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Who triggered the execution.
    pub triggered_by: String,
    /// How the execution was triggered.
    pub trigger_type: TriggerType,
}

impl ExecutionMeta {
    /// A meta record for a freshly admitted execution.
    #[must_use]
    pub fn new(
        execution_id: ExecutionId,
        flow_id: FlowId,
        flow_version: u32,
        total_nodes: u32,
        triggered_by: impl Into<String>,
        trigger_type: TriggerType,
    ) -> Self {
        Self {
            execution_id,
            flow_id,
            flow_version,
            status: ExecutionStatus::Running,
            counters: NodeCounters::new(total_nodes),
            started_at: Utc::now(),
            completed_at: None,
            triggered_by: triggered_by.into(),
            trigger_type,
        }
    }
}
