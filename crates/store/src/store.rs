//! The state-store capability trait.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use strom_core::{ExecutionId, NodeId};
use strom_execution::{
    CancelReason, CounterField, ExecutionMeta, ExecutionStatus, NodeCounters, NodeError,
    NodeRunState, NodeStatus, OutputValue, QueuedTrigger,
};
use strom_flow::{Dag, FlowDefinition, FlowSettings};

use crate::StoreResult;

/// Outcome of the idempotent [`StateStore::init_execution`].
#[derive(Debug, Clone)]
pub enum InitOutcome {
    /// The execution's records were created.
    Created,
    /// Records already existed; the prior meta is returned unchanged.
    AlreadyExists(ExecutionMeta),
}

/// Outcome of a compare-and-set.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome<T> {
    /// The expected value matched; the new state is returned.
    Applied(T),
    /// The expected value did not match; the actual state is returned.
    Stale(T),
}

impl<T> CasOutcome<T> {
    /// Returns `true` when the CAS applied.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// The carried state, applied or not.
    pub fn into_inner(self) -> T {
        match self {
            Self::Applied(inner) | Self::Stale(inner) => inner,
        }
    }
}

/// Outcome of the atomic check-and-insert on a scope's run-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotAcquire {
    /// The execution now holds a run slot.
    Acquired,
    /// The run-set is at its cap; current members returned.
    Busy(Vec<ExecutionId>),
}

/// Outcome of a bounded queue push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuePush {
    /// Enqueued at the given 1-based position.
    Position(usize),
    /// The queue is at its bound.
    Full,
}

/// The recorded cancellation request of an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelInfo {
    /// Why the execution was cancelled.
    pub reason: CancelReason,
    /// Who requested the cancellation.
    pub by: String,
    /// When the flag was set.
    pub at: DateTime<Utc>,
}

/// Hash-field writes applied to one node's run record.
///
/// `None` fields are left untouched. [`reset_for_retry`](Self::reset_for_retry)
/// additionally clears timing, error, and worker fields.
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    /// Overwrite the final-attempt duration.
    pub duration: Option<Duration>,
    /// Overwrite the stored retry count.
    pub retry_count: Option<u32>,
    /// Record the launching replica.
    pub worker_id: Option<String>,
    /// Record the failure.
    pub error: Option<NodeError>,
    /// Mark the node's failure as routed through an error edge.
    pub error_routed: Option<bool>,
    /// Clear timing, error, and worker fields (retry re-priming).
    pub clear_run_data: bool,
}

impl NodePatch {
    /// An empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the final-attempt duration.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Set the stored retry count.
    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    /// Record the launching replica.
    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    /// Record the failure.
    #[must_use]
    pub fn with_error(mut self, error: NodeError) -> Self {
        self.error = Some(error);
        self
    }

    /// Mark the failure as routed through an error edge.
    #[must_use]
    pub fn with_error_routed(mut self, error_routed: bool) -> Self {
        self.error_routed = Some(error_routed);
        self
    }

    /// A patch clearing run data for a retried node.
    #[must_use]
    pub fn reset_for_retry() -> Self {
        Self {
            retry_count: Some(0),
            clear_run_data: true,
            ..Self::default()
        }
    }
}

/// The capability set the engine requires from a shared key-value store.
///
/// All operations are single-key atomic; none are transactional across
/// keys. Every execution-scoped record carries the retention hint given
/// at init and expires wholesale after the execution's grace period.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Create all records for a fresh execution: meta, definition and
    /// settings snapshots, DAG snapshot, trigger payload, node states
    /// (`Ready` for roots, `Pending` otherwise), and pending counters.
    ///
    /// Idempotent: when the meta key already exists it is returned
    /// unchanged and nothing is overwritten.
    async fn init_execution(
        &self,
        meta: &ExecutionMeta,
        definition: &FlowDefinition,
        settings: &FlowSettings,
        dag: &Dag,
        trigger_payload: &Value,
        retention_hint: Duration,
    ) -> StoreResult<InitOutcome>;

    /// The execution's meta record, if it exists.
    async fn load_meta(&self, execution_id: ExecutionId) -> StoreResult<Option<ExecutionMeta>>;

    /// The definition snapshot taken at init.
    async fn load_definition(
        &self,
        execution_id: ExecutionId,
    ) -> StoreResult<Option<FlowDefinition>>;

    /// The settings snapshot taken at init.
    async fn load_settings(&self, execution_id: ExecutionId) -> StoreResult<Option<FlowSettings>>;

    /// The DAG snapshot taken at init.
    async fn load_dag(&self, execution_id: ExecutionId) -> StoreResult<Option<Dag>>;

    /// The trigger payload stored at init.
    async fn load_trigger_payload(&self, execution_id: ExecutionId) -> StoreResult<Option<Value>>;

    /// All node run records, ordered by node id.
    async fn load_node_states(&self, execution_id: ExecutionId) -> StoreResult<Vec<NodeRunState>>;

    /// One node's run record.
    async fn load_node_state(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
    ) -> StoreResult<Option<NodeRunState>>;

    /// Compare-and-set on a node's status field.
    ///
    /// This is the redelivery guard: of several replicas trying to move
    /// a node `Ready → Running`, exactly one sees `Applied`. The store
    /// stamps `started_at` on entering `Running` and `completed_at` on
    /// entering a terminal status.
    ///
    /// Implementations validate the `(expected, next)` pair against
    /// [`validate_node_transition`](strom_execution::validate_node_transition)
    /// and reject forbidden transitions with
    /// [`StoreError::InvalidTransition`](crate::StoreError::InvalidTransition)
    /// before attempting the compare, so an illegal status change can
    /// never be applied, whatever the caller passes.
    async fn set_node_status(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
        expected: NodeStatus,
        next: NodeStatus,
    ) -> StoreResult<CasOutcome<NodeRunState>>;

    /// Apply hash-field writes to a node's run record.
    async fn patch_node(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
        patch: NodePatch,
    ) -> StoreResult<()>;

    /// Atomically decrement a node's pending counter, returning the
    /// post-value. The caller observing `0` is the unique launcher of
    /// the node for this execution.
    async fn decrement_pending(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
    ) -> StoreResult<i64>;

    /// The current pending counter of one node.
    async fn pending_remaining(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
    ) -> StoreResult<i64>;

    /// All pending counters of the execution.
    async fn pending_counters(
        &self,
        execution_id: ExecutionId,
    ) -> StoreResult<BTreeMap<NodeId, i64>>;

    /// Overwrite one node's pending counter (retry re-priming).
    async fn set_pending(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
        value: i64,
    ) -> StoreResult<()>;

    /// Set the cancellation flag. Compare-and-set on absence: returns
    /// `true` only for the call that set the flag.
    async fn set_cancelled(
        &self,
        execution_id: ExecutionId,
        reason: CancelReason,
        by: &str,
    ) -> StoreResult<bool>;

    /// The recorded cancellation, if any.
    async fn cancellation(&self, execution_id: ExecutionId) -> StoreResult<Option<CancelInfo>>;

    /// Cheap cancellation probe; may be loosely consistent.
    async fn is_cancelled(&self, execution_id: ExecutionId) -> StoreResult<bool>;

    /// Atomically increment a meta counter, returning the new value.
    async fn increment_counter(
        &self,
        execution_id: ExecutionId,
        field: CounterField,
    ) -> StoreResult<u32>;

    /// The execution's counters.
    async fn read_counters(&self, execution_id: ExecutionId) -> StoreResult<NodeCounters>;

    /// Overwrite the execution's counters (retry rebasing).
    async fn reset_counters(
        &self,
        execution_id: ExecutionId,
        counters: NodeCounters,
    ) -> StoreResult<()>;

    /// Compare-and-set on the meta status. The winning terminal
    /// transition stamps `completed_at`; this is how replicas agree on
    /// who publishes the terminal event.
    ///
    /// As with [`set_node_status`](Self::set_node_status), the pair is
    /// validated against
    /// [`validate_execution_transition`](strom_execution::validate_execution_transition)
    /// before the compare.
    async fn set_execution_status(
        &self,
        execution_id: ExecutionId,
        expected: ExecutionStatus,
        next: ExecutionStatus,
    ) -> StoreResult<CasOutcome<ExecutionStatus>>;

    /// Persist a node's output map. Values whose serialized size
    /// reaches the blob threshold are spilled to a blob key and stored
    /// as references.
    async fn put_output(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
        output: serde_json::Map<String, Value>,
    ) -> StoreResult<()>;

    /// The stored output map (references left unresolved).
    async fn load_output(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
    ) -> StoreResult<Option<BTreeMap<String, OutputValue>>>;

    /// One output value with blob references transparently dereferenced.
    async fn get_output_value(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
        key: &str,
    ) -> StoreResult<Option<Value>>;

    /// Atomic check-and-insert on a scope's run-set: admits the
    /// execution unless `max` members already hold slots.
    async fn try_acquire_slot(
        &self,
        scope: &str,
        execution_id: ExecutionId,
        max: usize,
    ) -> StoreResult<SlotAcquire>;

    /// Insert into the run-set unconditionally (`replace` admission;
    /// the displaced executions release their own slots later).
    async fn add_slot(&self, scope: &str, execution_id: ExecutionId) -> StoreResult<()>;

    /// Remove from the run-set; `true` if the execution held a slot.
    async fn release_slot(&self, scope: &str, execution_id: ExecutionId) -> StoreResult<bool>;

    /// Atomically release the execution's slot and, when the queue is
    /// non-empty and the run-set is under `cap`, pop the queue head and
    /// insert it into the run-set. One scope-key operation, so a racing
    /// trigger cannot steal the freed slot from the queue head.
    async fn release_and_pop(
        &self,
        scope: &str,
        execution_id: ExecutionId,
        cap: usize,
    ) -> StoreResult<Option<QueuedTrigger>>;

    /// Current members of a scope's run-set.
    async fn runset_members(&self, scope: &str) -> StoreResult<Vec<ExecutionId>>;

    /// Append to the scope's FIFO trigger queue, bounded by `bound`.
    async fn queue_push(
        &self,
        scope: &str,
        trigger: QueuedTrigger,
        bound: usize,
    ) -> StoreResult<QueuePush>;

    /// Pop the head of the scope's trigger queue.
    async fn queue_pop(&self, scope: &str) -> StoreResult<Option<QueuedTrigger>>;

    /// Length of the scope's trigger queue.
    async fn queue_len(&self, scope: &str) -> StoreResult<usize>;

    /// Start the retention clock: all of the execution's records expire
    /// together once the retention period has elapsed from `at`.
    async fn mark_terminal(&self, execution_id: ExecutionId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Drop every expired execution, returning the dropped ids.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<ExecutionId>>;
}
