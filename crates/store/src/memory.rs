//! In-memory reference backend.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use strom_core::{ExecutionId, NodeId};
use strom_execution::{
    CancelReason, CounterField, ExecutionMeta, ExecutionStatus, NodeCounters, NodeRunState,
    NodeStatus, OutputValue, QueuedTrigger, validate_execution_transition,
    validate_node_transition,
};
use strom_flow::{Dag, FlowDefinition, FlowSettings};

use crate::StoreResult;
use crate::error::StoreError;
use crate::store::{
    CancelInfo, CasOutcome, InitOutcome, NodePatch, QueuePush, SlotAcquire, StateStore,
};

/// Tunables of the [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Serialized values at or above this size are spilled to blob keys.
    pub blob_threshold: usize,
    /// How long execution records are kept after terminal time.
    pub retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            blob_threshold: 64 * 1024,
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl StoreConfig {
    /// Override the blob-spill threshold.
    #[must_use]
    pub fn with_blob_threshold(mut self, bytes: usize) -> Self {
        self.blob_threshold = bytes;
        self
    }

    /// Override the retention period.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// Every record owned by one execution id; expires as a whole.
#[derive(Debug)]
struct ExecutionRecord {
    meta: ExecutionMeta,
    definition: FlowDefinition,
    settings: FlowSettings,
    dag: Dag,
    trigger_payload: Value,
    nodes: BTreeMap<NodeId, NodeRunState>,
    pending: BTreeMap<NodeId, i64>,
    outputs: HashMap<NodeId, BTreeMap<String, OutputValue>>,
    blobs: HashMap<String, Vec<u8>>,
    cancel: Option<CancelInfo>,
    retention: Duration,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ScopeRecord {
    run_set: Vec<ExecutionId>,
    queue: VecDeque<QueuedTrigger>,
}

/// In-memory [`StateStore`].
///
/// Each execution's records live behind one mutex shard, so every
/// operation on a single execution is atomic — the same guarantee a
/// networked backend provides per key. Scope records (run-sets and
/// trigger queues) are sharded the same way. Status CAS calls are
/// checked against the transition tables, so only legal state-machine
/// moves ever reach a record.
#[derive(Debug, Default)]
pub struct MemoryStore {
    config: StoreConfig,
    executions: DashMap<ExecutionId, Arc<Mutex<ExecutionRecord>>>,
    scopes: DashMap<String, Arc<Mutex<ScopeRecord>>>,
}

impl MemoryStore {
    /// A store with default config.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// A store with explicit config.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            executions: DashMap::new(),
            scopes: DashMap::new(),
        }
    }

    fn record(&self, execution_id: ExecutionId) -> StoreResult<Arc<Mutex<ExecutionRecord>>> {
        self.executions
            .get(&execution_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StoreError::UnknownExecution(execution_id))
    }

    fn scope(&self, scope: &str) -> Arc<Mutex<ScopeRecord>> {
        Arc::clone(
            self.scopes
                .entry(scope.to_owned())
                .or_default()
                .value(),
        )
    }

    fn blob_key(execution_id: ExecutionId, node: &NodeId, key: &str) -> String {
        format!("{execution_id}/{node}/{key}")
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn init_execution(
        &self,
        meta: &ExecutionMeta,
        definition: &FlowDefinition,
        settings: &FlowSettings,
        dag: &Dag,
        trigger_payload: &Value,
        retention_hint: Duration,
    ) -> StoreResult<InitOutcome> {
        if let Some(existing) = self.executions.get(&meta.execution_id) {
            let record = existing.lock();
            return Ok(InitOutcome::AlreadyExists(record.meta.clone()));
        }

        let mut nodes = BTreeMap::new();
        let mut pending = BTreeMap::new();
        for id in dag.nodes() {
            let status = if dag.roots().contains(id) {
                NodeStatus::Ready
            } else {
                NodeStatus::Pending
            };
            nodes.insert(id.clone(), NodeRunState::new(id.clone(), status));
            pending.insert(id.clone(), dag.pending_init(id) as i64);
        }

        let record = ExecutionRecord {
            meta: meta.clone(),
            definition: definition.clone(),
            settings: settings.clone(),
            dag: dag.clone(),
            trigger_payload: trigger_payload.clone(),
            nodes,
            pending,
            outputs: HashMap::new(),
            blobs: HashMap::new(),
            cancel: None,
            retention: retention_hint,
            expires_at: None,
        };

        match self.executions.entry(meta.execution_id) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                // lost an init race with another replica
                let prior = existing.get().lock().meta.clone();
                Ok(InitOutcome::AlreadyExists(prior))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(record)));
                Ok(InitOutcome::Created)
            }
        }
    }

    async fn load_meta(&self, execution_id: ExecutionId) -> StoreResult<Option<ExecutionMeta>> {
        Ok(self
            .executions
            .get(&execution_id)
            .map(|record| record.lock().meta.clone()))
    }

    async fn load_definition(
        &self,
        execution_id: ExecutionId,
    ) -> StoreResult<Option<FlowDefinition>> {
        Ok(self
            .executions
            .get(&execution_id)
            .map(|record| record.lock().definition.clone()))
    }

    async fn load_settings(&self, execution_id: ExecutionId) -> StoreResult<Option<FlowSettings>> {
        Ok(self
            .executions
            .get(&execution_id)
            .map(|record| record.lock().settings.clone()))
    }

    async fn load_dag(&self, execution_id: ExecutionId) -> StoreResult<Option<Dag>> {
        Ok(self
            .executions
            .get(&execution_id)
            .map(|record| record.lock().dag.clone()))
    }

    async fn load_trigger_payload(&self, execution_id: ExecutionId) -> StoreResult<Option<Value>> {
        Ok(self
            .executions
            .get(&execution_id)
            .map(|record| record.lock().trigger_payload.clone()))
    }

    async fn load_node_states(&self, execution_id: ExecutionId) -> StoreResult<Vec<NodeRunState>> {
        let record = self.record(execution_id)?;
        let record = record.lock();
        Ok(record.nodes.values().cloned().collect())
    }

    async fn load_node_state(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
    ) -> StoreResult<Option<NodeRunState>> {
        let record = self.record(execution_id)?;
        let record = record.lock();
        Ok(record.nodes.get(node).cloned())
    }

    async fn set_node_status(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
        expected: NodeStatus,
        next: NodeStatus,
    ) -> StoreResult<CasOutcome<NodeRunState>> {
        // reject pairs the state machine forbids before touching state
        validate_node_transition(expected, next)?;

        let record = self.record(execution_id)?;
        let mut record = record.lock();
        let state = record
            .nodes
            .get_mut(node)
            .ok_or_else(|| StoreError::UnknownNode {
                execution_id,
                node: node.clone(),
            })?;

        if state.status != expected {
            return Ok(CasOutcome::Stale(state.clone()));
        }

        state.status = next;
        if next == NodeStatus::Running && state.started_at.is_none() {
            state.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            state.completed_at = Some(Utc::now());
        }
        Ok(CasOutcome::Applied(state.clone()))
    }

    async fn patch_node(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
        patch: NodePatch,
    ) -> StoreResult<()> {
        let record = self.record(execution_id)?;
        let mut record = record.lock();
        let state = record
            .nodes
            .get_mut(node)
            .ok_or_else(|| StoreError::UnknownNode {
                execution_id,
                node: node.clone(),
            })?;

        if patch.clear_run_data {
            state.started_at = None;
            state.completed_at = None;
            state.duration = None;
            state.worker_id = None;
            state.error = None;
            state.error_routed = false;
        }
        if let Some(duration) = patch.duration {
            state.duration = Some(duration);
        }
        if let Some(retry_count) = patch.retry_count {
            state.retry_count = retry_count;
        }
        if let Some(worker_id) = patch.worker_id {
            state.worker_id = Some(worker_id);
        }
        if let Some(error) = patch.error {
            state.error = Some(error);
        }
        if let Some(error_routed) = patch.error_routed {
            state.error_routed = error_routed;
        }
        Ok(())
    }

    async fn decrement_pending(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
    ) -> StoreResult<i64> {
        let record = self.record(execution_id)?;
        let mut record = record.lock();
        let counter = record
            .pending
            .get_mut(node)
            .ok_or_else(|| StoreError::UnknownNode {
                execution_id,
                node: node.clone(),
            })?;
        *counter -= 1;
        Ok(*counter)
    }

    async fn pending_remaining(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
    ) -> StoreResult<i64> {
        let record = self.record(execution_id)?;
        let record = record.lock();
        Ok(record.pending.get(node).copied().unwrap_or(0))
    }

    async fn pending_counters(
        &self,
        execution_id: ExecutionId,
    ) -> StoreResult<BTreeMap<NodeId, i64>> {
        let record = self.record(execution_id)?;
        let record = record.lock();
        Ok(record.pending.clone())
    }

    async fn set_pending(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
        value: i64,
    ) -> StoreResult<()> {
        let record = self.record(execution_id)?;
        let mut record = record.lock();
        record.pending.insert(node.clone(), value);
        Ok(())
    }

    async fn set_cancelled(
        &self,
        execution_id: ExecutionId,
        reason: CancelReason,
        by: &str,
    ) -> StoreResult<bool> {
        let record = self.record(execution_id)?;
        let mut record = record.lock();
        if record.cancel.is_some() {
            return Ok(false);
        }
        record.cancel = Some(CancelInfo {
            reason,
            by: by.to_owned(),
            at: Utc::now(),
        });
        Ok(true)
    }

    async fn cancellation(&self, execution_id: ExecutionId) -> StoreResult<Option<CancelInfo>> {
        let record = self.record(execution_id)?;
        let record = record.lock();
        Ok(record.cancel.clone())
    }

    async fn is_cancelled(&self, execution_id: ExecutionId) -> StoreResult<bool> {
        Ok(self
            .executions
            .get(&execution_id)
            .is_some_and(|record| record.lock().cancel.is_some()))
    }

    async fn increment_counter(
        &self,
        execution_id: ExecutionId,
        field: CounterField,
    ) -> StoreResult<u32> {
        let record = self.record(execution_id)?;
        let mut record = record.lock();
        Ok(record.meta.counters.increment(field))
    }

    async fn read_counters(&self, execution_id: ExecutionId) -> StoreResult<NodeCounters> {
        let record = self.record(execution_id)?;
        let record = record.lock();
        Ok(record.meta.counters)
    }

    async fn reset_counters(
        &self,
        execution_id: ExecutionId,
        counters: NodeCounters,
    ) -> StoreResult<()> {
        let record = self.record(execution_id)?;
        let mut record = record.lock();
        record.meta.counters = counters;
        Ok(())
    }

    async fn set_execution_status(
        &self,
        execution_id: ExecutionId,
        expected: ExecutionStatus,
        next: ExecutionStatus,
    ) -> StoreResult<CasOutcome<ExecutionStatus>> {
        validate_execution_transition(expected, next)?;

        let record = self.record(execution_id)?;
        let mut record = record.lock();
        if record.meta.status != expected {
            return Ok(CasOutcome::Stale(record.meta.status));
        }
        record.meta.status = next;
        if next.is_terminal() {
            record.meta.completed_at = Some(Utc::now());
        }
        Ok(CasOutcome::Applied(next))
    }

    async fn put_output(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
        output: serde_json::Map<String, Value>,
    ) -> StoreResult<()> {
        let record = self.record(execution_id)?;
        let mut record = record.lock();

        let mut stored = BTreeMap::new();
        for (key, value) in output {
            let bytes = serde_json::to_vec(&value)?;
            if bytes.len() >= self.config.blob_threshold {
                let blob_id = Self::blob_key(execution_id, node, &key);
                let size = bytes.len() as u64;
                tracing::debug!(
                    execution_id = %execution_id,
                    node = %node,
                    key = %key,
                    size,
                    "spilling output value to blob"
                );
                record.blobs.insert(blob_id.clone(), bytes);
                stored.insert(key, OutputValue::blob(blob_id, size));
            } else {
                stored.insert(key, OutputValue::Inline(value));
            }
        }
        record.outputs.insert(node.clone(), stored);
        Ok(())
    }

    async fn load_output(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
    ) -> StoreResult<Option<BTreeMap<String, OutputValue>>> {
        let record = self.record(execution_id)?;
        let record = record.lock();
        Ok(record.outputs.get(node).cloned())
    }

    async fn get_output_value(
        &self,
        execution_id: ExecutionId,
        node: &NodeId,
        key: &str,
    ) -> StoreResult<Option<Value>> {
        let record = self.record(execution_id)?;
        let record = record.lock();
        let Some(stored) = record.outputs.get(node).and_then(|map| map.get(key)) else {
            return Ok(None);
        };
        match stored {
            OutputValue::Inline(value) => Ok(Some(value.clone())),
            OutputValue::BlobRef { blob_id, .. } => {
                let bytes = record
                    .blobs
                    .get(blob_id)
                    .ok_or_else(|| StoreError::MissingBlob(blob_id.clone()))?;
                Ok(Some(serde_json::from_slice(bytes)?))
            }
        }
    }

    async fn try_acquire_slot(
        &self,
        scope: &str,
        execution_id: ExecutionId,
        max: usize,
    ) -> StoreResult<SlotAcquire> {
        let scope = self.scope(scope);
        let mut scope = scope.lock();
        if scope.run_set.contains(&execution_id) {
            return Ok(SlotAcquire::Acquired);
        }
        if scope.run_set.len() >= max {
            return Ok(SlotAcquire::Busy(scope.run_set.clone()));
        }
        scope.run_set.push(execution_id);
        Ok(SlotAcquire::Acquired)
    }

    async fn add_slot(&self, scope: &str, execution_id: ExecutionId) -> StoreResult<()> {
        let scope = self.scope(scope);
        let mut scope = scope.lock();
        if !scope.run_set.contains(&execution_id) {
            scope.run_set.push(execution_id);
        }
        Ok(())
    }

    async fn release_slot(&self, scope: &str, execution_id: ExecutionId) -> StoreResult<bool> {
        let scope = self.scope(scope);
        let mut scope = scope.lock();
        let before = scope.run_set.len();
        scope.run_set.retain(|id| *id != execution_id);
        Ok(scope.run_set.len() < before)
    }

    async fn release_and_pop(
        &self,
        scope: &str,
        execution_id: ExecutionId,
        cap: usize,
    ) -> StoreResult<Option<QueuedTrigger>> {
        let scope = self.scope(scope);
        let mut scope = scope.lock();
        scope.run_set.retain(|id| *id != execution_id);
        if scope.run_set.len() >= cap {
            return Ok(None);
        }
        let Some(next) = scope.queue.pop_front() else {
            return Ok(None);
        };
        scope.run_set.push(next.execution_id);
        Ok(Some(next))
    }

    async fn runset_members(&self, scope: &str) -> StoreResult<Vec<ExecutionId>> {
        let scope = self.scope(scope);
        let scope = scope.lock();
        Ok(scope.run_set.clone())
    }

    async fn queue_push(
        &self,
        scope: &str,
        trigger: QueuedTrigger,
        bound: usize,
    ) -> StoreResult<QueuePush> {
        let scope = self.scope(scope);
        let mut scope = scope.lock();
        if scope.queue.len() >= bound {
            return Ok(QueuePush::Full);
        }
        scope.queue.push_back(trigger);
        Ok(QueuePush::Position(scope.queue.len()))
    }

    async fn queue_pop(&self, scope: &str) -> StoreResult<Option<QueuedTrigger>> {
        let scope = self.scope(scope);
        let mut scope = scope.lock();
        Ok(scope.queue.pop_front())
    }

    async fn queue_len(&self, scope: &str) -> StoreResult<usize> {
        let scope = self.scope(scope);
        let scope = scope.lock();
        Ok(scope.queue.len())
    }

    async fn mark_terminal(&self, execution_id: ExecutionId, at: DateTime<Utc>) -> StoreResult<()> {
        let record = self.record(execution_id)?;
        let mut record = record.lock();
        let retention = chrono::Duration::from_std(record.retention)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        record.expires_at = Some(at + retention);
        Ok(())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<ExecutionId>> {
        let expired: Vec<ExecutionId> = self
            .executions
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .lock()
                    .expires_at
                    .is_some_and(|expires_at| expires_at <= now)
            })
            .map(|entry| *entry.key())
            .collect();
        for execution_id in &expired {
            self.executions.remove(execution_id);
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "swept expired executions");
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use strom_execution::{ExecutionStatus, TriggerType};
    use strom_flow::{EdgeDefinition, NodeDefinition, parse};
    use strom_handler::{Handler, HandlerContext, HandlerOutcome, HandlerRegistry};

    use super::*;

    struct NoOp;

    #[async_trait]
    impl Handler for NoOp {
        async fn execute(&self, _ctx: HandlerContext) -> HandlerOutcome {
            HandlerOutcome::empty()
        }
    }

    fn diamond_dag() -> (FlowDefinition, Dag) {
        let mut registry = HandlerRegistry::new();
        registry.register("noop", Arc::new(NoOp)).unwrap();
        let definition = FlowDefinition::new(
            vec![
                NodeDefinition::new("a", "noop"),
                NodeDefinition::new("b", "noop"),
                NodeDefinition::new("c", "noop"),
                NodeDefinition::new("d", "noop"),
            ],
            vec![
                EdgeDefinition::new("a", "b"),
                EdgeDefinition::new("a", "c"),
                EdgeDefinition::new("b", "d"),
                EdgeDefinition::new("c", "d"),
            ],
        );
        let dag = parse(&definition, &registry).unwrap();
        (definition, dag)
    }

    async fn seeded(store: &MemoryStore) -> ExecutionId {
        let (definition, dag) = diamond_dag();
        let meta = ExecutionMeta::new(
            ExecutionId::new(),
            strom_core::FlowId::new(),
            1,
            dag.node_count() as u32,
            "tester",
            TriggerType::Manual,
        );
        let execution_id = meta.execution_id;
        let outcome = store
            .init_execution(
                &meta,
                &definition,
                &FlowSettings::default(),
                &dag,
                &serde_json::json!({"x": 1}),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, InitOutcome::Created));
        execution_id
    }

    #[tokio::test]
    async fn init_seeds_node_states_and_counters() {
        let store = MemoryStore::new();
        let eid = seeded(&store).await;

        let states = store.load_node_states(eid).await.unwrap();
        assert_eq!(states.len(), 4);
        let a = store
            .load_node_state(eid, &NodeId::from("a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.status, NodeStatus::Ready);
        let d = store
            .load_node_state(eid, &NodeId::from("d"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d.status, NodeStatus::Pending);
        assert_eq!(
            store.pending_remaining(eid, &NodeId::from("d")).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let store = MemoryStore::new();
        let eid = seeded(&store).await;

        let (definition, dag) = diamond_dag();
        let meta = store.load_meta(eid).await.unwrap().unwrap();
        let outcome = store
            .init_execution(
                &meta,
                &definition,
                &FlowSettings::default(),
                &dag,
                &serde_json::json!({"other": true}),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, InitOutcome::AlreadyExists(_)));
        // prior trigger payload untouched
        assert_eq!(
            store.load_trigger_payload(eid).await.unwrap().unwrap(),
            serde_json::json!({"x": 1})
        );
    }

    #[tokio::test]
    async fn node_status_cas_applies_once() {
        let store = MemoryStore::new();
        let eid = seeded(&store).await;
        let a = NodeId::from("a");

        let first = store
            .set_node_status(eid, &a, NodeStatus::Ready, NodeStatus::Running)
            .await
            .unwrap();
        assert!(first.is_applied());
        assert!(first.into_inner().started_at.is_some());

        // redelivery: a second replica loses the race
        let second = store
            .set_node_status(eid, &a, NodeStatus::Ready, NodeStatus::Running)
            .await
            .unwrap();
        assert!(!second.is_applied());
        assert_eq!(second.into_inner().status, NodeStatus::Running);
    }

    #[tokio::test]
    async fn decrement_pending_returns_post_value() {
        let store = MemoryStore::new();
        let eid = seeded(&store).await;
        let d = NodeId::from("d");

        assert_eq!(store.decrement_pending(eid, &d).await.unwrap(), 1);
        assert_eq!(store.decrement_pending(eid, &d).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancel_flag_is_set_once() {
        let store = MemoryStore::new();
        let eid = seeded(&store).await;

        assert!(!store.is_cancelled(eid).await.unwrap());
        assert!(
            store
                .set_cancelled(eid, CancelReason::Manual, "tester")
                .await
                .unwrap()
        );
        assert!(
            !store
                .set_cancelled(eid, CancelReason::Timeout, "system")
                .await
                .unwrap()
        );
        let info = store.cancellation(eid).await.unwrap().unwrap();
        assert_eq!(info.reason, CancelReason::Manual);
        assert_eq!(info.by, "tester");
        assert!(store.is_cancelled(eid).await.unwrap());
    }

    #[tokio::test]
    async fn counters_and_status_cas() {
        let store = MemoryStore::new();
        let eid = seeded(&store).await;

        assert_eq!(
            store.increment_counter(eid, CounterField::Completed).await.unwrap(),
            1
        );
        assert_eq!(
            store.increment_counter(eid, CounterField::Completed).await.unwrap(),
            2
        );
        assert_eq!(store.read_counters(eid).await.unwrap().completed, 2);

        let won = store
            .set_execution_status(eid, ExecutionStatus::Running, ExecutionStatus::Completed)
            .await
            .unwrap();
        assert!(won.is_applied());
        let lost = store
            .set_execution_status(eid, ExecutionStatus::Running, ExecutionStatus::Failed)
            .await
            .unwrap();
        assert_eq!(lost, CasOutcome::Stale(ExecutionStatus::Completed));
        assert!(
            store
                .load_meta(eid)
                .await
                .unwrap()
                .unwrap()
                .completed_at
                .is_some()
        );
    }

    #[tokio::test]
    async fn outputs_spill_to_blobs_and_deref_transparently() {
        let store = MemoryStore::with_config(StoreConfig::default().with_blob_threshold(64));
        let eid = seeded(&store).await;
        let a = NodeId::from("a");

        let mut output = serde_json::Map::new();
        output.insert("small".into(), serde_json::json!("tiny"));
        output.insert("large".into(), serde_json::json!("x".repeat(200)));
        store.put_output(eid, &a, output).await.unwrap();

        let stored = store.load_output(eid, &a).await.unwrap().unwrap();
        assert!(stored["small"].is_inline());
        assert!(!stored["large"].is_inline());

        // dereference is transparent to readers
        assert_eq!(
            store.get_output_value(eid, &a, "large").await.unwrap().unwrap(),
            serde_json::json!("x".repeat(200))
        );
        assert_eq!(
            store.get_output_value(eid, &a, "small").await.unwrap().unwrap(),
            serde_json::json!("tiny")
        );
        assert_eq!(store.get_output_value(eid, &a, "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn slot_acquisition_is_capped() {
        let store = MemoryStore::new();
        let first = ExecutionId::new();
        let second = ExecutionId::new();

        assert_eq!(
            store.try_acquire_slot("flow-1", first, 1).await.unwrap(),
            SlotAcquire::Acquired
        );
        assert_eq!(
            store.try_acquire_slot("flow-1", second, 1).await.unwrap(),
            SlotAcquire::Busy(vec![first])
        );

        assert!(store.release_slot("flow-1", first).await.unwrap());
        assert_eq!(
            store.try_acquire_slot("flow-1", second, 1).await.unwrap(),
            SlotAcquire::Acquired
        );
    }

    #[tokio::test]
    async fn racing_slot_acquires_admit_exactly_one() {
        let store = Arc::new(MemoryStore::new());
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            tasks.spawn(async move {
                store
                    .try_acquire_slot("scope", ExecutionId::new(), 1)
                    .await
                    .unwrap()
            });
        }
        let mut acquired = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap() == SlotAcquire::Acquired {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 1);
    }

    #[tokio::test]
    async fn queue_is_fifo_and_bounded() {
        let store = MemoryStore::new();
        let make = |n: u64| QueuedTrigger {
            execution_id: ExecutionId::new(),
            payload: serde_json::json!(n),
            enqueued_at: Utc::now(),
            triggered_by: "tester".into(),
            trigger_type: TriggerType::Manual,
        };

        assert_eq!(
            store.queue_push("s", make(1), 2).await.unwrap(),
            QueuePush::Position(1)
        );
        assert_eq!(
            store.queue_push("s", make(2), 2).await.unwrap(),
            QueuePush::Position(2)
        );
        assert_eq!(store.queue_push("s", make(3), 2).await.unwrap(), QueuePush::Full);
        assert_eq!(store.queue_len("s").await.unwrap(), 2);

        let head = store.queue_pop("s").await.unwrap().unwrap();
        assert_eq!(head.payload, serde_json::json!(1));
        let next = store.queue_pop("s").await.unwrap().unwrap();
        assert_eq!(next.payload, serde_json::json!(2));
        assert!(store.queue_pop("s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retention_sweep_drops_terminal_executions() {
        let store = MemoryStore::new();
        let eid = seeded(&store).await;

        let now = Utc::now();
        store.mark_terminal(eid, now).await.unwrap();

        // not yet expired
        assert!(store.sweep_expired(now).await.unwrap().is_empty());

        let later = now + chrono::Duration::seconds(61);
        let swept = store.sweep_expired(later).await.unwrap();
        assert_eq!(swept, vec![eid]);
        assert!(store.load_meta(eid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_execution_errors() {
        let store = MemoryStore::new();
        let err = store
            .decrement_pending(ExecutionId::new(), &NodeId::from("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownExecution(_)));
        assert!(!store.is_cancelled(ExecutionId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn illegal_node_transition_is_rejected_before_the_compare() {
        let store = MemoryStore::new();
        let eid = seeded(&store).await;
        let a = NodeId::from("a");

        // a is Ready, so the expected value would match — the pair
        // itself is what the state machine forbids
        let err = store
            .set_node_status(eid, &a, NodeStatus::Ready, NodeStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));
        assert!(err.to_string().contains("invalid transition"));

        // the record is untouched and legal transitions still apply
        let state = store.load_node_state(eid, &a).await.unwrap().unwrap();
        assert_eq!(state.status, NodeStatus::Ready);
        assert!(
            store
                .set_node_status(eid, &a, NodeStatus::Ready, NodeStatus::Running)
                .await
                .unwrap()
                .is_applied()
        );
    }

    #[tokio::test]
    async fn illegal_execution_transition_is_rejected() {
        let store = MemoryStore::new();
        let eid = seeded(&store).await;

        let err = store
            .set_execution_status(eid, ExecutionStatus::Running, ExecutionStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));
        assert_eq!(
            store.load_meta(eid).await.unwrap().unwrap().status,
            ExecutionStatus::Running
        );
    }
}
