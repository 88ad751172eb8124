//! The execution scheduler: lifecycle, fan-in dispatch, termination.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use strom_core::{ExecutionId, FlowId, NodeId};
use strom_eventbus::EventBus;
use strom_execution::{
    CancelOutcome, CancelReason, CounterField, EventPayload, ExecutionEvent, ExecutionMeta,
    ExecutionSnapshot, ExecutionStatus, NodeStatus, QueuedTrigger, RejectReason, TriggerOutcome,
    TriggerType,
};
use strom_flow::{ConcurrencyPolicy, Dag, FlowDefinition, FlowSettings, parse};
use strom_handler::{CredentialResolver, DenyAllResolver, HandlerRegistry};
use strom_store::{CasOutcome, InitOutcome, NodePatch, StateStore, StoreError, with_store_retry};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::concurrency::{Admission, ConcurrencyManager};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executor::{NodeExecutor, NodeResult};

/// Everything one trigger call carries.
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    /// The flow being triggered.
    pub flow_id: FlowId,
    /// Version of the definition, recorded on the execution meta.
    pub flow_version: u32,
    /// The flow definition (already loaded by the storage layer).
    pub definition: FlowDefinition,
    /// The flow's settings.
    pub settings: FlowSettings,
    /// The trigger payload bound via `trigger.*` expressions.
    pub payload: Value,
    /// Who triggered.
    pub triggered_by: String,
    /// How the trigger arrived.
    pub trigger_type: TriggerType,
}

impl TriggerRequest {
    /// A manual trigger with default settings and a null payload.
    #[must_use]
    pub fn new(flow_id: FlowId, definition: FlowDefinition) -> Self {
        Self {
            flow_id,
            flow_version: 1,
            definition,
            settings: FlowSettings::default(),
            payload: Value::Null,
            triggered_by: "system".to_owned(),
            trigger_type: TriggerType::Manual,
        }
    }

    /// Set the flow settings.
    #[must_use]
    pub fn with_settings(mut self, settings: FlowSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the trigger payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set who triggered.
    #[must_use]
    pub fn with_triggered_by(mut self, triggered_by: impl Into<String>) -> Self {
        self.triggered_by = triggered_by.into();
        self
    }

    /// Set the trigger type.
    #[must_use]
    pub fn with_trigger_type(mut self, trigger_type: TriggerType) -> Self {
        self.trigger_type = trigger_type;
        self
    }

    /// Set the definition version.
    #[must_use]
    pub fn with_version(mut self, flow_version: u32) -> Self {
        self.flow_version = flow_version;
        self
    }
}

/// In-memory view of one live execution. A cache of store state — every
/// field is reconstructable from the store (see `recover`).
#[derive(Clone)]
struct ExecutionHandle {
    scope_key: String,
    policy: ConcurrencyPolicy,
    definition: Arc<FlowDefinition>,
    settings: Arc<FlowSettings>,
    dag: Arc<Dag>,
    cancellation: CancellationToken,
    node_permits: Option<Arc<Semaphore>>,
    timeout_task: Arc<Mutex<Option<AbortHandle>>>,
}

/// Definition and settings of a queued trigger, kept on the admitting
/// replica until the queue drains (the durable part — id, payload,
/// order — lives in the store).
struct PendingStart {
    flow_id: FlowId,
    flow_version: u32,
    scope_key: String,
    definition: Arc<FlowDefinition>,
    settings: Arc<FlowSettings>,
    dag: Arc<Dag>,
    triggered_by: String,
    trigger_type: TriggerType,
}

struct SchedulerInner {
    store: Arc<dyn StateStore>,
    registry: Arc<HandlerRegistry>,
    bus: Arc<EventBus>,
    concurrency: ConcurrencyManager,
    executor: NodeExecutor,
    config: EngineConfig,
    pool: Arc<Semaphore>,
    executions: DashMap<ExecutionId, ExecutionHandle>,
    pending: DashMap<ExecutionId, PendingStart>,
}

/// Drives executions from trigger to terminal state.
///
/// Public operations: [`trigger`](Self::trigger), [`cancel`](Self::cancel),
/// [`retry`](Self::retry), [`snapshot`](Self::snapshot), and
/// [`recover`](Self::recover) for post-crash reconstruction.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Build a scheduler with no credential subsystem wired in.
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        registry: Arc<HandlerRegistry>,
        bus: Arc<EventBus>,
        config: EngineConfig,
    ) -> Self {
        Self::with_credentials(store, registry, bus, Arc::new(DenyAllResolver), config)
    }

    /// Build a scheduler with an explicit credential resolver.
    #[must_use]
    pub fn with_credentials(
        store: Arc<dyn StateStore>,
        registry: Arc<HandlerRegistry>,
        bus: Arc<EventBus>,
        credentials: Arc<dyn CredentialResolver>,
        config: EngineConfig,
    ) -> Self {
        let concurrency = ConcurrencyManager::new(Arc::clone(&store), config.queue_bound);
        let executor = NodeExecutor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&bus),
            credentials,
        );
        let pool = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                registry,
                bus,
                concurrency,
                executor,
                config,
                pool,
                executions: DashMap::new(),
                pending: DashMap::new(),
            }),
        }
    }

    /// Admit and start (or queue, or reject) one trigger.
    pub async fn trigger(&self, request: TriggerRequest) -> Result<TriggerOutcome, EngineError> {
        let inner = &self.inner;

        let dag = match parse(&request.definition, &inner.registry) {
            Ok(dag) => Arc::new(dag),
            Err(err) => {
                tracing::debug!(flow_id = %request.flow_id, error = %err, "definition rejected");
                return Ok(TriggerOutcome::Rejected(RejectReason::Parse(err)));
            }
        };

        if !request.settings.enabled {
            return Ok(TriggerOutcome::Rejected(RejectReason::FlowDisabled));
        }

        let execution_id = ExecutionId::new();
        let policy = request.settings.concurrency.clone();
        let scope_key =
            ConcurrencyManager::scope_key(request.flow_id, &policy, &request.payload);
        let queued = QueuedTrigger {
            execution_id,
            payload: request.payload.clone(),
            enqueued_at: Utc::now(),
            triggered_by: request.triggered_by.clone(),
            trigger_type: request.trigger_type,
        };

        let definition = Arc::new(request.definition);
        let settings = Arc::new(request.settings);

        match inner.concurrency.admit(&scope_key, &policy, queued).await? {
            Admission::Denied { running } => Ok(TriggerOutcome::Rejected(
                RejectReason::ConcurrentDenied { running },
            )),
            Admission::QueueFull => Ok(TriggerOutcome::Rejected(RejectReason::QueueFull)),
            Admission::Queued { position } => {
                inner.pending.insert(
                    execution_id,
                    PendingStart {
                        flow_id: request.flow_id,
                        flow_version: request.flow_version,
                        scope_key,
                        definition,
                        settings,
                        dag,
                        triggered_by: request.triggered_by,
                        trigger_type: request.trigger_type,
                    },
                );
                Ok(TriggerOutcome::Queued {
                    execution_id,
                    position,
                })
            }
            Admission::Replaced { cancel } => {
                for victim in cancel {
                    match self.cancel(victim, CancelReason::Replaced, "system").await {
                        Ok(_) | Err(EngineError::UnknownExecution(_)) => {}
                        Err(err) => {
                            tracing::warn!(
                                execution_id = %victim,
                                error = %err,
                                "failed to cancel replaced execution"
                            );
                        }
                    }
                }
                start_execution(
                    inner,
                    StartParts {
                        execution_id,
                        flow_id: request.flow_id,
                        flow_version: request.flow_version,
                        scope_key,
                        definition,
                        settings,
                        dag,
                        payload: request.payload,
                        triggered_by: request.triggered_by,
                        trigger_type: request.trigger_type,
                    },
                )
                .await?;
                Ok(TriggerOutcome::Started(execution_id))
            }
            Admission::Admitted => {
                start_execution(
                    inner,
                    StartParts {
                        execution_id,
                        flow_id: request.flow_id,
                        flow_version: request.flow_version,
                        scope_key,
                        definition,
                        settings,
                        dag,
                        payload: request.payload,
                        triggered_by: request.triggered_by,
                        trigger_type: request.trigger_type,
                    },
                )
                .await?;
                Ok(TriggerOutcome::Started(execution_id))
            }
        }
    }

    /// Request cooperative cancellation.
    ///
    /// Sets the authoritative cancel flag, moves the meta to
    /// `cancelling`, and wakes in-process waiters. Running handlers
    /// observe the flag through their context; the execution reaches
    /// its terminal state once every node has drained. Idempotent.
    pub async fn cancel(
        &self,
        execution_id: ExecutionId,
        reason: CancelReason,
        by: &str,
    ) -> Result<CancelOutcome, EngineError> {
        let inner = &self.inner;
        let newly_cancelled = retried(inner, || {
            inner.store.set_cancelled(execution_id, reason, by)
        })
        .await
        .map_err(map_unknown(execution_id))?;

        if newly_cancelled {
            tracing::info!(execution_id = %execution_id, %reason, by, "cancellation requested");
            let _ = retried(inner, || {
                inner.store.set_execution_status(
                    execution_id,
                    ExecutionStatus::Running,
                    ExecutionStatus::Cancelling,
                )
            })
            .await;
            if let Some(handle) = inner.executions.get(&execution_id) {
                handle.cancellation.cancel();
            }
        }

        let states = retried(inner, || inner.store.load_node_states(execution_id))
            .await
            .map_err(map_unknown(execution_id))?;
        let running_nodes = states
            .iter()
            .filter(|s| s.status == NodeStatus::Running)
            .map(|s| s.node_id.clone())
            .collect();

        Ok(CancelOutcome {
            execution_id,
            newly_cancelled,
            running_nodes,
        })
    }

    /// Re-admit a failed execution, re-running from its failed nodes.
    ///
    /// Upstream outputs stay intact; skipped downstream nodes are
    /// re-primed unless they depend on a cancelled node.
    pub async fn retry(&self, execution_id: ExecutionId) -> Result<TriggerOutcome, EngineError> {
        let inner = &self.inner;
        let meta = inner
            .store
            .load_meta(execution_id)
            .await?
            .ok_or(EngineError::UnknownExecution(execution_id))?;
        if meta.status != ExecutionStatus::Failed {
            return Err(EngineError::NotRetryable {
                execution_id,
                status: meta.status,
            });
        }

        let parts = load_parts(inner, &meta).await?;
        let queued = QueuedTrigger {
            execution_id,
            payload: parts.payload.clone(),
            enqueued_at: Utc::now(),
            triggered_by: meta.triggered_by.clone(),
            trigger_type: TriggerType::Retry,
        };

        match inner
            .concurrency
            .admit(&parts.scope_key, &parts.settings.concurrency, queued)
            .await?
        {
            Admission::Denied { running } => Ok(TriggerOutcome::Rejected(
                RejectReason::ConcurrentDenied { running },
            )),
            Admission::QueueFull => Ok(TriggerOutcome::Rejected(RejectReason::QueueFull)),
            Admission::Queued { position } => {
                inner.pending.insert(
                    execution_id,
                    PendingStart {
                        flow_id: parts.flow_id,
                        flow_version: parts.flow_version,
                        scope_key: parts.scope_key.clone(),
                        definition: Arc::clone(&parts.definition),
                        settings: Arc::clone(&parts.settings),
                        dag: Arc::clone(&parts.dag),
                        triggered_by: meta.triggered_by.clone(),
                        trigger_type: TriggerType::Retry,
                    },
                );
                Ok(TriggerOutcome::Queued {
                    execution_id,
                    position,
                })
            }
            Admission::Replaced { cancel } => {
                for victim in cancel {
                    let _ = self.cancel(victim, CancelReason::Replaced, "system").await;
                }
                resume_failed(inner, parts).await?;
                Ok(TriggerOutcome::Started(execution_id))
            }
            Admission::Admitted => {
                resume_failed(inner, parts).await?;
                Ok(TriggerOutcome::Started(execution_id))
            }
        }
    }

    /// A point-in-time view of one execution.
    pub async fn snapshot(&self, execution_id: ExecutionId) -> Result<ExecutionSnapshot, EngineError> {
        let inner = &self.inner;
        let meta = inner
            .store
            .load_meta(execution_id)
            .await?
            .ok_or(EngineError::UnknownExecution(execution_id))?;
        let nodes = inner
            .store
            .load_node_states(execution_id)
            .await
            .map_err(map_unknown(execution_id))?;
        let pending = inner
            .store
            .pending_counters(execution_id)
            .await
            .map_err(map_unknown(execution_id))?;
        Ok(ExecutionSnapshot {
            meta,
            nodes,
            pending,
        })
    }

    /// Rebuild in-memory state for an execution found in the store
    /// after an engine restart, relaunching orphaned work.
    ///
    /// `Running` nodes whose `started_at` is older than
    /// `EngineConfig::resurrect_after` are presumed lost with the
    /// previous process and re-readied; younger ones are presumed live
    /// on another replica and left as launched.
    pub async fn recover(&self, execution_id: ExecutionId) -> Result<ExecutionSnapshot, EngineError> {
        let inner = &self.inner;
        let meta = inner
            .store
            .load_meta(execution_id)
            .await?
            .ok_or(EngineError::UnknownExecution(execution_id))?;
        if meta.status.is_terminal() {
            return self.snapshot(execution_id).await;
        }

        let parts = load_parts(inner, &meta).await?;
        let handle = register_handle(inner, &parts);

        // re-arm the flow timeout with whatever budget remains
        if let Some(flow_timeout) = parts.settings.flow_timeout {
            let elapsed = (Utc::now() - meta.started_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            let remaining = flow_timeout.saturating_sub(elapsed);
            spawn_flow_timeout(inner, execution_id, &handle, remaining);
        }

        let states = retried(inner, || inner.store.load_node_states(execution_id)).await?;
        let mut to_launch = Vec::new();
        for state in &states {
            match state.status {
                NodeStatus::Ready => to_launch.push(state.node_id.clone()),
                NodeStatus::Running => {
                    let stale = state.started_at.is_none_or(|started_at| {
                        (Utc::now() - started_at).to_std().unwrap_or(Duration::ZERO)
                            >= inner.config.resurrect_after
                    });
                    if stale {
                        let cas = retried(inner, || {
                            inner.store.set_node_status(
                                execution_id,
                                &state.node_id,
                                NodeStatus::Running,
                                NodeStatus::Ready,
                            )
                        })
                        .await?;
                        if cas.is_applied() {
                            tracing::info!(
                                execution_id = %execution_id,
                                node = %state.node_id,
                                "re-readied orphaned running node"
                            );
                            to_launch.push(state.node_id.clone());
                        }
                    }
                }
                _ => {}
            }
        }

        for node in handle.dag.schedule_order(to_launch) {
            launch_node(inner, execution_id, node).await;
        }
        check_terminal(inner, execution_id, &handle).await?;

        self.snapshot(execution_id).await
    }

    /// Drop expired executions from the store and their bus topics.
    pub async fn sweep_retention(&self) -> Result<Vec<ExecutionId>, EngineError> {
        let swept = self.inner.store.sweep_expired(Utc::now()).await?;
        for execution_id in &swept {
            self.inner.bus.remove(*execution_id);
            self.inner.executions.remove(execution_id);
        }
        Ok(swept)
    }
}

// ── lifecycle internals ─────────────────────────────────────────────

struct StartParts {
    execution_id: ExecutionId,
    flow_id: FlowId,
    flow_version: u32,
    scope_key: String,
    definition: Arc<FlowDefinition>,
    settings: Arc<FlowSettings>,
    dag: Arc<Dag>,
    payload: Value,
    triggered_by: String,
    trigger_type: TriggerType,
}

async fn retried<T, F, Fut>(inner: &SchedulerInner, op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    with_store_retry(&inner.config.store_retry, op).await
}

fn map_unknown(execution_id: ExecutionId) -> impl Fn(StoreError) -> EngineError {
    move |err| match err {
        StoreError::UnknownExecution(_) => EngineError::UnknownExecution(execution_id),
        other => EngineError::Store(other),
    }
}

fn all_dependents(dag: &Dag, node: &NodeId) -> Vec<NodeId> {
    dag.success_dependents(node)
        .union(dag.error_dependents(node))
        .cloned()
        .collect()
}

fn publish(inner: &SchedulerInner, execution_id: ExecutionId, payload: EventPayload) {
    inner
        .bus
        .publish(ExecutionEvent::now(execution_id, payload));
}

fn register_handle(inner: &SchedulerInner, parts: &StartParts) -> ExecutionHandle {
    let handle = ExecutionHandle {
        scope_key: parts.scope_key.clone(),
        policy: parts.settings.concurrency.clone(),
        definition: Arc::clone(&parts.definition),
        settings: Arc::clone(&parts.settings),
        dag: Arc::clone(&parts.dag),
        cancellation: CancellationToken::new(),
        node_permits: inner
            .config
            .per_execution_parallelism
            .map(|cap| Arc::new(Semaphore::new(cap))),
        timeout_task: Arc::new(Mutex::new(None)),
    };
    inner.executions.insert(parts.execution_id, handle.clone());
    handle
}

async fn start_execution(
    inner: &Arc<SchedulerInner>,
    parts: StartParts,
) -> Result<(), EngineError> {
    let execution_id = parts.execution_id;
    let meta = ExecutionMeta::new(
        execution_id,
        parts.flow_id,
        parts.flow_version,
        parts.dag.node_count() as u32,
        parts.triggered_by.clone(),
        parts.trigger_type,
    );

    let init = retried(inner, || {
        inner.store.init_execution(
            &meta,
            &parts.definition,
            &parts.settings,
            &parts.dag,
            &parts.payload,
            inner.config.retention,
        )
    })
    .await?;

    if let InitOutcome::AlreadyExists(prior) = init {
        if prior.status == ExecutionStatus::Failed && parts.trigger_type == TriggerType::Retry {
            // a queued retry drained: resume instead of fresh start
            return resume_failed(inner, parts).await;
        }
        tracing::warn!(
            execution_id = %execution_id,
            status = %prior.status,
            "init found existing execution records, continuing idempotently"
        );
    }

    let handle = register_handle(inner, &parts);
    tracing::info!(
        execution_id = %execution_id,
        flow_id = %parts.flow_id,
        nodes = parts.dag.node_count(),
        trigger_type = ?parts.trigger_type,
        "execution started"
    );
    publish(inner, execution_id, EventPayload::ExecutionStarted);

    if let Some(flow_timeout) = parts.settings.flow_timeout {
        spawn_flow_timeout(inner, execution_id, &handle, flow_timeout);
    }

    let roots = handle.dag.schedule_order(handle.dag.roots().iter().cloned());
    for node in roots {
        launch_node(inner, execution_id, node).await;
    }
    Ok(())
}

fn spawn_flow_timeout(
    inner: &Arc<SchedulerInner>,
    execution_id: ExecutionId,
    handle: &ExecutionHandle,
    timeout: Duration,
) {
    let scheduler_inner = Arc::clone(inner);
    let task = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        tracing::warn!(execution_id = %execution_id, "flow timeout expired");
        let scheduler = Scheduler {
            inner: scheduler_inner,
        };
        if let Err(err) = scheduler
            .cancel(execution_id, CancelReason::Timeout, "system")
            .await
        {
            tracing::debug!(execution_id = %execution_id, error = %err, "timeout cancel skipped");
        }
    });
    *handle.timeout_task.lock() = Some(task.abort_handle());
}

/// CAS a node `Ready → Running` and hand it to the executor on the
/// worker pool. A `Stale` CAS means another replica launched it.
///
/// Written as a plain fn returning a boxed future (rather than
/// `async fn`) because this function and `dispatch_dependents`
/// recurse into each other; boxing gives the recursion a concrete,
/// non-opaque return type so the compiler doesn't have to resolve a
/// cyclic auto-trait (`Send`) obligation between the two opaque
/// future types.
fn launch_node<'a>(
    inner: &'a Arc<SchedulerInner>,
    execution_id: ExecutionId,
    node: NodeId,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(launch_node_inner(inner, execution_id, node))
}

async fn launch_node_inner(inner: &Arc<SchedulerInner>, execution_id: ExecutionId, node: NodeId) {
    let Some(handle) = inner
        .executions
        .get(&execution_id)
        .map(|entry| entry.value().clone())
    else {
        return;
    };

    let cas = match retried(inner, || {
        inner
            .store
            .set_node_status(execution_id, &node, NodeStatus::Ready, NodeStatus::Running)
    })
    .await
    {
        Ok(cas) => cas,
        Err(err) => {
            fail_execution_internal(inner, execution_id, &handle, &err.to_string()).await;
            return;
        }
    };
    let state = match cas {
        CasOutcome::Applied(state) => state,
        CasOutcome::Stale(state) => {
            tracing::debug!(
                execution_id = %execution_id,
                node = %node,
                status = %state.status,
                "launch lost the ready race"
            );
            return;
        }
    };

    let _ = inner
        .store
        .patch_node(
            execution_id,
            &node,
            NodePatch::new().with_worker_id(inner.config.worker_id.clone()),
        )
        .await;

    publish(
        inner,
        execution_id,
        EventPayload::NodeStarted {
            node: node.clone(),
            attempt: state.attempt(),
        },
    );

    let task_inner = Arc::clone(inner);
    tokio::spawn(run_node_task(
        task_inner,
        handle,
        execution_id,
        node,
        state.attempt(),
    ));
}

/// Body of the spawned per-node task: acquire permits, execute the
/// node, and react to its terminal result. Split out of `launch_node`
/// as a standalone async fn so the task's future type isn't nested
/// inside `launch_node`'s own (which it indirectly recurses into via
/// `dispatch_dependents`).
async fn run_node_task(
    task_inner: Arc<SchedulerInner>,
    handle: ExecutionHandle,
    execution_id: ExecutionId,
    node: NodeId,
    attempt: u32,
) {
    let Ok(_pool_permit) = task_inner.pool.clone().acquire_owned().await else {
        return;
    };
    let _exec_permit = match &handle.node_permits {
        Some(permits) => match Arc::clone(permits).acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_closed) => return,
        },
        None => None,
    };

    let Some(node_def) = handle.definition.node(&node).cloned() else {
        let result = NodeResult::Failed {
            error: strom_execution::NodeError::new(
                strom_handler::codes::INTERNAL_ERROR,
                format!("node `{node}` missing from definition snapshot"),
            ),
            duration: None,
        };
        let _ = on_node_complete(&task_inner, execution_id, &handle, &node, result).await;
        return;
    };

    let result = task_inner
        .executor
        .execute(
            execution_id,
            &node_def,
            &handle.settings,
            handle.cancellation.child_token(),
            attempt,
        )
        .await;

    if let Err(err) = on_node_complete(&task_inner, execution_id, &handle, &node, result).await {
        fail_execution_internal(&task_inner, execution_id, &handle, &err.to_string()).await;
    }
}

/// React to one node's terminal result: record it, publish its event,
/// dispatch the policy branch, and check the terminal condition.
async fn on_node_complete(
    inner: &Arc<SchedulerInner>,
    execution_id: ExecutionId,
    handle: &ExecutionHandle,
    node: &NodeId,
    result: NodeResult,
) -> Result<(), StoreError> {
    match result {
        NodeResult::Completed { duration } => {
            let cas = retried(inner, || {
                inner.store.set_node_status(
                    execution_id,
                    node,
                    NodeStatus::Running,
                    NodeStatus::Completed,
                )
            })
            .await?;
            if !cas.is_applied() {
                tracing::warn!(execution_id = %execution_id, node = %node, "completion lost status race");
                return Ok(());
            }
            retried(inner, || {
                inner.store.patch_node(
                    execution_id,
                    node,
                    NodePatch::new().with_duration(duration),
                )
            })
            .await?;
            publish(
                inner,
                execution_id,
                EventPayload::NodeCompleted {
                    node: node.clone(),
                    duration: Some(duration),
                },
            );
            retried(inner, || {
                inner
                    .store
                    .increment_counter(execution_id, CounterField::Completed)
            })
            .await?;

            // success: fan into normal dependents; error routes off a
            // succeeded node can never fire
            let success: Vec<NodeId> = handle
                .dag
                .success_dependents(node)
                .iter()
                .cloned()
                .collect();
            dispatch_dependents(inner, execution_id, handle, success).await?;

            let dead_error_routes: Vec<NodeId> = handle
                .dag
                .error_dependents(node)
                .iter()
                .filter(|d| !handle.dag.success_dependents(node).contains(*d))
                .cloned()
                .collect();
            skip_cascade(inner, execution_id, handle, dead_error_routes).await?;
        }
        NodeResult::Failed { error, duration } => {
            let cas = retried(inner, || {
                inner.store.set_node_status(
                    execution_id,
                    node,
                    NodeStatus::Running,
                    NodeStatus::Failed,
                )
            })
            .await?;
            if !cas.is_applied() {
                tracing::warn!(execution_id = %execution_id, node = %node, "failure lost status race");
                return Ok(());
            }
            let error_routed = !handle.dag.error_dependents(node).is_empty();
            retried(inner, || {
                let mut patch = NodePatch::new()
                    .with_error(error.clone())
                    .with_error_routed(error_routed);
                if let Some(duration) = duration {
                    patch = patch.with_duration(duration);
                }
                inner.store.patch_node(execution_id, node, patch)
            })
            .await?;
            tracing::warn!(
                execution_id = %execution_id,
                node = %node,
                code = %error.code,
                error_routed,
                "node failed"
            );
            publish(
                inner,
                execution_id,
                EventPayload::NodeFailed {
                    node: node.clone(),
                    error,
                },
            );
            retried(inner, || {
                inner
                    .store
                    .increment_counter(execution_id, CounterField::Failed)
            })
            .await?;

            if error_routed {
                // the error route is taken instead of the normal
                // successors
                let error_routes: Vec<NodeId> =
                    handle.dag.error_dependents(node).iter().cloned().collect();
                dispatch_dependents(inner, execution_id, handle, error_routes).await?;

                let skipped: Vec<NodeId> = handle
                    .dag
                    .success_dependents(node)
                    .iter()
                    .filter(|d| !handle.dag.error_dependents(node).contains(*d))
                    .cloned()
                    .collect();
                skip_cascade(inner, execution_id, handle, skipped).await?;
            } else {
                skip_cascade(inner, execution_id, handle, all_dependents(&handle.dag, node))
                    .await?;
            }
        }
        NodeResult::Cancelled => {
            let cas = retried(inner, || {
                inner.store.set_node_status(
                    execution_id,
                    node,
                    NodeStatus::Running,
                    NodeStatus::Cancelled,
                )
            })
            .await?;
            if !cas.is_applied() {
                return Ok(());
            }
            publish(
                inner,
                execution_id,
                EventPayload::NodeCancelled { node: node.clone() },
            );
            retried(inner, || {
                inner
                    .store
                    .increment_counter(execution_id, CounterField::Cancelled)
            })
            .await?;

            skip_cascade(inner, execution_id, handle, all_dependents(&handle.dag, node))
                .await?;
        }
    }

    check_terminal(inner, execution_id, handle).await?;
    Ok(())
}

/// Decrement dependents' pending counters; a counter reaching zero
/// makes this task the unique launcher of that node.
async fn dispatch_dependents(
    inner: &Arc<SchedulerInner>,
    execution_id: ExecutionId,
    handle: &ExecutionHandle,
    dependents: Vec<NodeId>,
) -> Result<(), StoreError> {
    for dependent in handle.dag.schedule_order(dependents) {
        let remaining = retried(inner, || {
            inner.store.decrement_pending(execution_id, &dependent)
        })
        .await?;
        if remaining != 0 {
            continue;
        }
        let cancelled = inner.store.is_cancelled(execution_id).await.unwrap_or(false);
        if cancelled {
            // never launch under cancellation; account the node (and
            // its downstream region) so the execution still terminates
            let cas = retried(inner, || {
                inner.store.set_node_status(
                    execution_id,
                    &dependent,
                    NodeStatus::Pending,
                    NodeStatus::Cancelled,
                )
            })
            .await?;
            if cas.is_applied() {
                publish(
                    inner,
                    execution_id,
                    EventPayload::NodeCancelled {
                        node: dependent.clone(),
                    },
                );
                retried(inner, || {
                    inner
                        .store
                        .increment_counter(execution_id, CounterField::Cancelled)
                })
                .await?;
                skip_cascade(
                    inner,
                    execution_id,
                    handle,
                    all_dependents(&handle.dag, &dependent),
                )
                .await?;
            }
            continue;
        }
        let cas = retried(inner, || {
            inner.store.set_node_status(
                execution_id,
                &dependent,
                NodeStatus::Pending,
                NodeStatus::Ready,
            )
        })
        .await?;
        if cas.is_applied() {
            launch_node(inner, execution_id, dependent).await;
        }
    }
    Ok(())
}

/// Mark a downstream region `Skipped`, transitively. Each node is
/// skipped by at most one cascade (the `Pending → Skipped` CAS); a
/// lost CAS ends that branch.
async fn skip_cascade(
    inner: &Arc<SchedulerInner>,
    execution_id: ExecutionId,
    handle: &ExecutionHandle,
    seeds: Vec<NodeId>,
) -> Result<(), StoreError> {
    let mut worklist = seeds;
    while let Some(node) = worklist.pop() {
        let cas = retried(inner, || {
            inner.store.set_node_status(
                execution_id,
                &node,
                NodeStatus::Pending,
                NodeStatus::Skipped,
            )
        })
        .await?;
        if !cas.is_applied() {
            continue;
        }
        retried(inner, || {
            inner
                .store
                .increment_counter(execution_id, CounterField::Skipped)
        })
        .await?;
        tracing::debug!(execution_id = %execution_id, node = %node, "node skipped");
        worklist.extend(handle.dag.success_dependents(&node).iter().cloned());
        worklist.extend(handle.dag.error_dependents(&node).iter().cloned());
    }
    Ok(())
}

/// Decide and publish the terminal state once every node is accounted
/// for. The meta-status CAS picks the single winner across replicas.
async fn check_terminal(
    inner: &Arc<SchedulerInner>,
    execution_id: ExecutionId,
    handle: &ExecutionHandle,
) -> Result<(), StoreError> {
    let counters = retried(inner, || inner.store.read_counters(execution_id)).await?;
    if !counters.is_terminal() {
        return Ok(());
    }

    let states = retried(inner, || inner.store.load_node_states(execution_id)).await?;
    let failed_unrouted = states
        .iter()
        .any(|s| s.status == NodeStatus::Failed && !s.error_routed);
    let cancellation = retried(inner, || inner.store.cancellation(execution_id)).await?;

    let target = if failed_unrouted {
        ExecutionStatus::Failed
    } else if cancellation.is_some() {
        ExecutionStatus::Cancelled
    } else {
        ExecutionStatus::Completed
    };

    let mut won = retried(inner, || {
        inner
            .store
            .set_execution_status(execution_id, ExecutionStatus::Running, target)
    })
    .await?
    .is_applied();
    if !won {
        won = retried(inner, || {
            inner
                .store
                .set_execution_status(execution_id, ExecutionStatus::Cancelling, target)
        })
        .await?
        .is_applied();
    }
    if !won {
        return Ok(());
    }

    tracing::info!(
        execution_id = %execution_id,
        status = %target,
        completed = counters.completed,
        failed = counters.failed,
        cancelled = counters.cancelled,
        skipped = counters.skipped,
        "execution terminal"
    );

    if let Some(abort) = handle.timeout_task.lock().take() {
        abort.abort();
    }
    inner.executions.remove(&execution_id);
    retried(inner, || inner.store.mark_terminal(execution_id, Utc::now())).await?;

    let payload = match target {
        ExecutionStatus::Completed => EventPayload::ExecutionCompleted,
        ExecutionStatus::Failed => EventPayload::ExecutionFailed,
        _ => EventPayload::ExecutionCancelled {
            reason: cancellation.map_or(CancelReason::Manual, |c| c.reason),
        },
    };
    inner.bus.close(ExecutionEvent::now(execution_id, payload));

    release_and_drain(inner, &handle.scope_key, &handle.policy, execution_id).await;
    Ok(())
}

/// Release the run slot and start whatever queued trigger drains.
async fn release_and_drain(
    inner: &Arc<SchedulerInner>,
    scope_key: &str,
    policy: &ConcurrencyPolicy,
    mut release_of: ExecutionId,
) {
    loop {
        let next = match inner.concurrency.release(scope_key, policy, release_of).await {
            Ok(next) => next,
            Err(err) => {
                tracing::error!(scope_key, error = %err, "slot release failed");
                return;
            }
        };
        let Some(next) = next else { return };

        let Some((_, start)) = inner.pending.remove(&next.execution_id) else {
            // queued on another replica; without its definition we can
            // only free the slot and try the next entry
            tracing::warn!(
                execution_id = %next.execution_id,
                "drained a queued trigger with no local definition, skipping"
            );
            release_of = next.execution_id;
            continue;
        };

        let parts = StartParts {
            execution_id: next.execution_id,
            flow_id: start.flow_id,
            flow_version: start.flow_version,
            scope_key: start.scope_key,
            definition: start.definition,
            settings: start.settings,
            dag: start.dag,
            payload: next.payload,
            triggered_by: start.triggered_by,
            trigger_type: start.trigger_type,
        };
        if let Err(err) = Box::pin(start_execution(inner, parts)).await {
            tracing::error!(
                execution_id = %next.execution_id,
                error = %err,
                "failed to start drained trigger"
            );
            release_of = next.execution_id;
            continue;
        }
        return;
    }
}

/// Load the store snapshots needed to rebuild an execution handle.
async fn load_parts(
    inner: &Arc<SchedulerInner>,
    meta: &ExecutionMeta,
) -> Result<StartParts, EngineError> {
    let execution_id = meta.execution_id;
    let definition = inner
        .store
        .load_definition(execution_id)
        .await?
        .ok_or_else(|| EngineError::Corrupt(format!("no definition for {execution_id}")))?;
    let settings = inner
        .store
        .load_settings(execution_id)
        .await?
        .ok_or_else(|| EngineError::Corrupt(format!("no settings for {execution_id}")))?;
    let dag = inner
        .store
        .load_dag(execution_id)
        .await?
        .ok_or_else(|| EngineError::Corrupt(format!("no dag snapshot for {execution_id}")))?;
    let payload = inner
        .store
        .load_trigger_payload(execution_id)
        .await?
        .unwrap_or(Value::Null);
    let scope_key =
        ConcurrencyManager::scope_key(meta.flow_id, &settings.concurrency, &payload);
    Ok(StartParts {
        execution_id,
        flow_id: meta.flow_id,
        flow_version: meta.flow_version,
        scope_key,
        definition: Arc::new(definition),
        settings: Arc::new(settings),
        dag: Arc::new(dag),
        payload,
        triggered_by: meta.triggered_by.clone(),
        trigger_type: meta.trigger_type,
    })
}

/// Re-prime a failed execution: failed nodes back to `Ready`, skipped
/// nodes back to `Pending` where a live path exists, counters rebased.
async fn resume_failed(inner: &Arc<SchedulerInner>, parts: StartParts) -> Result<(), EngineError> {
    let execution_id = parts.execution_id;
    let states = retried(inner, || inner.store.load_node_states(execution_id)).await?;
    let by_id: HashMap<&NodeId, NodeStatus> =
        states.iter().map(|s| (&s.node_id, s.status)).collect();

    // plan new statuses in topological order so a skipped node knows
    // whether its upstream path is revivable
    let order = parts.dag.schedule_order(parts.dag.nodes().to_vec());
    let mut planned: HashMap<NodeId, NodeStatus> = HashMap::with_capacity(order.len());
    for node in &order {
        let current = by_id.get(node).copied().unwrap_or(NodeStatus::Skipped);
        let next = match current {
            NodeStatus::Failed => NodeStatus::Ready,
            NodeStatus::Skipped => {
                let dead_upstream = parts.dag.deps(node).iter().any(|dep| {
                    let dep_planned = planned.get(dep);
                    if matches!(
                        dep_planned,
                        Some(NodeStatus::Cancelled | NodeStatus::Skipped)
                    ) {
                        return true;
                    }
                    // an error route whose source already succeeded can
                    // never fire, so the node stays dead
                    parts.dag.error_dependents(dep).contains(node)
                        && !parts.dag.success_dependents(dep).contains(node)
                        && matches!(dep_planned, Some(NodeStatus::Completed))
                });
                if dead_upstream {
                    NodeStatus::Skipped
                } else {
                    NodeStatus::Pending
                }
            }
            other => other,
        };
        planned.insert(node.clone(), next);
    }

    let mut counters = strom_execution::NodeCounters::new(parts.dag.node_count() as u32);
    for status in planned.values() {
        match status {
            NodeStatus::Completed => counters.completed += 1,
            NodeStatus::Cancelled => counters.cancelled += 1,
            NodeStatus::Skipped => counters.skipped += 1,
            _ => {}
        }
    }

    let mut to_launch = Vec::new();
    for node in &order {
        match planned[node] {
            NodeStatus::Ready => {
                let cas = retried(inner, || {
                    inner.store.set_node_status(
                        execution_id,
                        node,
                        NodeStatus::Failed,
                        NodeStatus::Ready,
                    )
                })
                .await?;
                if cas.is_applied() {
                    retried(inner, || {
                        inner
                            .store
                            .patch_node(execution_id, node, NodePatch::reset_for_retry())
                    })
                    .await?;
                    retried(inner, || inner.store.set_pending(execution_id, node, 0)).await?;
                    to_launch.push(node.clone());
                }
            }
            NodeStatus::Pending if by_id.get(node).copied() == Some(NodeStatus::Skipped) => {
                let cas = retried(inner, || {
                    inner.store.set_node_status(
                        execution_id,
                        node,
                        NodeStatus::Skipped,
                        NodeStatus::Pending,
                    )
                })
                .await?;
                if cas.is_applied() {
                    // a dependency signals again only if it re-runs
                    let remaining = parts
                        .dag
                        .deps(node)
                        .iter()
                        .filter(|dep| {
                            matches!(
                                planned.get(*dep),
                                Some(NodeStatus::Ready | NodeStatus::Pending)
                            )
                        })
                        .count();
                    retried(inner, || {
                        inner
                            .store
                            .set_pending(execution_id, node, remaining as i64)
                    })
                    .await?;
                }
            }
            _ => {}
        }
    }

    retried(inner, || inner.store.reset_counters(execution_id, counters)).await?;
    let cas = retried(inner, || {
        inner.store.set_execution_status(
            execution_id,
            ExecutionStatus::Failed,
            ExecutionStatus::Running,
        )
    })
    .await?;
    if !cas.is_applied() {
        // another replica resumed it first
        return Ok(());
    }

    // the old topic closed with the failure; open a fresh one
    inner.bus.remove(execution_id);
    let handle = register_handle(inner, &parts);
    tracing::info!(
        execution_id = %execution_id,
        relaunching = to_launch.len(),
        "failed execution resumed"
    );
    publish(inner, execution_id, EventPayload::ExecutionStarted);
    if let Some(flow_timeout) = parts.settings.flow_timeout {
        spawn_flow_timeout(inner, execution_id, &handle, flow_timeout);
    }

    for node in handle.dag.schedule_order(to_launch) {
        launch_node(inner, execution_id, node).await;
    }
    Ok(())
}

/// Last resort when the store stays unavailable past the retry budget:
/// record the execution failed and free its slot.
async fn fail_execution_internal(
    inner: &Arc<SchedulerInner>,
    execution_id: ExecutionId,
    handle: &ExecutionHandle,
    reason: &str,
) {
    tracing::error!(execution_id = %execution_id, reason, "failing execution on internal error");
    let mut won = inner
        .store
        .set_execution_status(execution_id, ExecutionStatus::Running, ExecutionStatus::Failed)
        .await
        .map(|cas| cas.is_applied())
        .unwrap_or(false);
    if !won {
        won = inner
            .store
            .set_execution_status(
                execution_id,
                ExecutionStatus::Cancelling,
                ExecutionStatus::Failed,
            )
            .await
            .map(|cas| cas.is_applied())
            .unwrap_or(false);
    }
    if won {
        if let Some(abort) = handle.timeout_task.lock().take() {
            abort.abort();
        }
        inner.executions.remove(&execution_id);
        let _ = inner.store.mark_terminal(execution_id, Utc::now()).await;
        inner.bus.close(ExecutionEvent::now(
            execution_id,
            EventPayload::ExecutionFailed,
        ));
        release_and_drain(inner, &handle.scope_key, &handle.policy, execution_id).await;
    }
}
