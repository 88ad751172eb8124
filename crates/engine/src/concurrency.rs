//! Trigger admission under the flow's concurrency policy.

use std::sync::Arc;

use serde_json::Value;
use strom_core::{ExecutionId, FlowId};
use strom_flow::{ConcurrencyMode, ConcurrencyPolicy, ConcurrencyScope, walk_path};
use strom_execution::QueuedTrigger;
use strom_store::{QueuePush, SlotAcquire, StateStore, StoreResult};

/// What the manager decided for one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Run now; a slot is held (except under `allow`, which does no
    /// accounting).
    Admitted,
    /// Rejected: the cap is reached under `deny`.
    Denied {
        /// Executions currently holding the scope's slots.
        running: Vec<ExecutionId>,
    },
    /// Parked in the scope's FIFO queue.
    Queued {
        /// 1-based queue position.
        position: usize,
    },
    /// Rejected: the queue is at its bound.
    QueueFull,
    /// Admitted by preemption: the listed executions must be cancelled
    /// with reason `replaced`. Their slots free asynchronously.
    Replaced {
        /// Executions to cancel.
        cancel: Vec<ExecutionId>,
    },
}

/// Decides `admit` / `reject` / `enqueue` / `preempt` for triggers.
///
/// Owns no state of its own: run-sets and queues live in the shared
/// store, and admission uses the store's atomic check-and-insert so
/// racing triggers on different replicas agree. With a cap of 1,
/// exactly one of two racing triggers wins.
pub struct ConcurrencyManager {
    store: Arc<dyn StateStore>,
    queue_bound: usize,
}

impl ConcurrencyManager {
    /// A manager over `store` with the given queue bound.
    pub fn new(store: Arc<dyn StateStore>, queue_bound: usize) -> Self {
        Self { store, queue_bound }
    }

    /// The concurrency-control key for one trigger.
    ///
    /// `flow` scope keys on the flow id alone. `key` scope appends the
    /// value of the policy's dotted `key_expression` evaluated against
    /// the trigger payload; a missing path or non-scalar value yields
    /// the empty string, which collapses to flow-level control.
    #[must_use]
    pub fn scope_key(flow_id: FlowId, policy: &ConcurrencyPolicy, payload: &Value) -> String {
        match policy.scope {
            ConcurrencyScope::Flow => flow_id.to_string(),
            ConcurrencyScope::Key => {
                let key = policy
                    .key_expression
                    .as_deref()
                    .and_then(|expression| {
                        let path: Vec<&str> =
                            expression.split('.').filter(|s| !s.is_empty()).collect();
                        walk_path(payload, &path)
                    })
                    .map(scalar_key)
                    .unwrap_or_default();
                format!("{flow_id}:{key}")
            }
        }
    }

    /// Decide admission for `trigger` under `policy`.
    pub async fn admit(
        &self,
        scope_key: &str,
        policy: &ConcurrencyPolicy,
        trigger: QueuedTrigger,
    ) -> StoreResult<Admission> {
        let execution_id = trigger.execution_id;
        let cap = policy.cap();
        match policy.mode {
            ConcurrencyMode::Allow => Ok(Admission::Admitted),
            ConcurrencyMode::Deny => {
                match self
                    .store
                    .try_acquire_slot(scope_key, execution_id, cap)
                    .await?
                {
                    SlotAcquire::Acquired => Ok(Admission::Admitted),
                    SlotAcquire::Busy(running) => {
                        tracing::debug!(
                            scope_key,
                            execution_id = %execution_id,
                            running = running.len(),
                            "trigger denied at concurrency cap"
                        );
                        Ok(Admission::Denied { running })
                    }
                }
            }
            ConcurrencyMode::Queue => {
                match self
                    .store
                    .try_acquire_slot(scope_key, execution_id, cap)
                    .await?
                {
                    SlotAcquire::Acquired => Ok(Admission::Admitted),
                    SlotAcquire::Busy(_) => {
                        match self
                            .store
                            .queue_push(scope_key, trigger, self.queue_bound)
                            .await?
                        {
                            QueuePush::Position(position) => {
                                tracing::debug!(scope_key, position, "trigger enqueued");
                                Ok(Admission::Queued { position })
                            }
                            QueuePush::Full => Ok(Admission::QueueFull),
                        }
                    }
                }
            }
            ConcurrencyMode::Replace => {
                let cancel = self.store.runset_members(scope_key).await?;
                // the new execution takes a slot immediately; the
                // replaced ones free theirs when their cancellation
                // completes
                self.store.add_slot(scope_key, execution_id).await?;
                tracing::debug!(
                    scope_key,
                    execution_id = %execution_id,
                    replaced = cancel.len(),
                    "trigger admitted by replacement"
                );
                Ok(Admission::Replaced { cancel })
            }
        }
    }

    /// Release an execution's slot and, under `queue` mode, hand back
    /// the next queued trigger (its slot already acquired).
    pub async fn release(
        &self,
        scope_key: &str,
        policy: &ConcurrencyPolicy,
        execution_id: ExecutionId,
    ) -> StoreResult<Option<QueuedTrigger>> {
        if policy.mode == ConcurrencyMode::Allow {
            return Ok(None);
        }
        let next = self
            .store
            .release_and_pop(scope_key, execution_id, policy.cap())
            .await?;
        if let Some(next) = &next {
            tracing::debug!(
                scope_key,
                next = %next.execution_id,
                "queued trigger drained"
            );
        }
        Ok(next)
    }
}

fn scalar_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}
