//! Node execution: input resolution, handler invocation, retries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::Value;
use strom_core::{ExecutionId, NodeId};
use strom_eventbus::EventBus;
use strom_execution::{EventPayload, ExecutionEvent, NodeError};
use strom_flow::{BindingSource, FlowSettings, NodeDefinition, walk_path};
use strom_handler::{
    CredentialResolver, HandlerContext, HandlerOutcome, HandlerRegistry, JsonMap, codes,
};
use strom_store::StateStore;
use tokio_util::sync::CancellationToken;

/// Terminal outcome of one node execution (after any in-executor retries).
#[derive(Debug, Clone)]
pub enum NodeResult {
    /// The handler succeeded; its output is persisted.
    Completed {
        /// Wall-clock duration of the final attempt.
        duration: Duration,
    },
    /// The handler failed, or an input could not be resolved.
    Failed {
        /// The error to record on the node.
        error: NodeError,
        /// Wall-clock duration of the final attempt, when one ran.
        duration: Option<Duration>,
    },
    /// Cancellation was observed before or during execution.
    Cancelled,
}

/// Runs one node to completion: resolves inputs, invokes the handler
/// under its deadline, and retries retryable failures in place.
///
/// Retries never re-enter the scheduler's dispatch path, so the
/// single-launcher invariant holds per execution; the stored retry
/// count and a fresh `NODE_STARTED` event record each extra attempt.
pub struct NodeExecutor {
    store: Arc<dyn StateStore>,
    registry: Arc<HandlerRegistry>,
    bus: Arc<EventBus>,
    credentials: Arc<dyn CredentialResolver>,
}

impl NodeExecutor {
    /// Build an executor.
    pub fn new(
        store: Arc<dyn StateStore>,
        registry: Arc<HandlerRegistry>,
        bus: Arc<EventBus>,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Self {
        Self {
            store,
            registry,
            bus,
            credentials,
        }
    }

    /// Execute `node` for `execution_id`.
    ///
    /// `attempt` is the 1-based attempt number of the first invocation
    /// made here (greater than 1 when a recovered node already retried).
    pub async fn execute(
        &self,
        execution_id: ExecutionId,
        node: &NodeDefinition,
        settings: &FlowSettings,
        cancellation: CancellationToken,
        mut attempt: u32,
    ) -> NodeResult {
        let retry = &settings.retry;
        loop {
            // cancellation short-circuit: local token first, then the
            // authoritative (loosely consistent) store flag
            if cancellation.is_cancelled()
                || self
                    .store
                    .is_cancelled(execution_id)
                    .await
                    .unwrap_or(false)
            {
                return NodeResult::Cancelled;
            }

            let inputs = match self.resolve_inputs(execution_id, node).await {
                Ok(inputs) => inputs,
                Err(error) => {
                    return NodeResult::Failed {
                        error,
                        duration: None,
                    };
                }
            };

            let Some(handler) = self.registry.get(&node.node_type) else {
                // parse guarantees registration; a miss here means the
                // registry changed under a live execution
                return NodeResult::Failed {
                    error: NodeError::new(
                        codes::INTERNAL_ERROR,
                        format!("no handler registered for type `{}`", node.node_type),
                    ),
                    duration: None,
                };
            };

            let deadline = settings.node_timeout.map(|t| Instant::now() + t);
            let ctx = HandlerContext::new(
                execution_id,
                node.id.clone(),
                node.config.clone(),
                inputs,
                deadline,
                cancellation.child_token(),
                Arc::clone(&self.credentials),
            );

            let started = Instant::now();
            let invocation = std::panic::AssertUnwindSafe(handler.execute(ctx)).catch_unwind();
            let caught = match settings.node_timeout {
                Some(limit) => match tokio::time::timeout(limit, invocation).await {
                    Ok(caught) => caught,
                    Err(_elapsed) => {
                        tracing::warn!(
                            execution_id = %execution_id,
                            node = %node.id,
                            timeout_ms = limit.as_millis() as u64,
                            "node deadline expired"
                        );
                        return NodeResult::Failed {
                            error: NodeError::new(codes::NODE_TIMEOUT, "node deadline expired"),
                            duration: Some(started.elapsed()),
                        };
                    }
                },
                None => invocation.await,
            };
            let duration = started.elapsed();

            let outcome = caught.unwrap_or_else(|_panic| HandlerOutcome::Failure {
                code: codes::INTERNAL_ERROR.to_owned(),
                message: "handler panicked".to_owned(),
                retryable: false,
            });

            match outcome {
                HandlerOutcome::Success(output) => {
                    if let Err(err) = self.store.put_output(execution_id, &node.id, output).await {
                        return NodeResult::Failed {
                            error: NodeError::new(codes::INTERNAL_ERROR, err.to_string()),
                            duration: Some(duration),
                        };
                    }
                    return NodeResult::Completed { duration };
                }
                HandlerOutcome::Failure {
                    code,
                    message,
                    retryable,
                } => {
                    if code == codes::CANCELLED {
                        return NodeResult::Cancelled;
                    }
                    if retryable && attempt < retry.attempts() {
                        let backoff = retry.backoff_for(attempt - 1);
                        tracing::debug!(
                            execution_id = %execution_id,
                            node = %node.id,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            code,
                            "retrying node after backoff"
                        );
                        tokio::select! {
                            () = cancellation.cancelled() => return NodeResult::Cancelled,
                            () = tokio::time::sleep(backoff) => {}
                        }
                        if let Err(err) = self
                            .store
                            .patch_node(
                                execution_id,
                                &node.id,
                                strom_store::NodePatch::new().with_retry_count(attempt),
                            )
                            .await
                        {
                            return NodeResult::Failed {
                                error: NodeError::new(codes::INTERNAL_ERROR, err.to_string()),
                                duration: Some(duration),
                            };
                        }
                        attempt += 1;
                        self.bus.publish(ExecutionEvent::now(
                            execution_id,
                            EventPayload::NodeStarted {
                                node: node.id.clone(),
                                attempt,
                            },
                        ));
                        continue;
                    }
                    return NodeResult::Failed {
                        error: NodeError::new(code, message),
                        duration: Some(duration),
                    };
                }
            }
        }
    }

    /// Resolve the node's input bindings against the trigger payload
    /// and upstream outputs. Missing trigger paths bind `null`; a
    /// missing upstream output fails the node.
    async fn resolve_inputs(
        &self,
        execution_id: ExecutionId,
        node: &NodeDefinition,
    ) -> Result<JsonMap, NodeError> {
        if node.input_bindings.is_empty() {
            return Ok(JsonMap::new());
        }

        let payload = self
            .store
            .load_trigger_payload(execution_id)
            .await
            .map_err(|err| NodeError::new(codes::INTERNAL_ERROR, err.to_string()))?
            .unwrap_or(Value::Null);

        let mut inputs = JsonMap::new();
        for (name, expression) in &node.input_bindings {
            let source = BindingSource::parse(expression)
                .map_err(|err| NodeError::new(codes::BINDING_SYNTAX, err.to_string()))?;
            let value = match source {
                BindingSource::Trigger(path) => {
                    walk_path(&payload, &path).cloned().unwrap_or(Value::Null)
                }
                BindingSource::NodeOutput {
                    node: source_node,
                    key,
                    path,
                } => {
                    let value = self
                        .store
                        .get_output_value(execution_id, &source_node, &key)
                        .await
                        .map_err(|err| NodeError::new(codes::INTERNAL_ERROR, err.to_string()))?
                        .ok_or_else(|| {
                            NodeError::new(
                                codes::BINDING_UNRESOLVED,
                                format!("no output `{key}` from node `{source_node}`"),
                            )
                        })?;
                    if path.is_empty() {
                        value
                    } else {
                        walk_path(&value, &path).cloned().ok_or_else(|| {
                            NodeError::new(
                                codes::BINDING_UNRESOLVED,
                                unresolved_path(&source_node, &key, &path),
                            )
                        })?
                    }
                }
            };
            inputs.insert(name.clone(), value);
        }
        Ok(inputs)
    }
}

fn unresolved_path(node: &NodeId, key: &str, path: &[String]) -> String {
    format!(
        "path `{}` not found in output `{key}` of node `{node}`",
        path.join(".")
    )
}
