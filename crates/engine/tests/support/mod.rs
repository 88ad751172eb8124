//! Shared harness for engine integration tests: an in-memory engine
//! and a small registry of mock handlers.
#![allow(dead_code)] // each test binary uses a different subset

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use strom_core::{ExecutionId, FlowId};
use strom_engine::{EngineConfig, Scheduler, TriggerRequest};
use strom_eventbus::EventBus;
use strom_execution::{EventKind, EventPayload, ExecutionEvent};
use strom_flow::{EdgeDefinition, FlowDefinition, FlowSettings, NodeDefinition};
use strom_handler::{Handler, HandlerContext, HandlerOutcome, HandlerRegistry};
use strom_store::MemoryStore;

pub struct TestEngine {
    pub scheduler: Scheduler,
    pub store: Arc<MemoryStore>,
    pub bus: Arc<EventBus>,
}

/// Echoes its resolved inputs as its output.
struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn execute(&self, ctx: HandlerContext) -> HandlerOutcome {
        HandlerOutcome::success(ctx.inputs.clone())
    }
}

/// Sleeps for `config.ms` milliseconds (default 10), then succeeds.
struct Sleep;

#[async_trait]
impl Handler for Sleep {
    async fn execute(&self, ctx: HandlerContext) -> HandlerOutcome {
        let ms = ctx
            .config_value("ms")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(10);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        HandlerOutcome::success(ctx.inputs.clone())
    }
}

/// Always fails, non-retryably.
struct Fail;

#[async_trait]
impl Handler for Fail {
    async fn execute(&self, _ctx: HandlerContext) -> HandlerOutcome {
        HandlerOutcome::failure("BOOM", "configured to fail")
    }
}

/// Fails retryably for the first `failures` calls, then succeeds.
/// One call counter per handler instance.
struct Flaky {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl Handler for Flaky {
    async fn execute(&self, _ctx: HandlerContext) -> HandlerOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            HandlerOutcome::retryable("FLAKY", "transient failure")
        } else {
            HandlerOutcome::empty()
        }
    }
}

/// Polls the cancellation observer every 5 ms for up to 2 s.
struct PollCancel;

#[async_trait]
impl Handler for PollCancel {
    async fn execute(&self, ctx: HandlerContext) -> HandlerOutcome {
        for _ in 0..400 {
            if ctx.is_cancelled() {
                return HandlerOutcome::cancelled();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        HandlerOutcome::empty()
    }
}

pub fn registry() -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register("echo", Arc::new(Echo)).unwrap();
    registry.register("sleep", Arc::new(Sleep)).unwrap();
    registry.register("fail", Arc::new(Fail)).unwrap();
    registry
        .register(
            "flaky2",
            Arc::new(Flaky {
                failures: 2,
                calls: AtomicU32::new(0),
            }),
        )
        .unwrap();
    registry
        .register(
            "flaky-forever",
            Arc::new(Flaky {
                failures: u32::MAX,
                calls: AtomicU32::new(0),
            }),
        )
        .unwrap();
    registry
        .register(
            "fail-once",
            Arc::new(FailOnce {
                calls: AtomicU32::new(0),
            }),
        )
        .unwrap();
    registry.register("poll-cancel", Arc::new(PollCancel)).unwrap();
    Arc::new(registry)
}

/// Fails (non-retryably) on its first call only; succeeds afterwards.
/// Lets a test fail an execution, then retry it to completion.
struct FailOnce {
    calls: AtomicU32,
}

#[async_trait]
impl Handler for FailOnce {
    async fn execute(&self, _ctx: HandlerContext) -> HandlerOutcome {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            HandlerOutcome::failure("FIRST_RUN", "fails on the first run")
        } else {
            HandlerOutcome::empty()
        }
    }
}

pub fn engine() -> TestEngine {
    engine_with(EngineConfig::default())
}

pub fn engine_with(config: EngineConfig) -> TestEngine {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::with_buffer(config.event_buffer));
    let scheduler = Scheduler::new(
        Arc::clone(&store) as Arc<dyn strom_store::StateStore>,
        registry(),
        Arc::clone(&bus),
        config,
    );
    TestEngine {
        scheduler,
        store,
        bus,
    }
}

/// `RUST_LOG=strom_engine=debug cargo test …` shows the scheduler's
/// decisions inline with test output.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn linear(types: &[(&str, &str)]) -> FlowDefinition {
    let nodes = types
        .iter()
        .map(|(id, ty)| NodeDefinition::new(*id, *ty))
        .collect();
    let edges = types
        .windows(2)
        .map(|pair| EdgeDefinition::new(pair[0].0, pair[1].0))
        .collect();
    FlowDefinition::new(nodes, edges)
}

pub fn diamond(b_ms: u64, c_ms: u64) -> FlowDefinition {
    FlowDefinition::new(
        vec![
            NodeDefinition::new("a", "echo"),
            NodeDefinition::new("b", "sleep").with_config("ms", serde_json::json!(b_ms)),
            NodeDefinition::new("c", "sleep").with_config("ms", serde_json::json!(c_ms)),
            NodeDefinition::new("d", "echo"),
        ],
        vec![
            EdgeDefinition::new("a", "b"),
            EdgeDefinition::new("a", "c"),
            EdgeDefinition::new("b", "d"),
            EdgeDefinition::new("c", "d"),
        ],
    )
}

pub fn request(definition: FlowDefinition) -> TriggerRequest {
    TriggerRequest::new(FlowId::new(), definition).with_triggered_by("tester")
}

pub fn request_with(definition: FlowDefinition, settings: FlowSettings) -> TriggerRequest {
    request(definition).with_settings(settings)
}

/// `(kind, node)` pairs for readable assertions.
pub fn timeline(events: &[ExecutionEvent]) -> Vec<(EventKind, Option<String>)> {
    events
        .iter()
        .map(|e| (e.kind(), e.node().map(ToString::to_string)))
        .collect()
}

pub fn index_of(events: &[ExecutionEvent], kind: EventKind, node: &str) -> usize {
    events
        .iter()
        .position(|e| e.kind() == kind && e.node().map(strom_core::NodeId::as_str) == Some(node))
        .unwrap_or_else(|| panic!("no {kind:?} event for node {node}"))
}

pub fn count_node_started(events: &[ExecutionEvent], node: &str) -> usize {
    events
        .iter()
        .filter(|e| {
            matches!(
                &e.payload,
                EventPayload::NodeStarted { node: n, .. } if n.as_str() == node
            )
        })
        .count()
}

/// Await the terminal meta of an execution, polling its snapshot.
pub async fn wait_terminal(engine: &TestEngine, execution_id: ExecutionId) {
    for _ in 0..400 {
        if let Ok(snapshot) = engine.scheduler.snapshot(execution_id).await {
            if snapshot.meta.status.is_terminal() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("execution {execution_id} did not reach a terminal state");
}
