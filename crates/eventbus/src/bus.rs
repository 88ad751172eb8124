//! Topic registry and subscriptions.

use std::sync::Arc;

use dashmap::DashMap;
use futures::Stream;
use parking_lot::Mutex;
use strom_core::ExecutionId;
use strom_execution::{EventPayload, ExecutionEvent};
use tokio::sync::broadcast;

/// Default per-subscriber buffer capacity.
pub const DEFAULT_BUFFER: usize = 256;

struct Topic {
    state: Arc<Mutex<TopicState>>,
}

/// The sender is dropped at close so live receivers drain their buffer
/// and then observe end-of-stream.
///
/// `history` holds the most recent `buffer` events so a subscriber
/// attaching mid-execution catches up from the start; once the history
/// itself has dropped events, the catch-up opens with a `Lag` marker
/// telling the subscriber to refetch a snapshot.
struct TopicState {
    tx: Option<broadcast::Sender<ExecutionEvent>>,
    history: std::collections::VecDeque<ExecutionEvent>,
    dropped: u64,
    buffer: usize,
}

impl TopicState {
    fn open(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            tx: Some(tx),
            history: std::collections::VecDeque::with_capacity(buffer),
            dropped: 0,
            buffer,
        }
    }

    fn record(&mut self, event: ExecutionEvent) {
        if self.history.len() == self.buffer {
            self.history.pop_front();
            self.dropped += 1;
        }
        self.history.push_back(event);
    }
}

/// In-process event bus with one broadcast topic per execution.
pub struct EventBus {
    buffer: usize,
    topics: DashMap<ExecutionId, Topic>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// A bus with the default subscriber buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    /// A bus with an explicit per-subscriber buffer capacity.
    #[must_use]
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            topics: DashMap::new(),
        }
    }

    fn topic_state(&self, execution_id: ExecutionId) -> Arc<Mutex<TopicState>> {
        Arc::clone(
            &self
                .topics
                .entry(execution_id)
                .or_insert_with(|| Topic {
                    state: Arc::new(Mutex::new(TopicState::open(self.buffer))),
                })
                .state,
        )
    }

    /// Publish an event to its execution's topic.
    ///
    /// Events published after the topic closed are dropped.
    pub fn publish(&self, event: ExecutionEvent) {
        let state = self.topic_state(event.execution_id);
        let mut state = state.lock();
        if state.tx.is_none() {
            tracing::warn!(
                execution_id = %event.execution_id,
                kind = ?event.kind(),
                "dropping event published after topic close"
            );
            return;
        }
        if let Some(tx) = &state.tx {
            // no live subscribers is fine
            let _ = tx.send(event.clone());
        }
        state.record(event);
    }

    /// Publish the terminal event and close the topic.
    ///
    /// Live subscribers drain their buffered events and then observe
    /// end-of-stream; the history (terminal event included) stays
    /// retained for later subscribers until [`remove`](Self::remove).
    pub fn close(&self, final_event: ExecutionEvent) {
        let state = self.topic_state(final_event.execution_id);
        let mut state = state.lock();
        if let Some(tx) = state.tx.take() {
            let _ = tx.send(final_event.clone());
            state.record(final_event);
        }
    }

    /// Subscribe to one execution's events.
    ///
    /// The subscription first replays the topic's retained history
    /// (opening with a `Lag` marker when the history itself already
    /// dropped events), then follows live publishes in order. After the
    /// topic closed, only the replay is delivered, ending with the
    /// terminal event.
    #[must_use]
    pub fn subscribe(&self, execution_id: ExecutionId) -> Subscription {
        let state = self.topic_state(execution_id);
        let state = state.lock();
        Subscription {
            execution_id,
            pending_lag: (state.dropped > 0).then_some(state.dropped),
            backlog: state.history.iter().cloned().collect(),
            rx: state.tx.as_ref().map(broadcast::Sender::subscribe),
        }
    }

    /// Drop an execution's topic (retention sweep).
    pub fn remove(&self, execution_id: ExecutionId) {
        self.topics.remove(&execution_id);
    }

    /// Number of live topics.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("buffer", &self.buffer)
            .field("topics", &self.topics.len())
            .finish()
    }
}

/// A subscriber's ordered view of one execution's events: retained
/// history first, then live publishes.
///
/// Dropping the subscription unsubscribes.
pub struct Subscription {
    execution_id: ExecutionId,
    pending_lag: Option<u64>,
    backlog: std::collections::VecDeque<ExecutionEvent>,
    rx: Option<broadcast::Receiver<ExecutionEvent>>,
}

impl Subscription {
    /// The next event, or `None` at end-of-stream.
    ///
    /// When this subscriber's buffer overflowed (or it attached after
    /// the retained history was truncated), a synthetic `Lag { missed }`
    /// event is returned in place of the dropped ones.
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        if let Some(missed) = self.pending_lag.take() {
            return Some(ExecutionEvent::now(
                self.execution_id,
                EventPayload::Lag { missed },
            ));
        }
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        match self.rx.as_mut()?.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => Some(ExecutionEvent::now(
                self.execution_id,
                EventPayload::Lag { missed },
            )),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Collect events until (and including) the execution-terminal one.
    ///
    /// Returns early on end-of-stream.
    pub async fn collect_until_terminal(&mut self) -> Vec<ExecutionEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            let terminal = event.is_execution_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    /// Adapt the subscription into a [`Stream`] of events.
    pub fn into_stream(self) -> impl Stream<Item = ExecutionEvent> {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("execution_id", &self.execution_id)
            .field("backlog", &self.backlog.len())
            .field("live", &self.rx.is_some())
            .finish()
    }
}
