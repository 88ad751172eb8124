//! Engine configuration.

use std::time::Duration;

use strom_store::StoreRetryPolicy;

/// Tunables of one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Peak number of concurrently running nodes across all executions.
    pub worker_pool_size: usize,
    /// Optional cap on concurrently running nodes of one execution.
    pub per_execution_parallelism: Option<usize>,
    /// Bound of each scope's trigger queue.
    pub queue_bound: usize,
    /// Per-subscriber event buffer capacity.
    pub event_buffer: usize,
    /// Retention hint passed to the store at init.
    pub retention: Duration,
    /// Backoff policy for transient store failures on lifecycle steps.
    pub store_retry: StoreRetryPolicy,
    /// Identifier of this replica, recorded on launched nodes.
    pub worker_id: String,
    /// Age after which a `Running` node found during recovery is
    /// presumed orphaned and re-readied.
    pub resurrect_after: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 64,
            per_execution_parallelism: None,
            queue_bound: 1_000,
            event_buffer: 256,
            retention: Duration::from_secs(24 * 60 * 60),
            store_retry: StoreRetryPolicy::default(),
            worker_id: format!("engine-{}", uuid::Uuid::new_v4()),
            resurrect_after: Duration::from_secs(5 * 60),
        }
    }
}

impl EngineConfig {
    /// Cap the worker pool.
    #[must_use]
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size.max(1);
        self
    }

    /// Cap intra-execution parallelism.
    #[must_use]
    pub fn with_per_execution_parallelism(mut self, cap: usize) -> Self {
        self.per_execution_parallelism = Some(cap.max(1));
        self
    }

    /// Bound each scope's trigger queue.
    #[must_use]
    pub fn with_queue_bound(mut self, bound: usize) -> Self {
        self.queue_bound = bound;
        self
    }

    /// Name this replica.
    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// Override the retention hint.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Override the recovery liveness threshold.
    #[must_use]
    pub fn with_resurrect_after(mut self, age: Duration) -> Self {
        self.resurrect_after = age;
        self
    }
}
