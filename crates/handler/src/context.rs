//! Runtime context handed to a handler for one node execution.

use std::sync::Arc;
use std::time::{Duration, Instant};

use strom_core::{ExecutionId, NodeId};
use tokio_util::sync::CancellationToken;

use crate::JsonMap;
use crate::credential::{CredentialError, CredentialResolver, DenyAllResolver};

/// Everything a handler may see for one node execution.
///
/// Built by the node executor after input resolution. Handlers **must**
/// poll [`is_cancelled`](Self::is_cancelled) (or await
/// [`cancelled`](Self::cancelled)) in long-running loops to support
/// cooperative cancellation, and should respect
/// [`remaining`](Self::remaining) for their own sub-deadlines.
#[derive(Clone)]
pub struct HandlerContext {
    /// Execution this node belongs to.
    pub execution_id: ExecutionId,
    /// The node being executed.
    pub node_id: NodeId,
    /// The node's opaque config from the flow definition.
    pub config: JsonMap,
    /// Inputs resolved from upstream outputs and trigger data.
    pub inputs: JsonMap,
    /// Deadline for this invocation, if a node timeout is configured.
    pub deadline: Option<Instant>,
    /// Cancellation observer — true once the execution is cancelled.
    pub cancellation: CancellationToken,
    credentials: Arc<dyn CredentialResolver>,
}

impl HandlerContext {
    /// Build a context.
    pub fn new(
        execution_id: ExecutionId,
        node_id: NodeId,
        config: JsonMap,
        inputs: JsonMap,
        deadline: Option<Instant>,
        cancellation: CancellationToken,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Self {
        Self {
            execution_id,
            node_id,
            config,
            inputs,
            deadline,
            cancellation,
            credentials,
        }
    }

    /// Look up a resolved input by name.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&serde_json::Value> {
        self.inputs.get(name)
    }

    /// Look up a config value by key.
    #[must_use]
    pub fn config_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.config.get(key)
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// Time left until the node deadline, `None` when no deadline is set.
    ///
    /// Returns `Some(Duration::ZERO)` once the deadline has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Resolve a credential through the opaque resolver.
    ///
    /// The engine never logs or persists the returned values; neither
    /// should handlers.
    pub async fn credential(&self, credential_id: &str) -> Result<JsonMap, CredentialError> {
        self.credentials.resolve(credential_id).await
    }

    /// A minimal context for handler unit tests.
    #[doc(hidden)]
    #[must_use]
    pub fn test_context() -> Self {
        Self::new(
            ExecutionId::new(),
            NodeId::from("test"),
            JsonMap::new(),
            JsonMap::new(),
            None,
            CancellationToken::new(),
            Arc::new(DenyAllResolver),
        )
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("execution_id", &self.execution_id)
            .field("node_id", &self.node_id)
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("deadline", &self.deadline)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn input_lookup() {
        let mut ctx = HandlerContext::test_context();
        ctx.inputs.insert("x".into(), serde_json::json!(1));
        assert_eq!(ctx.input("x"), Some(&serde_json::json!(1)));
        assert_eq!(ctx.input("missing"), None);
    }

    #[test]
    fn remaining_without_deadline() {
        let ctx = HandlerContext::test_context();
        assert!(ctx.remaining().is_none());
    }

    #[test]
    fn remaining_after_deadline_is_zero() {
        let mut ctx = HandlerContext::test_context();
        ctx.deadline = Some(Instant::now() - Duration::from_millis(5));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn cancellation_observed() {
        let ctx = HandlerContext::test_context();
        assert!(!ctx.is_cancelled());
        ctx.cancellation.cancel();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn credential_denied_by_default() {
        let ctx = HandlerContext::test_context();
        assert!(ctx.credential("any").await.is_err());
    }

    #[test]
    fn debug_omits_values() {
        let mut ctx = HandlerContext::test_context();
        ctx.inputs.insert("secretish".into(), serde_json::json!("value"));
        let debug = format!("{ctx:?}");
        assert!(debug.contains("secretish"));
        assert!(!debug.contains("\"value\""));
    }
}
