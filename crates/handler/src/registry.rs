//! Process-wide registry mapping node `type` strings to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::handler::Handler;

/// Errors from handler registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A handler is already registered under the type string.
    ///
    /// Registration is a one-shot bootstrap step; a duplicate type is a
    /// configuration error, not an overwrite.
    #[error("handler type already registered: {0}")]
    Duplicate(String),
}

/// Registry of node-type handlers, populated once at bootstrap.
///
/// Handlers are stored as `Arc<dyn Handler>` so concurrent executions
/// share one instance.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use strom_handler::{Handler, HandlerContext, HandlerOutcome, HandlerRegistry};
///
/// struct NoOp;
///
/// #[async_trait]
/// impl Handler for NoOp {
///     async fn execute(&self, _ctx: HandlerContext) -> HandlerOutcome {
///         HandlerOutcome::empty()
///     }
/// }
///
/// let mut registry = HandlerRegistry::new();
/// registry.register("noop", Arc::new(NoOp)).unwrap();
///
/// assert!(registry.contains("noop"));
/// assert!(registry.register("noop", Arc::new(NoOp)).is_err());
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `node_type`.
    pub fn register(
        &mut self,
        node_type: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RegistryError> {
        let node_type = node_type.into();
        if self.handlers.contains_key(&node_type) {
            return Err(RegistryError::Duplicate(node_type));
        }
        self.handlers.insert(node_type, handler);
        Ok(())
    }

    /// Look up a handler by node type.
    #[must_use]
    pub fn get(&self, node_type: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(node_type)
    }

    /// Whether a handler is registered for `node_type`.
    #[must_use]
    pub fn contains(&self, node_type: &str) -> bool {
        self.handlers.contains_key(node_type)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Iterate over registered `(type, handler)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Handler>)> {
        self.handlers.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("count", &self.handlers.len())
            .field("types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::context::HandlerContext;
    use crate::outcome::HandlerOutcome;

    struct Dummy;

    #[async_trait]
    impl Handler for Dummy {
        async fn execute(&self, _ctx: HandlerContext) -> HandlerOutcome {
            HandlerOutcome::empty()
        }
    }

    #[test]
    fn empty_registry() {
        let reg = HandlerRegistry::new();
        assert!(reg.is_empty());
        assert_eq!(reg.len(), 0);
        assert!(reg.get("anything").is_none());
    }

    #[test]
    fn register_and_get() {
        let mut reg = HandlerRegistry::new();
        reg.register("http.request", Arc::new(Dummy)).unwrap();

        assert_eq!(reg.len(), 1);
        assert!(reg.contains("http.request"));
        assert!(reg.get("http.request").is_some());
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut reg = HandlerRegistry::new();
        reg.register("x", Arc::new(Dummy)).unwrap();
        let err = reg.register("x", Arc::new(Dummy)).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("x".into()));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn iter_types() {
        let mut reg = HandlerRegistry::new();
        reg.register("a", Arc::new(Dummy)).unwrap();
        reg.register("b", Arc::new(Dummy)).unwrap();

        let mut types: Vec<&str> = reg.iter().map(|(t, _)| t).collect();
        types.sort_unstable();
        assert_eq!(types, vec!["a", "b"]);
    }

    #[test]
    fn debug_format() {
        let mut reg = HandlerRegistry::new();
        reg.register("test", Arc::new(Dummy)).unwrap();
        let debug = format!("{reg:?}");
        assert!(debug.contains("HandlerRegistry"));
        assert!(debug.contains("count: 1"));
    }
}
