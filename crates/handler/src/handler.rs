//! The handler capability trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::JsonMap;
use crate::context::HandlerContext;
use crate::outcome::HandlerOutcome;

/// A node config rejected by [`Handler::validate_config`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid config field `{field}`: {reason}")]
pub struct ConfigError {
    /// The offending config field.
    pub field: String,
    /// Why the field was rejected.
    pub reason: String,
}

impl ConfigError {
    /// Build a config error for `field`.
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A declared input or output port of a node type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDecl {
    /// Port name, referenced by input bindings or output keys.
    pub name: String,
    /// Whether the port must be bound / produced.
    #[serde(default)]
    pub required: bool,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}

impl PortDecl {
    /// A required port.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            description: None,
        }
    }

    /// An optional port.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            description: None,
        }
    }
}

/// Implementation of one node type.
///
/// Registered once at bootstrap under the node's `type` string. The
/// engine calls `validate_config` at parse time and `execute` at run
/// time; handlers observe cancellation through the context and SHOULD
/// check it between logical sub-steps.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Validate a node's opaque config map at parse time.
    ///
    /// The default accepts any config.
    fn validate_config(&self, config: &JsonMap) -> Result<(), ConfigError> {
        let _ = config;
        Ok(())
    }

    /// Execute the node against its resolved context.
    async fn execute(&self, ctx: HandlerContext) -> HandlerOutcome;

    /// Input ports this node type consumes, for schema checks.
    fn declare_inputs(&self) -> Vec<PortDecl> {
        Vec::new()
    }

    /// Output ports this node type produces, for schema checks.
    fn declare_outputs(&self) -> Vec<PortDecl> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn execute(&self, ctx: HandlerContext) -> HandlerOutcome {
            HandlerOutcome::success(ctx.inputs.clone())
        }

        fn declare_outputs(&self) -> Vec<PortDecl> {
            vec![PortDecl::required("echo")]
        }
    }

    #[test]
    fn default_validate_accepts_any_config() {
        let mut config = JsonMap::new();
        config.insert("anything".into(), serde_json::json!({"deep": [1, 2]}));
        assert!(Echo.validate_config(&config).is_ok());
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::new("url", "must be absolute");
        assert_eq!(err.to_string(), "invalid config field `url`: must be absolute");
    }

    #[test]
    fn port_decl_constructors() {
        assert!(PortDecl::required("in").required);
        assert!(!PortDecl::optional("out").required);
    }

    #[tokio::test]
    async fn echo_executes() {
        let ctx = HandlerContext::test_context();
        let outcome = Echo.execute(ctx).await;
        assert!(outcome.is_success());
    }
}
