//! The raw flow definition as handed over by the storage layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strom_core::NodeId;
use strom_handler::JsonMap;

/// Handle name of the normal (success) output of a node.
pub const MAIN_HANDLE: &str = "main";

/// Handle name marking an edge as an error route: the edge is followed
/// only when its source node fails.
pub const ERROR_HANDLE: &str = "error";

/// One node of a flow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Node id, unique within the flow.
    pub id: NodeId,
    /// Handler type string, resolved through the handler registry.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Opaque handler config, validated by the handler at parse time.
    #[serde(default)]
    pub config: JsonMap,
    /// Input name → source expression (`trigger.<path>` or
    /// `nodes.<id>.<key>`). Ordered for deterministic resolution.
    #[serde(default)]
    pub input_bindings: BTreeMap<String, String>,
}

impl NodeDefinition {
    /// A node with empty config and no bindings.
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: JsonMap::new(),
            input_bindings: BTreeMap::new(),
        }
    }

    /// Add a config entry.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Add an input binding.
    #[must_use]
    pub fn with_binding(mut self, input: impl Into<String>, source: impl Into<String>) -> Self {
        self.input_bindings.insert(input.into(), source.into());
        self
    }
}

/// One directed edge of a flow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    /// Source node id.
    pub source: NodeId,
    /// Target node id.
    pub target: NodeId,
    /// Output handle on the source; `"error"` marks an error route.
    #[serde(default = "default_handle")]
    pub source_handle: String,
    /// Input handle on the target.
    #[serde(default = "default_handle")]
    pub target_handle: String,
}

fn default_handle() -> String {
    MAIN_HANDLE.to_owned()
}

impl EdgeDefinition {
    /// A normal (success) edge.
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            source_handle: default_handle(),
            target_handle: default_handle(),
        }
    }

    /// An error-route edge, followed only when the source fails.
    pub fn error_route(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            source_handle: ERROR_HANDLE.to_owned(),
            target_handle: default_handle(),
        }
    }

    /// Returns `true` if this edge is only followed on source failure.
    #[must_use]
    pub fn is_error_route(&self) -> bool {
        self.source_handle == ERROR_HANDLE
    }
}

/// A user-supplied flow: nodes plus directed edges.
///
/// Immutable for the duration of one execution. Validation happens in
/// [`parse`](crate::parse), not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// The flow's nodes.
    pub nodes: Vec<NodeDefinition>,
    /// The flow's edges.
    pub edges: Vec<EdgeDefinition>,
}

impl FlowDefinition {
    /// Build a definition from parts.
    #[must_use]
    pub fn new(nodes: Vec<NodeDefinition>, edges: Vec<EdgeDefinition>) -> Self {
        Self { nodes, edges }
    }

    /// Look up a node definition by id.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| &n.id == id)
    }
}
