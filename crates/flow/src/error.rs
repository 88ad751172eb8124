//! Parse-time validation errors.

use serde::{Deserialize, Serialize};
use strom_core::NodeId;
use strom_handler::ConfigError;

/// Machine-readable reason classes for [`ParseError`], surfaced to
/// triggering callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParseErrorKind {
    /// A node id is the empty string.
    EmptyId,
    /// Two nodes share an id.
    DuplicateId,
    /// An edge endpoint does not name a node of the flow.
    UnknownEdgeEndpoint,
    /// A node's type has no registered handler.
    UnknownNodeType,
    /// The handler rejected a node's config.
    HandlerConfigRejected,
    /// The definition contains a cycle.
    Cycle,
    /// An input binding is malformed or targets a non-upstream node.
    InvalidBinding,
}

/// The first offending element found while validating a definition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// A node id is the empty string.
    #[error("node id must not be empty")]
    EmptyId,

    /// Two nodes share an id.
    #[error("duplicate node id: {0}")]
    DuplicateId(NodeId),

    /// An edge endpoint does not name a node of the flow.
    #[error("edge references unknown node: {0}")]
    UnknownEdgeEndpoint(NodeId),

    /// A node's type has no registered handler.
    #[error("unknown node type `{node_type}` on node {node}")]
    UnknownNodeType {
        /// The node carrying the unknown type.
        node: NodeId,
        /// The unregistered type string.
        node_type: String,
    },

    /// The handler rejected a node's config.
    #[error("config rejected for node {node}: {source}")]
    HandlerConfigRejected {
        /// The node whose config was rejected.
        node: NodeId,
        /// The handler's rejection.
        #[source]
        source: ConfigError,
    },

    /// The definition contains a cycle; one participating node is named.
    #[error("cycle detected involving node {0}")]
    Cycle(NodeId),

    /// An input binding is malformed or targets a non-upstream node.
    #[error("invalid binding `{expression}` on node {node}: {reason}")]
    InvalidBinding {
        /// The node owning the binding.
        node: NodeId,
        /// The raw source expression.
        expression: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ParseError {
    /// The reason class of this error.
    #[must_use]
    pub fn kind(&self) -> ParseErrorKind {
        match self {
            Self::EmptyId => ParseErrorKind::EmptyId,
            Self::DuplicateId(_) => ParseErrorKind::DuplicateId,
            Self::UnknownEdgeEndpoint(_) => ParseErrorKind::UnknownEdgeEndpoint,
            Self::UnknownNodeType { .. } => ParseErrorKind::UnknownNodeType,
            Self::HandlerConfigRejected { .. } => ParseErrorKind::HandlerConfigRejected,
            Self::Cycle(_) => ParseErrorKind::Cycle,
            Self::InvalidBinding { .. } => ParseErrorKind::InvalidBinding,
        }
    }
}
