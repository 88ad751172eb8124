//! Unique identifiers for strom entities.
//!
//! Flow and execution identifiers are uuid-backed, `Copy`, and
//! stack-allocated (16 bytes). Node identifiers come from the flow
//! definition itself and are string keys, unique within one flow.
//! All types serialize as plain strings and support `Display`,
//! `FromStr`, `Eq`, `Ord`, and `Hash`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when an identifier fails to parse from a string.
#[derive(Debug, thiserror::Error)]
#[error("invalid {kind} id: {source}")]
pub struct IdParseError {
    kind: &'static str,
    #[source]
    source: uuid::Error,
}

macro_rules! define_uuid_id {
    ($(#[$doc:meta])* $name:ident, $kind:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random (v4) identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// The zero-valued identifier.
            #[must_use]
            pub fn nil() -> Self {
                Self(Uuid::nil())
            }

            /// Returns `true` if this is the zero-valued identifier.
            #[must_use]
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            /// Parse an identifier from its canonical string form.
            pub fn parse(s: &str) -> Result<Self, IdParseError> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|source| IdParseError { kind: $kind, source })
            }

            /// The underlying uuid.
            #[must_use]
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<Uuid> for $name {
            fn from(raw: Uuid) -> Self {
                Self(raw)
            }
        }
    };
}

define_uuid_id!(
    /// Identifier of a flow definition.
    FlowId,
    "flow"
);

define_uuid_id!(
    /// Identifier of one execution of a flow.
    ExecutionId,
    "execution"
);

/// Identifier of a node within one flow definition.
///
/// Node ids are author-chosen strings; the parser enforces uniqueness
/// and non-emptiness within a definition. `Ord` on node ids is the
/// scheduling tie-break, so ordering is plain lexicographic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap a raw node id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the id is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn flow_id_new_is_non_nil() {
        assert!(!FlowId::new().is_nil());
    }

    #[test]
    fn execution_id_new_is_non_nil() {
        assert!(!ExecutionId::new().is_nil());
    }

    #[test]
    fn nil_is_zero_valued() {
        let id = ExecutionId::nil();
        assert!(id.is_nil());
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn parse_valid_uuid_string() {
        let id = FlowId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert!(!id.is_nil());
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn parse_invalid_string_errors() {
        let err = FlowId::parse("not-a-uuid").unwrap_err();
        assert!(err.to_string().contains("invalid flow id"));
    }

    #[test]
    fn from_str_roundtrip() {
        let id = ExecutionId::new();
        let back: ExecutionId = id.to_string().parse().unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn copy_semantics() {
        let a = ExecutionId::new();
        let b = a;
        assert_eq!(a, b);
    }

    #[test]
    fn serde_as_plain_string() {
        let id = FlowId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"550e8400-e29b-41d4-a716-446655440000\"");
        let back: FlowId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn node_id_display_and_order() {
        let a = NodeId::from("a");
        let b = NodeId::from("b");
        assert_eq!(a.to_string(), "a");
        assert!(a < b);
    }

    #[test]
    fn node_id_empty() {
        assert!(NodeId::from("").is_empty());
        assert!(!NodeId::from("x").is_empty());
    }

    #[test]
    fn node_id_serde_transparent() {
        let id = NodeId::from("fetch-users");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"fetch-users\"");
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn node_id_borrow_allows_str_lookup() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(NodeId::from("n1"), 1);
        assert_eq!(map.get("n1"), Some(&1));
    }

    #[test]
    fn different_id_types_are_incompatible() {
        // FlowId and ExecutionId are distinct types — passing one where
        // the other is expected would be a compile error.
        fn accepts_flow(_id: FlowId) {}
        fn accepts_execution(_id: ExecutionId) {}
        accepts_flow(FlowId::new());
        accepts_execution(ExecutionId::new());
    }
}
