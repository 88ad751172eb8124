//! Input-binding source expressions.
//!
//! A binding source addresses either the trigger payload
//! (`trigger.<path>`) or an upstream node's output
//! (`nodes.<id>.<key>`, optionally followed by a deeper path into the
//! output value).

use serde_json::Value;
use strom_core::NodeId;

/// A binding expression that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid binding expression `{expression}`: {reason}")]
pub struct BindingSyntaxError {
    /// The offending expression.
    pub expression: String,
    /// Why it was rejected.
    pub reason: String,
}

impl BindingSyntaxError {
    fn new(expression: &str, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.to_owned(),
            reason: reason.into(),
        }
    }
}

/// A parsed binding source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingSource {
    /// A path into the trigger payload; empty means the whole payload.
    Trigger(Vec<String>),
    /// An output key of an upstream node.
    NodeOutput {
        /// The upstream node.
        node: NodeId,
        /// The output key under that node's output map.
        key: String,
        /// Optional deeper path into the output value.
        path: Vec<String>,
    },
}

impl BindingSource {
    /// Parse a source expression.
    pub fn parse(expression: &str) -> Result<Self, BindingSyntaxError> {
        let mut segments = expression.split('.');
        let root = segments.next().unwrap_or_default();
        let rest: Vec<&str> = segments.collect();

        if rest.iter().any(|s| s.is_empty()) {
            return Err(BindingSyntaxError::new(expression, "empty path segment"));
        }

        match root {
            "trigger" => Ok(Self::Trigger(
                rest.into_iter().map(str::to_owned).collect(),
            )),
            "nodes" => {
                let [node, key, path @ ..] = rest.as_slice() else {
                    return Err(BindingSyntaxError::new(
                        expression,
                        "expected `nodes.<id>.<key>`",
                    ));
                };
                Ok(Self::NodeOutput {
                    node: NodeId::from(*node),
                    key: (*key).to_owned(),
                    path: path.iter().map(|s| (*s).to_owned()).collect(),
                })
            }
            "" => Err(BindingSyntaxError::new(expression, "empty expression")),
            other => Err(BindingSyntaxError::new(
                expression,
                format!("unknown root `{other}`, expected `trigger` or `nodes`"),
            )),
        }
    }

    /// The upstream node this binding depends on, if any.
    #[must_use]
    pub fn source_node(&self) -> Option<&NodeId> {
        match self {
            Self::Trigger(_) => None,
            Self::NodeOutput { node, .. } => Some(node),
        }
    }
}

/// Walk a dotted path into a JSON value.
///
/// Object segments index by key; array segments index by parsed
/// position. Returns `None` as soon as a segment does not resolve.
#[must_use]
pub fn walk_path<'a, S: AsRef<str>>(value: &'a Value, path: &[S]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn parse_trigger_path() {
        let source = BindingSource::parse("trigger.order.id").unwrap();
        assert_eq!(
            source,
            BindingSource::Trigger(vec!["order".into(), "id".into()])
        );
        assert!(source.source_node().is_none());
    }

    #[test]
    fn parse_bare_trigger_is_whole_payload() {
        assert_eq!(
            BindingSource::parse("trigger").unwrap(),
            BindingSource::Trigger(vec![])
        );
    }

    #[test]
    fn parse_node_output() {
        let source = BindingSource::parse("nodes.fetch.body").unwrap();
        assert_eq!(
            source,
            BindingSource::NodeOutput {
                node: NodeId::from("fetch"),
                key: "body".into(),
                path: vec![],
            }
        );
        assert_eq!(source.source_node(), Some(&NodeId::from("fetch")));
    }

    #[test]
    fn parse_node_output_with_deep_path() {
        let source = BindingSource::parse("nodes.fetch.body.items.0").unwrap();
        assert_eq!(
            source,
            BindingSource::NodeOutput {
                node: NodeId::from("fetch"),
                key: "body".into(),
                path: vec!["items".into(), "0".into()],
            }
        );
    }

    #[rstest]
    #[case("")]
    #[case("nodes")]
    #[case("nodes.only-id")]
    #[case("trigger..x")]
    #[case("payload.x")]
    fn parse_rejects(#[case] expression: &str) {
        assert!(BindingSource::parse(expression).is_err());
    }

    #[test]
    fn syntax_error_display_carries_expression() {
        let err = BindingSource::parse("payload.x").unwrap_err();
        assert!(err.to_string().contains("payload.x"));
    }

    #[test]
    fn walk_objects_and_arrays() {
        let value = serde_json::json!({"a": {"b": [10, {"c": 42}]}});
        assert_eq!(
            walk_path(&value, &["a", "b", "1", "c"]),
            Some(&serde_json::json!(42))
        );
        assert_eq!(walk_path(&value, &["a", "b", "0"]), Some(&serde_json::json!(10)));
    }

    #[test]
    fn walk_missing_segment() {
        let value = serde_json::json!({"a": 1});
        assert_eq!(walk_path(&value, &["b"]), None);
        assert_eq!(walk_path(&value, &["a", "deeper"]), None);
    }

    #[test]
    fn walk_empty_path_is_identity() {
        let value = serde_json::json!({"a": 1});
        assert_eq!(walk_path::<&str>(&value, &[]), Some(&value));
    }
}
