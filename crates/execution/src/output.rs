//! Node output values: inline data or blob references.

use serde::{Deserialize, Serialize};

/// One value of a node's output map.
///
/// Small values are stored inline. Values whose serialized size reaches
/// the store's blob threshold are spilled to a separate blob key and
/// replaced by a reference; the store dereferences transparently when a
/// binding is resolved, so handlers never see the reference form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputValue {
    /// Reference to a spilled value.
    BlobRef {
        /// Key of the blob holding the raw bytes.
        #[serde(rename = "$blob")]
        blob_id: String,
        /// Size of the spilled value in bytes.
        size: u64,
    },
    /// Value stored inline.
    Inline(serde_json::Value),
}

impl OutputValue {
    /// An inline value.
    pub fn inline(value: impl Into<serde_json::Value>) -> Self {
        Self::Inline(value.into())
    }

    /// A reference to a spilled value.
    pub fn blob(blob_id: impl Into<String>, size: u64) -> Self {
        Self::BlobRef {
            blob_id: blob_id.into(),
            size,
        }
    }

    /// Returns `true` for the inline form.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline(_))
    }

    /// The inline value, if present.
    #[must_use]
    pub fn as_inline(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Inline(value) => Some(value),
            Self::BlobRef { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn inline_value() {
        let value = OutputValue::inline(serde_json::json!({"rows": 3}));
        assert!(value.is_inline());
        assert_eq!(value.as_inline(), Some(&serde_json::json!({"rows": 3})));
    }

    #[test]
    fn blob_ref_value() {
        let value = OutputValue::blob("exec/node/body", 1_500_000);
        assert!(!value.is_inline());
        assert!(value.as_inline().is_none());
    }

    #[test]
    fn blob_ref_wire_format() {
        let value = OutputValue::blob("b-123", 70_000);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json, serde_json::json!({"$blob": "b-123", "size": 70_000}));
    }

    #[test]
    fn serde_distinguishes_variants() {
        let blob: OutputValue =
            serde_json::from_value(serde_json::json!({"$blob": "b", "size": 1})).unwrap();
        assert!(matches!(blob, OutputValue::BlobRef { .. }));

        let inline: OutputValue = serde_json::from_value(serde_json::json!({"x": 1})).unwrap();
        assert!(inline.is_inline());

        let scalar: OutputValue = serde_json::from_value(serde_json::json!(42)).unwrap();
        assert!(scalar.is_inline());
    }
}
