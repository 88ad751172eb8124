#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # strom-flow
//!
//! Flow definitions and their validated DAG form.
//!
//! - [`FlowDefinition`] — the raw, user-supplied set of nodes and edges
//! - [`FlowSettings`] — concurrency policy, timeouts, retry policy
//! - [`BindingSource`] — parsed input-binding expressions
//!   (`trigger.<path>` / `nodes.<id>.<key>`)
//! - [`Dag`] — dependency/dependent maps, roots, leaves, topological
//!   layers
//! - [`parse`] — the validating parser producing a [`Dag`] or the first
//!   offending element as a [`ParseError`]

pub mod binding;
pub mod definition;
pub mod error;
pub mod graph;
pub mod parser;
pub mod settings;

pub use binding::{BindingSource, BindingSyntaxError, walk_path};
pub use definition::{EdgeDefinition, FlowDefinition, NodeDefinition};
pub use error::{ParseError, ParseErrorKind};
pub use graph::Dag;
pub use parser::parse;
pub use settings::{
    ConcurrencyMode, ConcurrencyPolicy, ConcurrencyScope, FlowSettings, RetryPolicy,
};

/// Serde helper for `Duration` serialized as integer milliseconds.
pub(crate) mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (duration.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Serde helper for `Option<Duration>` serialized as milliseconds.
pub(crate) mod serde_millis_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => (d.as_millis() as u64).serialize(s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let opt: Option<u64> = Option::deserialize(d)?;
        Ok(opt.map(Duration::from_millis))
    }
}
