#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # strom-handler
//!
//! The handler contract: the seam between the flow engine and the
//! implementations of individual node types.
//!
//! A [`Handler`] encapsulates one node type. The engine treats it as an
//! opaque capability with three operations: validate a node's config at
//! parse time, execute against a [`HandlerContext`] at run time, and
//! (optionally) declare input/output ports for schema checks.
//!
//! Handlers never touch engine or store state directly — the context
//! offers exactly the resolved inputs, a deadline, a cooperative
//! cancellation observer, and an opaque [`CredentialResolver`].

pub mod codes;
pub mod context;
pub mod credential;
pub mod handler;
pub mod outcome;
pub mod registry;

pub use context::HandlerContext;
pub use credential::{CredentialError, CredentialResolver, DenyAllResolver};
pub use handler::{ConfigError, Handler, PortDecl};
pub use outcome::HandlerOutcome;
pub use registry::{HandlerRegistry, RegistryError};

/// JSON object map used for configs, inputs, and outputs.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
