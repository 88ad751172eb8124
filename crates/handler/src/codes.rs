//! Node-local error codes crossing the handler/engine boundary.
//!
//! Handlers report failures with free-form codes; the constants here are
//! the ones the engine itself produces or gives special treatment. A
//! handler that wants its failure recorded as a cancellation returns
//! [`CANCELLED`].

/// An input binding referenced an upstream output that was never produced.
pub const BINDING_UNRESOLVED: &str = "BINDING_UNRESOLVED";

/// An input binding expression could not be parsed.
pub const BINDING_SYNTAX: &str = "BINDING_SYNTAX";

/// The node exceeded its per-node deadline.
pub const NODE_TIMEOUT: &str = "NODE_TIMEOUT";

/// The credential resolver had no credential under the requested id.
pub const CREDENTIAL_NOT_FOUND: &str = "CREDENTIAL_NOT_FOUND";

/// The node observed cooperative cancellation and aborted.
pub const CANCELLED: &str = "CANCELLED";

/// An unexpected failure inside the engine or a panicking handler.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
