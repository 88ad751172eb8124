//! The result a handler hands back to the node executor.

use crate::JsonMap;
use crate::codes;

/// Outcome of one handler invocation.
///
/// The executor matches on this to decide what happens to the node:
/// `Success` persists the output map and completes the node; `Failure`
/// either retries (when `retryable` and attempts remain) or fails the
/// node with the carried code.
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    /// The handler finished and produced an output map.
    Success(JsonMap),

    /// The handler failed.
    Failure {
        /// Machine-readable failure code (see [`codes`](crate::codes)).
        code: String,
        /// Human-readable description.
        message: String,
        /// Whether the executor may retry under the flow's retry policy.
        retryable: bool,
    },
}

impl HandlerOutcome {
    /// Successful outcome carrying an output map.
    pub fn success(output: JsonMap) -> Self {
        Self::Success(output)
    }

    /// Successful outcome with no output.
    #[must_use]
    pub fn empty() -> Self {
        Self::Success(JsonMap::new())
    }

    /// Non-retryable failure.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            code: code.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Retryable failure.
    pub fn retryable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            code: code.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Failure reporting that the handler observed cancellation and aborted.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::failure(codes::CANCELLED, "handler observed cancellation")
    }

    /// Returns `true` for the `Success` variant.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns `true` if this is a cancellation failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Failure { code, .. } if code == codes::CANCELLED)
    }
}
