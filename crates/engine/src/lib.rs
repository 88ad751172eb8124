#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # strom-engine
//!
//! The flow execution engine: the piece that turns a validated DAG and
//! a trigger into a finished execution.
//!
//! - [`ConcurrencyManager`] decides `admit` / `reject` / `enqueue` /
//!   `preempt` per the flow's concurrency policy, coordinating through
//!   the shared store so racing replicas agree.
//! - [`Scheduler`] owns the execution lifecycle: it initialises state,
//!   launches ready nodes across a worker pool, reacts to completions
//!   with fan-in pending counters, cascades skips on failure and
//!   cancellation, detects the terminal state, and drains queued
//!   triggers.
//! - [`NodeExecutor`] runs one node: resolves its input bindings,
//!   invokes the handler under deadline and cancellation, retries
//!   retryable failures with backoff, and persists outputs.
//!
//! Everything in-memory here is a cache of store state; the store is
//! the single source of truth across engine replicas.

pub mod concurrency;
pub mod config;
pub mod error;
pub mod executor;
pub mod scheduler;

pub use concurrency::{Admission, ConcurrencyManager};
pub use config::EngineConfig;
pub use error::EngineError;
pub use executor::{NodeExecutor, NodeResult};
pub use scheduler::{Scheduler, TriggerRequest};
