#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # strom-eventbus
//!
//! In-process fan-out of execution lifecycle events.
//!
//! Topics are keyed by execution id. Within one execution, events are
//! delivered to every subscriber in publish order; across executions
//! there is no ordering guarantee. Subscribers get a bounded buffer —
//! when it overflows, the oldest events are dropped and a synthetic
//! [`Lag`](strom_execution::EventPayload::Lag) marker is delivered so
//! the subscriber can refetch a snapshot and resume.
//!
//! A topic closes with the execution's terminal event; subscribers that
//! arrive later receive the retained terminal event synthetically,
//! then end-of-stream.

pub mod bus;

pub use bus::{EventBus, Subscription};
