#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # strom-execution
//!
//! The execution-time data model of the strom flow engine.
//!
//! This crate models what one running flow looks like — it contains no
//! orchestration logic. It defines:
//!
//! - [`ExecutionStatus`] and [`NodeStatus`] — the two state machines,
//!   with transitions validated by the [`transition`] module
//! - [`ExecutionMeta`] and [`NodeCounters`] — per-execution accounting
//! - [`NodeRunState`] and [`NodeError`] — per-node run records
//! - [`OutputValue`] — inline output data or a blob reference
//! - [`ExecutionEvent`] — the lifecycle events published on the bus
//! - [`TriggerOutcome`], [`QueuedTrigger`], [`CancelOutcome`] — the
//!   trigger/cancel surfaces
//! - [`ExecutionSnapshot`] — the point-in-time view for polling clients

pub mod event;
pub mod meta;
pub mod node;
pub mod output;
pub mod snapshot;
pub mod status;
pub mod transition;
pub mod trigger;

pub use event::{EventKind, EventPayload, ExecutionEvent};
pub use meta::{CounterField, ExecutionMeta, NodeCounters};
pub use node::{NodeError, NodeRunState, NodeStatus};
pub use output::OutputValue;
pub use snapshot::ExecutionSnapshot;
pub use status::ExecutionStatus;
pub use transition::{
    InvalidTransition, can_transition_execution, can_transition_node,
    validate_execution_transition, validate_node_transition,
};
pub use trigger::{
    CancelOutcome, CancelReason, QueuedTrigger, RejectReason, TriggerOutcome, TriggerType,
};

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
