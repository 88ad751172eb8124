//! Point-in-time view of one execution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strom_core::NodeId;

use crate::meta::ExecutionMeta;
use crate::node::NodeRunState;

/// A consistent-enough view of one execution: meta, per-node state,
/// and the remaining pending counters.
///
/// Served to polling clients and to subscribers resynchronizing after
/// a `Lag` marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    /// The execution's meta record.
    pub meta: ExecutionMeta,
    /// Per-node run state, ordered by node id.
    pub nodes: Vec<NodeRunState>,
    /// Remaining unfulfilled upstream count per node.
    pub pending: BTreeMap<NodeId, i64>,
}

impl ExecutionSnapshot {
    /// Completed fraction in `0.0..=1.0` (1.0 for an empty DAG).
    #[must_use]
    pub fn progress(&self) -> f64 {
        let total = self.meta.counters.total;
        if total == 0 {
            return 1.0;
        }
        f64::from(self.meta.counters.accounted()) / f64::from(total)
    }

    /// The state of one node, if present.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&NodeRunState> {
        self.nodes.iter().find(|n| &n.node_id == id)
    }
}
