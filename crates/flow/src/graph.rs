//! The validated DAG derived from a flow definition.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use strom_core::NodeId;

/// Dependency and dependent maps of a validated flow.
///
/// Produced only by [`parse`](crate::parse); invariants (acyclicity,
/// resolved endpoints, valid binding sources) hold by construction.
/// Dependent sets are split by edge handle: success dependents follow a
/// completed node, error dependents follow a failed one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dag {
    nodes: Vec<NodeId>,
    deps: HashMap<NodeId, BTreeSet<NodeId>>,
    success_dependents: HashMap<NodeId, BTreeSet<NodeId>>,
    error_dependents: HashMap<NodeId, BTreeSet<NodeId>>,
    roots: BTreeSet<NodeId>,
    leaves: BTreeSet<NodeId>,
    layers: HashMap<NodeId, usize>,
}

static EMPTY: BTreeSet<NodeId> = BTreeSet::new();

impl Dag {
    pub(crate) fn new(
        nodes: Vec<NodeId>,
        deps: HashMap<NodeId, BTreeSet<NodeId>>,
        success_dependents: HashMap<NodeId, BTreeSet<NodeId>>,
        error_dependents: HashMap<NodeId, BTreeSet<NodeId>>,
        layers: HashMap<NodeId, usize>,
    ) -> Self {
        let roots = nodes
            .iter()
            .filter(|n| deps.get(*n).is_none_or(BTreeSet::is_empty))
            .cloned()
            .collect();
        let leaves = nodes
            .iter()
            .filter(|n| {
                success_dependents.get(*n).is_none_or(BTreeSet::is_empty)
                    && error_dependents.get(*n).is_none_or(BTreeSet::is_empty)
            })
            .cloned()
            .collect();
        Self {
            nodes,
            deps,
            success_dependents,
            error_dependents,
            roots,
            leaves,
            layers,
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All node ids, in definition order.
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Returns `true` if the DAG contains `id`.
    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.layers.contains_key(id)
    }

    /// Upstream dependencies of `id` (all incoming edges, both handles).
    #[must_use]
    pub fn deps(&self, id: &NodeId) -> &BTreeSet<NodeId> {
        self.deps.get(id).unwrap_or(&EMPTY)
    }

    /// Downstream nodes launched when `id` completes successfully.
    #[must_use]
    pub fn success_dependents(&self, id: &NodeId) -> &BTreeSet<NodeId> {
        self.success_dependents.get(id).unwrap_or(&EMPTY)
    }

    /// Downstream nodes launched when `id` fails (error routes).
    #[must_use]
    pub fn error_dependents(&self, id: &NodeId) -> &BTreeSet<NodeId> {
        self.error_dependents.get(id).unwrap_or(&EMPTY)
    }

    /// Nodes with no upstream dependencies.
    #[must_use]
    pub fn roots(&self) -> &BTreeSet<NodeId> {
        &self.roots
    }

    /// Nodes with no downstream dependents.
    #[must_use]
    pub fn leaves(&self) -> &BTreeSet<NodeId> {
        &self.leaves
    }

    /// Topological layer of `id`: 0 for roots, `1 + max(deps)` otherwise.
    #[must_use]
    pub fn layer(&self, id: &NodeId) -> usize {
        self.layers.get(id).copied().unwrap_or(0)
    }

    /// Initial pending-counter value for `id`: its upstream count.
    #[must_use]
    pub fn pending_init(&self, id: &NodeId) -> usize {
        self.deps(id).len()
    }

    /// Transitive upstream closure of `id`.
    #[must_use]
    pub fn ancestors(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut seen: HashSet<&NodeId> = HashSet::new();
        let mut stack: Vec<&NodeId> = self.deps(id).iter().collect();
        while let Some(current) = stack.pop() {
            if seen.insert(current) {
                stack.extend(self.deps(current).iter());
            }
        }
        seen.into_iter().cloned().collect()
    }

    /// Sort ids into the deterministic launch order: ascending
    /// topological layer, then ascending node id.
    #[must_use]
    pub fn schedule_order(&self, ids: impl IntoIterator<Item = NodeId>) -> Vec<NodeId> {
        let mut ordered: Vec<NodeId> = ids.into_iter().collect();
        ordered.sort_by(|a, b| self.layer(a).cmp(&self.layer(b)).then_with(|| a.cmp(b)));
        ordered
    }
}
