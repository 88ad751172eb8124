//! Definition validation and DAG construction.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use strom_core::NodeId;
use strom_handler::HandlerRegistry;

use crate::binding::BindingSource;
use crate::definition::FlowDefinition;
use crate::error::ParseError;
use crate::graph::Dag;

/// Validate a definition and derive its [`Dag`].
///
/// Checks run in a fixed order and short-circuit on the first failure:
/// id uniqueness, edge endpoints, handler registration, handler config
/// validation, cycle detection, binding-source validity. A binding may
/// target the trigger payload or any *transitive* upstream of its
/// owner — a reference to an unrelated node is rejected even though the
/// node exists.
pub fn parse(definition: &FlowDefinition, registry: &HandlerRegistry) -> Result<Dag, ParseError> {
    // 1. ids unique and non-empty
    let mut ids: HashSet<&NodeId> = HashSet::with_capacity(definition.nodes.len());
    for node in &definition.nodes {
        if node.id.is_empty() {
            return Err(ParseError::EmptyId);
        }
        if !ids.insert(&node.id) {
            return Err(ParseError::DuplicateId(node.id.clone()));
        }
    }

    // 2. every edge endpoint resolves to an existing node
    for edge in &definition.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !ids.contains(endpoint) {
                return Err(ParseError::UnknownEdgeEndpoint(endpoint.clone()));
            }
        }
    }

    // 3. + 4. handler registered, config accepted
    for node in &definition.nodes {
        let handler =
            registry
                .get(&node.node_type)
                .ok_or_else(|| ParseError::UnknownNodeType {
                    node: node.id.clone(),
                    node_type: node.node_type.clone(),
                })?;
        handler
            .validate_config(&node.config)
            .map_err(|source| ParseError::HandlerConfigRejected {
                node: node.id.clone(),
                source,
            })?;
    }

    // 5. cycle detection
    let mut graph: DiGraph<NodeId, ()> = DiGraph::new();
    let mut index: HashMap<&NodeId, NodeIndex> = HashMap::with_capacity(definition.nodes.len());
    for node in &definition.nodes {
        index.insert(&node.id, graph.add_node(node.id.clone()));
    }
    let mut deps: HashMap<NodeId, BTreeSet<NodeId>> = HashMap::new();
    let mut success_dependents: HashMap<NodeId, BTreeSet<NodeId>> = HashMap::new();
    let mut error_dependents: HashMap<NodeId, BTreeSet<NodeId>> = HashMap::new();
    for edge in &definition.edges {
        graph.add_edge(index[&edge.source], index[&edge.target], ());
        deps.entry(edge.target.clone())
            .or_default()
            .insert(edge.source.clone());
        let dependents = if edge.is_error_route() {
            &mut error_dependents
        } else {
            &mut success_dependents
        };
        dependents
            .entry(edge.source.clone())
            .or_default()
            .insert(edge.target.clone());
    }

    let topo_order =
        toposort(&graph, None).map_err(|cycle| ParseError::Cycle(graph[cycle.node_id()].clone()))?;

    // Topological layer index: roots at 0, otherwise one past the
    // deepest upstream. Only a scheduling tie-break.
    let mut layers: HashMap<NodeId, usize> = HashMap::with_capacity(definition.nodes.len());
    for idx in topo_order {
        let id = &graph[idx];
        let layer = deps
            .get(id)
            .into_iter()
            .flatten()
            .map(|dep| layers.get(dep).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        layers.insert(id.clone(), layer);
    }

    let dag = Dag::new(
        definition.nodes.iter().map(|n| n.id.clone()).collect(),
        deps,
        success_dependents,
        error_dependents,
        layers,
    );

    // 6. binding sources: trigger.* or a transitive upstream
    for node in &definition.nodes {
        let ancestors = dag.ancestors(&node.id);
        for expression in node.input_bindings.values() {
            let source =
                BindingSource::parse(expression).map_err(|err| ParseError::InvalidBinding {
                    node: node.id.clone(),
                    expression: expression.clone(),
                    reason: err.reason,
                })?;
            if let Some(source_node) = source.source_node() {
                if !ancestors.contains(source_node) {
                    return Err(ParseError::InvalidBinding {
                        node: node.id.clone(),
                        expression: expression.clone(),
                        reason: format!("node `{source_node}` is not an upstream of `{}`", node.id),
                    });
                }
            }
        }
    }

    Ok(dag)
}
