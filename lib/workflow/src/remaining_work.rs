//! The scheduler's view of what is left to run.
//!
//! Starts as a copy of the workflow graph. A completed node is removed, which
//! frees its dependents. A failed node keeps a self-edge, so neither it nor
//! anything downstream ever has zero incoming edges again. Ready means zero
//! incoming edges and not already executing.

use crate::graph::WorkflowGraph;
use conduit_core::NodeId;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};

/// Nodes of one execution that have not completed.
#[derive(Debug, Clone)]
pub struct RemainingWorkGraph {
    graph: DiGraph<NodeId, ()>,
    node_to_index: HashMap<NodeId, NodeIndex>,
    /// Definition order; graph indices shift as nodes are removed.
    position: HashMap<NodeId, usize>,
    executing: HashSet<NodeId>,
    failed: HashSet<NodeId>,
}

impl RemainingWorkGraph {
    /// Every node of the workflow, none started.
    #[must_use]
    pub fn from_workflow(workflow_graph: &WorkflowGraph) -> Self {
        let mut graph = DiGraph::new();
        let mut node_to_index = HashMap::new();
        let mut position = HashMap::new();

        for (i, node) in workflow_graph.nodes().enumerate() {
            let idx = graph.add_node(node.id.clone());
            node_to_index.insert(node.id.clone(), idx);
            position.insert(node.id.clone(), i);
        }

        for node in workflow_graph.nodes() {
            let source_idx = node_to_index[&node.id];
            for successor in workflow_graph.successors(&node.id) {
                let target_idx = node_to_index[&successor.id];
                graph.add_edge(source_idx, target_idx, ());
            }
        }

        Self {
            graph,
            node_to_index,
            position,
            executing: HashSet::new(),
            failed: HashSet::new(),
        }
    }

    /// Ignored for nodes no longer in the graph.
    pub fn mark_executing(&mut self, node_id: &NodeId) {
        if self.node_to_index.contains_key(node_id) {
            self.executing.insert(node_id.clone());
        }
    }

    /// Removes a node, releasing its dependents.
    pub fn mark_completed(&mut self, node_id: &NodeId) {
        self.executing.remove(node_id);
        if let Some(idx) = self.node_to_index.remove(node_id) {
            self.graph.remove_node(idx);
            // removal invalidates the last index
            self.rebuild_index_map();
        }
    }

    pub fn mark_failed(&mut self, node_id: &NodeId) {
        self.executing.remove(node_id);
        if let Some(&idx) = self.node_to_index.get(node_id) {
            self.graph.add_edge(idx, idx, ());
            self.failed.insert(node_id.clone());
        }
    }

    fn in_definition_order<'a>(&self, nodes: impl Iterator<Item = &'a NodeId>) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = nodes.cloned().collect();
        nodes.sort_by_key(|node_id| self.position.get(node_id).copied().unwrap_or(usize::MAX));
        nodes
    }

    /// Nodes that can start now, in definition order.
    #[must_use]
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        self.in_definition_order(
            self.graph
                .node_indices()
                .filter(|&idx| self.graph.edges_directed(idx, Direction::Incoming).next().is_none())
                .filter_map(|idx| self.graph.node_weight(idx))
                .filter(|node_id| !self.executing.contains(*node_id)),
        )
    }

    /// Returns true once any node has failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Nodes that never started and never will without more scheduling, in
    /// definition order. Failed and executing nodes are excluded.
    #[must_use]
    pub fn unfinished_nodes(&self) -> Vec<NodeId> {
        self.in_definition_order(
            self.graph
                .node_weights()
                .filter(|id| !self.failed.contains(*id) && !self.executing.contains(*id)),
        )
    }

    /// Nodes downstream of a failure, excluding the failed nodes themselves.
    #[must_use]
    pub fn blocked_nodes(&self) -> HashSet<NodeId> {
        let mut blocked = HashSet::new();
        for &start in self.failed.iter().filter_map(|id| self.node_to_index.get(id)) {
            let mut dfs = Dfs::new(&self.graph, start);
            while let Some(idx) = dfs.next(&self.graph) {
                if let Some(node_id) = self.graph.node_weight(idx)
                    && !self.failed.contains(node_id)
                {
                    blocked.insert(node_id.clone());
                }
            }
        }
        blocked
    }

    fn rebuild_index_map(&mut self) {
        self.node_to_index = self
            .graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx).map(|id| (id.clone(), idx)))
            .collect();
    }
}
