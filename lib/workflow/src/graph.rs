//! Workflow graph implementation using petgraph.
//!
//! Workflows are directed graphs where:
//! - Nodes are workflow steps bound to connectors
//! - Edges are connections from an upstream node to a downstream node
//!
//! A [`WorkflowGraph`] is only built from definitions whose node IDs are
//! unique and whose connections all resolve; cycles are allowed at build
//! time and reported by [`WorkflowGraph::topological_order`].

use crate::definition::GraphDefinition;
use crate::edge::Connection;
use crate::error::GraphError;
use crate::node::Node;
use conduit_core::{ConnectionId, NodeId};
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use std::collections::{HashMap, HashSet, VecDeque};

/// A workflow graph using petgraph's directed graph.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    /// The underlying directed graph. Edge weights are connection IDs.
    graph: DiGraph<Node, ConnectionId>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    /// Builds a graph from a definition.
    ///
    /// Node order and connection order are preserved: predecessors are always
    /// reported in the order their connections were defined.
    ///
    /// # Errors
    ///
    /// Returns an error if a node ID repeats or a connection references a
    /// node that is not in the definition.
    pub fn build(definition: &GraphDefinition) -> Result<Self, GraphError> {
        let mut graph = DiGraph::with_capacity(definition.nodes.len(), definition.connections.len());
        let mut node_index_map = HashMap::with_capacity(definition.nodes.len());

        for node in &definition.nodes {
            if node_index_map.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode {
                    node_id: node.id.clone(),
                });
            }
            let index = graph.add_node(node.clone());
            node_index_map.insert(node.id.clone(), index);
        }

        for Connection {
            id,
            source_id,
            target_id,
        } in &definition.connections
        {
            let source = node_index_map
                .get(source_id)
                .ok_or_else(|| GraphError::NodeNotFound {
                    node_id: source_id.clone(),
                })?;
            let target = node_index_map
                .get(target_id)
                .ok_or_else(|| GraphError::NodeNotFound {
                    node_id: target_id.clone(),
                })?;
            graph.add_edge(*source, *target, *id);
        }

        Ok(Self {
            graph,
            node_index_map,
        })
    }

    /// Returns a node by its ID.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns all nodes in definition order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Returns the position of a node in definition order.
    #[must_use]
    pub fn position(&self, node_id: &NodeId) -> Option<usize> {
        self.node_index_map.get(node_id).map(|index| index.index())
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns nodes that have no incoming edges (entry points).
    pub fn entry_nodes(&self) -> Vec<&Node> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, Direction::Incoming).count() == 0)
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Returns nodes that have no outgoing edges (terminal nodes).
    pub fn terminal_nodes(&self) -> Vec<&Node> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, Direction::Outgoing).count() == 0)
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    fn neighbors(&self, node_id: &NodeId, direction: Direction) -> Vec<&Node> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };

        let mut edges: Vec<(EdgeIndex, NodeIndex)> = self
            .graph
            .edges_directed(index, direction)
            .map(|edge| {
                let other = match direction {
                    Direction::Incoming => edge.source(),
                    Direction::Outgoing => edge.target(),
                };
                (edge.id(), other)
            })
            .collect();
        // petgraph walks adjacency lists newest-first
        edges.sort_by_key(|(edge, _)| *edge);

        edges
            .into_iter()
            .filter_map(|(_, other)| self.graph.node_weight(other))
            .collect()
    }

    /// Returns the predecessors (upstream nodes) of a node in connection order.
    #[must_use]
    pub fn predecessors(&self, node_id: &NodeId) -> Vec<&Node> {
        self.neighbors(node_id, Direction::Incoming)
    }

    /// Returns the successors (downstream nodes) of a node in connection order.
    #[must_use]
    pub fn successors(&self, node_id: &NodeId) -> Vec<&Node> {
        self.neighbors(node_id, Direction::Outgoing)
    }

    /// Computes an execution order in which every node follows all of its
    /// predecessors.
    ///
    /// Uses Kahn's algorithm; among nodes that become ready at the same time,
    /// definition order wins, so the result is deterministic.
    ///
    /// # Errors
    ///
    /// Returns `CycleDetected` with the nodes that could not be scheduled.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| self.graph.edges_directed(idx, Direction::Incoming).count())
            .collect();

        let mut ready: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.graph.node_count());

        while let Some(idx) = ready.pop_front() {
            order.push(self.graph[idx].id.clone());

            let mut released: Vec<NodeIndex> = Vec::new();
            for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
                let target = edge.target();
                in_degree[target.index()] -= 1;
                if in_degree[target.index()] == 0 {
                    released.push(target);
                }
            }
            released.sort();
            ready.extend(released);
        }

        if order.len() == self.graph.node_count() {
            return Ok(order);
        }

        let scheduled: HashSet<&NodeId> = order.iter().collect();
        let nodes = self
            .graph
            .node_weights()
            .map(|n| n.id.clone())
            .filter(|id| !scheduled.contains(id))
            .collect();
        Err(GraphError::CycleDetected { nodes })
    }

    /// Returns every node reachable from any of the given starting nodes,
    /// including the starting nodes themselves.
    #[must_use]
    pub fn reachable_from<'a>(&self, starts: impl IntoIterator<Item = &'a NodeId>) -> HashSet<NodeId> {
        let mut reached = HashSet::new();
        for start in starts {
            let Some(&index) = self.node_index_map.get(start) else {
                continue;
            };
            let mut bfs = Bfs::new(&self.graph, index);
            while let Some(idx) = bfs.next(&self.graph) {
                reached.insert(self.graph[idx].id.clone());
            }
        }
        reached
    }
}
