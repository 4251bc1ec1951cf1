//! Structural validation of workflow graphs.
//!
//! Validation never mutates or rejects storage: the result is reported to
//! the editor alongside the saved graph, and only execution refuses to run
//! an invalid one.
//!
//! Errors are checked in this order:
//! 1. the graph has nodes and node IDs are unique
//! 2. every connector exists and matches the node's role
//! 3. every configuration passes its connector's validation
//! 4. every connection resolves, is not repeated, and does not feed a source
//! 5. the graph has no cycle

use crate::definition::GraphDefinition;
use crate::edge::Connection;
use crate::error::GraphError;
use crate::graph::WorkflowGraph;
use crate::node::Node;
use conduit_connector::{Connector, ConnectorRegistry};
use conduit_core::{ConnectionId, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Machine-readable category of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    EmptyWorkflow,
    DuplicateNode,
    UnknownConnector,
    RoleMismatch,
    InvalidConfig,
    DanglingConnection,
    SelfLoop,
    DuplicateConnection,
    SourceHasInput,
    Cycle,
    IsolatedNode,
    Unreachable,
    NoDownstream,
    /// A node's output schema could not be inferred.
    SchemaInference,
}

/// One problem found in a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<ConnectionId>,
    /// Offending configuration field, for `invalid_config`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ValidationIssue {
    #[must_use]
    pub fn new(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            node_id: None,
            connection_id: None,
            field: None,
        }
    }

    #[must_use]
    pub fn node(mut self, node_id: &NodeId) -> Self {
        self.node_id = Some(node_id.clone());
        self
    }

    #[must_use]
    pub fn connection(mut self, connection_id: ConnectionId) -> Self {
        self.connection_id = Some(connection_id);
        self
    }

    #[must_use]
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome of validating a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Builds a result; the graph is valid when there are no errors.
    #[must_use]
    pub fn from_issues(errors: Vec<ValidationIssue>, warnings: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Returns true if any error carries the given code.
    #[must_use]
    pub fn has_error(&self, code: IssueCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    /// Returns true if any warning carries the given code.
    #[must_use]
    pub fn has_warning(&self, code: IssueCode) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "graph is valid"),
            [only] => write!(f, "{only}"),
            [first, rest @ ..] => write!(f, "{first} (and {} more errors)", rest.len()),
        }
    }
}

/// Checks graphs against the connector registry.
#[derive(Debug, Clone)]
pub struct GraphValidator {
    registry: Arc<ConnectorRegistry>,
}

impl GraphValidator {
    #[must_use]
    pub fn new(registry: Arc<ConnectorRegistry>) -> Self {
        Self { registry }
    }

    /// Validates a graph definition.
    #[must_use]
    pub fn validate(&self, graph: &GraphDefinition) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if graph.is_empty() {
            errors.push(ValidationIssue::new(
                IssueCode::EmptyWorkflow,
                "workflow has no nodes",
            ));
            return ValidationResult::from_issues(errors, warnings);
        }

        let mut seen: HashSet<&NodeId> = HashSet::new();
        let mut unique: Vec<&Node> = Vec::with_capacity(graph.nodes.len());
        for node in &graph.nodes {
            if seen.insert(&node.id) {
                unique.push(node);
            } else {
                errors.push(
                    ValidationIssue::new(
                        IssueCode::DuplicateNode,
                        format!("duplicate node id '{}'", node.id),
                    )
                    .node(&node.id),
                );
            }
        }

        let mut resolved: Vec<(&Node, Arc<dyn Connector>)> = Vec::with_capacity(unique.len());
        for &node in &unique {
            let Some(connector) = self.registry.get(&node.connector_id) else {
                errors.push(
                    ValidationIssue::new(
                        IssueCode::UnknownConnector,
                        format!(
                            "node '{}' uses unknown connector '{}'",
                            node.id, node.connector_id
                        ),
                    )
                    .node(&node.id),
                );
                continue;
            };
            if connector.connector_type() != node.role {
                errors.push(
                    ValidationIssue::new(
                        IssueCode::RoleMismatch,
                        format!(
                            "node '{}' has role '{}' but connector '{}' is a {}",
                            node.id,
                            node.role,
                            node.connector_id,
                            connector.connector_type()
                        ),
                    )
                    .node(&node.id),
                );
            }
            resolved.push((node, connector));
        }

        for (node, connector) in &resolved {
            if let Err(e) = connector.validate(&node.config) {
                errors.push(
                    ValidationIssue::new(
                        IssueCode::InvalidConfig,
                        format!("node '{}': {e}", node.id),
                    )
                    .node(&node.id)
                    .field(e.field),
                );
            }
        }

        let mut pairs: HashSet<(&NodeId, &NodeId)> = HashSet::new();
        let mut usable: Vec<Connection> = Vec::with_capacity(graph.connections.len());
        for connection in &graph.connections {
            let mut dangling = false;
            for (end, node_id) in [("source", &connection.source_id), ("target", &connection.target_id)] {
                if !seen.contains(node_id) {
                    dangling = true;
                    errors.push(
                        ValidationIssue::new(
                            IssueCode::DanglingConnection,
                            format!("connection references unknown {end} node '{node_id}'"),
                        )
                        .connection(connection.id),
                    );
                }
            }
            if dangling {
                continue;
            }

            if connection.is_self_loop() {
                errors.push(
                    ValidationIssue::new(
                        IssueCode::SelfLoop,
                        format!("node '{}' is connected to itself", connection.source_id),
                    )
                    .node(&connection.source_id)
                    .connection(connection.id),
                );
            }

            if !pairs.insert((&connection.source_id, &connection.target_id)) {
                errors.push(
                    ValidationIssue::new(
                        IssueCode::DuplicateConnection,
                        format!(
                            "duplicate connection from '{}' to '{}'",
                            connection.source_id, connection.target_id
                        ),
                    )
                    .connection(connection.id),
                );
                continue;
            }

            let feeds_source = unique
                .iter()
                .any(|n| n.id == connection.target_id && n.is_source());
            if feeds_source {
                errors.push(
                    ValidationIssue::new(
                        IssueCode::SourceHasInput,
                        format!("source node '{}' cannot have inputs", connection.target_id),
                    )
                    .node(&connection.target_id)
                    .connection(connection.id),
                );
            }

            usable.push(connection.clone());
        }

        let definition = GraphDefinition::new(unique.iter().map(|n| (*n).clone()).collect(), usable);
        let Ok(built) = WorkflowGraph::build(&definition) else {
            return ValidationResult::from_issues(errors, warnings);
        };

        if let Err(GraphError::CycleDetected { nodes }) = built.topological_order() {
            let names: Vec<&str> = nodes.iter().map(NodeId::as_str).collect();
            errors.push(ValidationIssue::new(
                IssueCode::Cycle,
                format!("workflow contains a cycle through nodes: {}", names.join(", ")),
            ));
        }

        Self::collect_warnings(&built, &mut warnings);
        ValidationResult::from_issues(errors, warnings)
    }

    fn collect_warnings(graph: &WorkflowGraph, warnings: &mut Vec<ValidationIssue>) {
        if graph.node_count() < 2 {
            return;
        }

        let sources: Vec<&NodeId> = graph.nodes().filter(|n| n.is_source()).map(|n| &n.id).collect();
        let reached = graph.reachable_from(sources.iter().copied());

        for node in graph.nodes() {
            let downstream = graph.successors(&node.id);

            if node.is_source() {
                if downstream.is_empty() {
                    warnings.push(
                        ValidationIssue::new(
                            IssueCode::NoDownstream,
                            format!("source node '{}' has no downstream nodes", node.id),
                        )
                        .node(&node.id),
                    );
                }
                continue;
            }

            if downstream.is_empty() && graph.predecessors(&node.id).is_empty() {
                warnings.push(
                    ValidationIssue::new(
                        IssueCode::IsolatedNode,
                        format!("node '{}' is not connected", node.id),
                    )
                    .node(&node.id),
                );
            } else if !reached.contains(&node.id) {
                warnings.push(
                    ValidationIssue::new(
                        IssueCode::Unreachable,
                        format!("node '{}' is not reachable from any source node", node.id),
                    )
                    .node(&node.id),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeRole;
    use serde_json::json;

    fn validator() -> GraphValidator {
        GraphValidator::new(Arc::new(ConnectorRegistry::with_builtins()))
    }

    fn id(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn source(s: &str) -> Node {
        Node::new(id(s), "static_source", NodeRole::Source).with_config(json!({"records": [{"id": 1}]}))
    }

    fn sink(s: &str) -> Node {
        Node::new(id(s), "log_destination", NodeRole::Sink)
    }

    fn transform(s: &str) -> Node {
        Node::new(id(s), "transform_processor", NodeRole::Transform)
            .with_config(json!({"transformations": [{"type": "trim", "source_field": "id"}]}))
    }

    fn connect(from: &str, to: &str) -> Connection {
        Connection::new(id(from), id(to))
    }

    #[test]
    fn accepts_linear_graph() {
        let graph = GraphDefinition::new(
            vec![source("a"), transform("b"), sink("c")],
            vec![connect("a", "b"), connect("b", "c")],
        );
        let result = validator().validate(&graph);
        assert!(result.valid, "{result}");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn empty_graph_is_invalid() {
        let result = validator().validate(&GraphDefinition::default());
        assert!(!result.valid);
        assert!(result.has_error(IssueCode::EmptyWorkflow));
    }

    #[test]
    fn reports_unknown_connector_and_bad_config() {
        let graph = GraphDefinition::new(
            vec![
                Node::new(id("a"), "ftp_source", NodeRole::Source),
                Node::new(id("b"), "static_source", NodeRole::Source),
            ],
            vec![],
        );
        let result = validator().validate(&graph);

        assert!(result.has_error(IssueCode::UnknownConnector));
        let config_error = result
            .errors
            .iter()
            .find(|e| e.code == IssueCode::InvalidConfig)
            .expect("config error");
        assert_eq!(config_error.node_id, Some(id("b")));
        assert_eq!(config_error.field.as_deref(), Some("records"));
        // connector errors come before config errors
        assert_eq!(result.errors[0].code, IssueCode::UnknownConnector);
    }

    #[test]
    fn reports_role_mismatch() {
        let graph = GraphDefinition::new(
            vec![Node::new(id("a"), "log_destination", NodeRole::Source)],
            vec![],
        );
        assert!(validator().validate(&graph).has_error(IssueCode::RoleMismatch));
    }

    #[test]
    fn reports_dangling_and_duplicate_connections() {
        let graph = GraphDefinition::new(
            vec![source("a"), sink("b"), source("a")],
            vec![connect("a", "b"), connect("a", "b"), connect("a", "ghost")],
        );
        let result = validator().validate(&graph);

        assert!(result.has_error(IssueCode::DuplicateNode));
        assert!(result.has_error(IssueCode::DuplicateConnection));
        let dangling = result
            .errors
            .iter()
            .find(|e| e.code == IssueCode::DanglingConnection)
            .expect("dangling");
        assert!(dangling.message.contains("ghost"));
        assert_eq!(dangling.connection_id, Some(graph.connections[2].id));
    }

    #[test]
    fn rejects_cycle() {
        let graph = GraphDefinition::new(
            vec![source("s"), transform("a"), transform("b")],
            vec![connect("s", "a"), connect("a", "b"), connect("b", "a")],
        );
        let result = validator().validate(&graph);

        assert!(!result.valid);
        let cycle = result
            .errors
            .iter()
            .find(|e| e.code == IssueCode::Cycle)
            .expect("cycle error");
        assert!(cycle.message.contains("a, b"));
    }

    #[test]
    fn self_loop_is_also_a_cycle() {
        let graph = GraphDefinition::new(
            vec![source("s"), transform("a")],
            vec![connect("s", "a"), connect("a", "a")],
        );
        let result = validator().validate(&graph);
        assert!(result.has_error(IssueCode::SelfLoop));
        assert!(result.has_error(IssueCode::Cycle));
    }

    #[test]
    fn rejects_inbound_edge_into_source() {
        let graph = GraphDefinition::new(
            vec![source("a"), source("b")],
            vec![connect("a", "b")],
        );
        assert!(validator().validate(&graph).has_error(IssueCode::SourceHasInput));
    }

    #[test]
    fn warns_about_structure_without_invalidating() {
        let graph = GraphDefinition::new(
            vec![source("a"), sink("b"), transform("orphan"), source("lonely"), transform("x"), sink("y")],
            vec![connect("a", "b"), connect("x", "y")],
        );
        let result = validator().validate(&graph);

        assert!(result.valid, "{result}");
        assert!(result.has_warning(IssueCode::IsolatedNode));
        assert!(result.has_warning(IssueCode::NoDownstream));
        let unreachable: Vec<_> = result
            .warnings
            .iter()
            .filter(|w| w.code == IssueCode::Unreachable)
            .filter_map(|w| w.node_id.as_ref().map(NodeId::as_str))
            .collect();
        assert_eq!(unreachable, vec!["x", "y"]);
    }

    #[test]
    fn fan_in_from_two_sources_has_no_warnings() {
        let graph = GraphDefinition::new(
            vec![source("a"), source("b"), sink("c")],
            vec![connect("a", "c"), connect("b", "c")],
        );
        let result = validator().validate(&graph);
        assert!(result.valid, "{result}");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn result_serializes_issue_codes() {
        let result = validator().validate(&GraphDefinition::default());
        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["valid"], json!(false));
        assert_eq!(json["errors"][0]["code"], json!("empty_workflow"));
        assert!(json["errors"][0].get("node_id").is_none());
    }
}
