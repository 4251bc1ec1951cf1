//! Schema inference for editor introspection.
//!
//! A node's output schema comes from its connector, given the node's config
//! and (for connectors that look at it) the node's input schema. The input
//! schema merges the outputs of every upstream node using the policy in
//! [`crate::merge`].
//!
//! Inference works on the stored graph as-is, so it must tolerate graphs
//! that fail validation: dangling connections are ignored, an upstream that
//! cannot be resolved is skipped with a warning, and cycles surface as an
//! error on the node that closes them rather than recursing forever.

use crate::definition::GraphDefinition;
use crate::error::InferenceError;
use crate::graph::WorkflowGraph;
use crate::merge::{UpstreamSchema, merge_schemas};
use crate::node::Node;
use crate::schema_cache::SchemaCache;
use crate::store::GraphStore;
use crate::validator::{IssueCode, ValidationIssue, ValidationResult};
use conduit_connector::ConnectorRegistry;
use conduit_core::{DataSchema, NodeId, UserId, WorkflowId};
use futures::future::{BoxFuture, FutureExt};
use rootcause::Report;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::instrument;

/// One node's entry in a workflow-wide schema report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSchemaReport {
    pub node_id: NodeId,
    pub label: String,
    pub connector_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<DataSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of checking that every node's schema can be inferred.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaValidation {
    #[serde(flatten)]
    pub result: ValidationResult,
    pub schema: Vec<NodeSchemaReport>,
}

/// Loads a workflow's graph, provided the caller owns the workflow.
pub(crate) async fn load_owned_graph(
    store: &dyn GraphStore,
    owner_id: UserId,
    workflow_id: WorkflowId,
) -> Result<GraphDefinition, Report<InferenceError>> {
    let workflow = store
        .get_workflow(owner_id, workflow_id)
        .await
        .map_err(|e| InferenceError::Store { details: e.to_string() })?;
    if workflow.is_none() {
        return Err(InferenceError::WorkflowNotFound { workflow_id }.into());
    }
    Ok(store
        .load_graph(workflow_id)
        .await
        .map_err(|e| InferenceError::Store { details: e.to_string() })?)
}

/// Answers schema questions about stored workflows.
#[derive(Clone)]
pub struct SchemaService {
    store: Arc<dyn GraphStore>,
    registry: Arc<ConnectorRegistry>,
    cache: Arc<SchemaCache>,
}

impl std::fmt::Debug for SchemaService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaService")
            .field("registry", &self.registry)
            .field("cache", &self.cache.stats())
            .finish_non_exhaustive()
    }
}

impl SchemaService {
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>, registry: Arc<ConnectorRegistry>, cache: Arc<SchemaCache>) -> Self {
        Self {
            store,
            registry,
            cache,
        }
    }

    async fn load(&self, owner_id: UserId, workflow_id: WorkflowId) -> Result<GraphDefinition, Report<InferenceError>> {
        load_owned_graph(self.store.as_ref(), owner_id, workflow_id).await
    }

    /// Returns the schema of the records a node produces.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow or node does not exist, the node's
    /// connector is unknown, or the connector cannot describe its output.
    #[instrument(skip(self), fields(workflow_id = %workflow_id, node_id = %node_id))]
    pub async fn node_output_schema(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
        node_id: &NodeId,
    ) -> Result<DataSchema, Report<InferenceError>> {
        let graph = self.load(owner_id, workflow_id).await?;
        let mut pass = InferencePass::new(workflow_id, &graph, &self.registry, &self.cache);
        Ok(pass.output(node_id).await.map(|resolved| resolved.schema)?)
    }

    /// Returns the schema of the records a node receives.
    ///
    /// Source nodes always receive an empty schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow or node does not exist.
    #[instrument(skip(self), fields(workflow_id = %workflow_id, node_id = %node_id))]
    pub async fn node_input_schema(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
        node_id: &NodeId,
    ) -> Result<DataSchema, Report<InferenceError>> {
        let graph = self.load(owner_id, workflow_id).await?;
        let node = graph.node(node_id).ok_or_else(|| InferenceError::NodeNotFound {
            node_id: node_id.clone(),
        })?;
        let mut pass = InferencePass::new(workflow_id, &graph, &self.registry, &self.cache);
        Ok(pass.input(node).await.schema)
    }

    /// Reports the output schema of every node.
    ///
    /// Nodes are listed in execution order, or in stored order when the graph
    /// cannot be ordered. A node that fails inference is reported with its
    /// error and the walk continues.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow does not exist.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn workflow_schema(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
    ) -> Result<Vec<NodeSchemaReport>, Report<InferenceError>> {
        let graph = self.load(owner_id, workflow_id).await?;
        let order = WorkflowGraph::build(&graph)
            .and_then(|g| g.topological_order())
            .unwrap_or_else(|_| {
                let mut seen = HashSet::new();
                graph
                    .nodes
                    .iter()
                    .filter(|n| seen.insert(n.id.clone()))
                    .map(|n| n.id.clone())
                    .collect()
            });

        let mut pass = InferencePass::new(workflow_id, &graph, &self.registry, &self.cache);
        let mut reports = Vec::with_capacity(order.len());
        for node_id in &order {
            let Some(node) = graph.node(node_id) else {
                continue;
            };
            let (output_schema, error) = match pass.output(node_id).await {
                Ok(resolved) => (Some(resolved.schema), None),
                Err(e) => (None, Some(e.to_string())),
            };
            reports.push(NodeSchemaReport {
                node_id: node.id.clone(),
                label: node.label.clone(),
                connector_id: node.connector_id.clone(),
                output_schema,
                error,
            });
        }
        Ok(reports)
    }

    /// Checks that the output schema of every node can be inferred.
    ///
    /// Each node whose inference fails becomes an error. The full schema
    /// report is returned alongside.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow does not exist.
    pub async fn validate_schema(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
    ) -> Result<SchemaValidation, Report<InferenceError>> {
        let schema = self.workflow_schema(owner_id, workflow_id).await?;
        let errors = schema
            .iter()
            .filter_map(|report| {
                let error = report.error.as_ref()?;
                Some(
                    ValidationIssue::new(IssueCode::SchemaInference, format!("Node {}: {error}", report.node_id))
                        .node(&report.node_id),
                )
            })
            .collect();
        Ok(SchemaValidation {
            result: ValidationResult::from_issues(errors, Vec::new()),
            schema,
        })
    }
}

#[derive(Debug, Clone)]
struct Resolved {
    schema: DataSchema,
    fingerprint: u64,
}

#[derive(Debug)]
struct ResolvedInput {
    schema: DataSchema,
    /// (prefix, fingerprint) of every resolved upstream, in connection order.
    upstreams: Vec<(String, u64)>,
}

/// One inference walk over a graph.
///
/// Outputs are memoized for the duration of the pass so shared ancestors
/// are resolved once.
struct InferencePass<'a> {
    workflow_id: WorkflowId,
    graph: &'a GraphDefinition,
    registry: &'a ConnectorRegistry,
    cache: &'a SchemaCache,
    memo: HashMap<NodeId, Resolved>,
    in_progress: HashSet<NodeId>,
}

impl<'a> InferencePass<'a> {
    fn new(
        workflow_id: WorkflowId,
        graph: &'a GraphDefinition,
        registry: &'a ConnectorRegistry,
        cache: &'a SchemaCache,
    ) -> Self {
        Self {
            workflow_id,
            graph,
            registry,
            cache,
            memo: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    /// Upstream nodes of `node_id` in connection order; dangling connections are ignored.
    fn upstreams(&self, node_id: &NodeId) -> Vec<&'a Node> {
        let graph = self.graph;
        graph
            .connections
            .iter()
            .filter(|c| &c.target_id == node_id)
            .filter_map(|c| graph.node(&c.source_id))
            .collect()
    }

    fn input<'s>(&'s mut self, node: &'a Node) -> BoxFuture<'s, ResolvedInput> {
        async move {
            if node.is_source() {
                return ResolvedInput {
                    schema: DataSchema::empty(),
                    upstreams: Vec::new(),
                };
            }

            let mut resolved = Vec::new();
            let mut upstreams = Vec::new();
            for upstream in self.upstreams(&node.id) {
                match self.output(&upstream.id).await {
                    Ok(output) => {
                        let prefix = upstream.conflict_prefix();
                        upstreams.push((prefix.clone(), output.fingerprint));
                        resolved.push(UpstreamSchema {
                            node_id: upstream.id.clone(),
                            prefix,
                            schema: output.schema,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(
                            workflow_id = %self.workflow_id,
                            node_id = %node.id,
                            upstream = %upstream.id,
                            error = %e,
                            "Skipping unresolvable upstream schema"
                        );
                    }
                }
            }

            ResolvedInput {
                schema: merge_schemas(&resolved),
                upstreams,
            }
        }
        .boxed()
    }

    fn output<'s>(&'s mut self, node_id: &'a NodeId) -> BoxFuture<'s, Result<Resolved, InferenceError>> {
        async move {
            if let Some(resolved) = self.memo.get(node_id) {
                return Ok(resolved.clone());
            }
            if self.in_progress.contains(node_id) {
                return Err(InferenceError::CycleDetected {
                    node_id: node_id.clone(),
                });
            }

            let graph = self.graph;
            let node = graph.node(node_id).ok_or_else(|| InferenceError::NodeNotFound {
                node_id: node_id.clone(),
            })?;

            self.in_progress.insert(node_id.clone());
            let result = self.resolve(node).await;
            self.in_progress.remove(node_id);

            let resolved = result?;
            self.memo.insert(node_id.clone(), resolved.clone());
            Ok(resolved)
        }
        .boxed()
    }

    async fn resolve(&mut self, node: &'a Node) -> Result<Resolved, InferenceError> {
        let connector = self
            .registry
            .get(&node.connector_id)
            .ok_or_else(|| InferenceError::ConnectorNotFound {
                node_id: node.id.clone(),
                connector_id: node.connector_id.clone(),
            })?;

        let input = if connector.uses_input_schema() {
            self.input(node).await
        } else {
            ResolvedInput {
                schema: DataSchema::empty(),
                upstreams: Vec::new(),
            }
        };

        let fingerprint = fingerprint(node, &input.upstreams);
        if let Some(schema) = self.cache.get(self.workflow_id, &node.id, fingerprint) {
            return Ok(Resolved { schema, fingerprint });
        }

        let schema = connector
            .output_schema(&node.id, &node.config, &input.schema)
            .await
            .map_err(|e| InferenceError::Connector {
                node_id: node.id.clone(),
                reason: e.to_string(),
            })?;
        self.cache.set(self.workflow_id, &node.id, fingerprint, schema.clone());
        Ok(Resolved { schema, fingerprint })
    }
}

fn fingerprint(node: &Node, upstreams: &[(String, u64)]) -> u64 {
    let mut hasher = DefaultHasher::new();
    node.connector_id.hash(&mut hasher);
    node.role.as_str().hash(&mut hasher);
    node.config.to_string().hash(&mut hasher);
    upstreams.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Workflow;
    use crate::edge::Connection;
    use crate::node::NodeRole;
    use crate::store::InMemoryGraphStore;
    use serde_json::json;

    fn id(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn static_node(name: &str, label: &str, records: serde_json::Value) -> Node {
        Node::new(id(name), "static_source", NodeRole::Source)
            .with_label(label)
            .with_config(json!({ "records": records }))
    }

    fn sink(name: &str) -> Node {
        Node::new(id(name), "log_destination", NodeRole::Sink)
    }

    struct Fixture {
        service: SchemaService,
        cache: Arc<SchemaCache>,
        store: Arc<InMemoryGraphStore>,
        owner: UserId,
        workflow_id: WorkflowId,
    }

    async fn fixture(graph: GraphDefinition) -> Fixture {
        let store = Arc::new(InMemoryGraphStore::new());
        let owner = UserId::new();
        let workflow = Workflow::new(owner, "inference");
        store.create_workflow(&workflow).await.unwrap();
        store.replace_graph(workflow.id, &graph).await.unwrap();

        let cache = Arc::new(SchemaCache::default());
        let service = SchemaService::new(
            store.clone(),
            Arc::new(ConnectorRegistry::with_builtins()),
            cache.clone(),
        );
        Fixture {
            service,
            cache,
            store,
            owner,
            workflow_id: workflow.id,
        }
    }

    fn two_sources_into_sink() -> GraphDefinition {
        GraphDefinition::new(
            vec![
                static_node("a", "CSV", json!([{"id": 1, "name": "Ada"}])),
                static_node("b", "API", json!([{"id": 2, "email": "b@example.com"}])),
                sink("out"),
            ],
            vec![Connection::new(id("a"), id("out")), Connection::new(id("b"), id("out"))],
        )
    }

    fn names(schema: &DataSchema) -> Vec<&str> {
        schema.field_names().collect()
    }

    #[tokio::test]
    async fn input_schema_prefixes_conflicts() {
        let f = fixture(two_sources_into_sink()).await;
        let input = f
            .service
            .node_input_schema(f.owner, f.workflow_id, &id("out"))
            .await
            .unwrap();

        assert_eq!(names(&input), vec!["CSV_id", "name", "API_id", "email"]);
        assert_eq!(input.source_nodes, vec![id("a"), id("b")]);
    }

    #[tokio::test]
    async fn source_input_is_empty() {
        let f = fixture(two_sources_into_sink()).await;
        let input = f
            .service
            .node_input_schema(f.owner, f.workflow_id, &id("a"))
            .await
            .unwrap();
        assert!(input.is_empty());
        assert!(input.source_nodes.is_empty());
    }

    #[tokio::test]
    async fn label_fallback_uses_short_id() {
        let graph = GraphDefinition::new(
            vec![
                static_node("0123456789abcdef", "", json!([{"id": 1}])),
                static_node("b", "B", json!([{"id": 2}])),
                sink("out"),
            ],
            vec![
                Connection::new(id("0123456789abcdef"), id("out")),
                Connection::new(id("b"), id("out")),
            ],
        );
        let f = fixture(graph).await;
        let input = f
            .service
            .node_input_schema(f.owner, f.workflow_id, &id("out"))
            .await
            .unwrap();
        assert_eq!(names(&input), vec!["01234567_id", "B_id"]);
    }

    #[tokio::test]
    async fn unresolvable_upstream_is_skipped() {
        let graph = GraphDefinition::new(
            vec![
                static_node("a", "CSV", json!([{"id": 1}])),
                Node::new(id("ghost"), "ftp_source", NodeRole::Source),
                sink("out"),
            ],
            vec![
                Connection::new(id("a"), id("out")),
                Connection::new(id("ghost"), id("out")),
            ],
        );
        let f = fixture(graph).await;

        // a single resolved upstream is passed through without renaming
        let input = f
            .service
            .node_input_schema(f.owner, f.workflow_id, &id("out"))
            .await
            .unwrap();
        assert_eq!(names(&input), vec!["id"]);

        let err = f
            .service
            .node_output_schema(f.owner, f.workflow_id, &id("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            InferenceError::ConnectorNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn output_schema_follows_transformations() {
        let graph = GraphDefinition::new(
            vec![
                static_node("a", "Seed", json!([{"first": "Ada", "age": "36"}])),
                Node::new(id("t"), "transform_processor", NodeRole::Transform).with_config(json!({
                    "transformations": [
                        {"type": "rename", "source_field": "first", "target_field": "name"},
                        {"type": "cast", "source_field": "age", "to_type": "number"}
                    ]
                })),
            ],
            vec![Connection::new(id("a"), id("t"))],
        );
        let f = fixture(graph).await;
        let output = f
            .service
            .node_output_schema(f.owner, f.workflow_id, &id("t"))
            .await
            .unwrap();

        assert_eq!(names(&output), vec!["name", "age"]);
        assert_eq!(output.fields[1].field_type, conduit_core::FieldType::Number);
    }

    #[tokio::test]
    async fn other_owners_see_nothing() {
        let f = fixture(two_sources_into_sink()).await;
        let err = f
            .service
            .node_output_schema(UserId::new(), f.workflow_id, &id("a"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            InferenceError::WorkflowNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn repeated_queries_hit_the_cache() {
        let f = fixture(two_sources_into_sink()).await;
        f.service
            .node_output_schema(f.owner, f.workflow_id, &id("out"))
            .await
            .unwrap();
        let before = f.cache.stats();
        f.service
            .node_output_schema(f.owner, f.workflow_id, &id("out"))
            .await
            .unwrap();
        let after = f.cache.stats();

        assert!(after.hits > before.hits);
        assert_eq!(after.sets, before.sets);
    }

    #[tokio::test]
    async fn config_change_misses_the_cache() {
        let f = fixture(two_sources_into_sink()).await;
        let first = f
            .service
            .node_output_schema(f.owner, f.workflow_id, &id("out"))
            .await
            .unwrap();
        assert_eq!(first.fields.len(), 4);

        let mut graph = two_sources_into_sink();
        graph.nodes[1] = static_node("b", "API", json!([{"email": "b@example.com"}]));
        f.store.replace_graph(f.workflow_id, &graph).await.unwrap();

        let second = f
            .service
            .node_output_schema(f.owner, f.workflow_id, &id("out"))
            .await
            .unwrap();
        assert_eq!(names(&second), vec!["id", "name", "email"]);
    }

    #[tokio::test]
    async fn workflow_schema_reports_each_node() {
        let mut graph = two_sources_into_sink();
        graph.nodes.push(Node::new(id("broken"), "ftp_source", NodeRole::Source));
        let f = fixture(graph).await;

        let reports = f.service.workflow_schema(f.owner, f.workflow_id).await.unwrap();
        let order: Vec<_> = reports.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "broken", "out"]);

        let broken = &reports[2];
        assert!(broken.output_schema.is_none());
        assert!(broken.error.as_deref().unwrap_or_default().contains("ftp_source"));
        assert_eq!(reports[3].output_schema.as_ref().map(|s| s.fields.len()), Some(4));
    }

    #[tokio::test]
    async fn cycles_do_not_recurse_forever() {
        let graph = GraphDefinition::new(
            vec![
                static_node("root", "Root", json!([{"id": 1}])),
                sink("a"),
                sink("b"),
            ],
            vec![
                Connection::new(id("root"), id("a")),
                Connection::new(id("a"), id("b")),
                Connection::new(id("b"), id("a")),
            ],
        );
        let f = fixture(graph).await;

        let reports = f.service.workflow_schema(f.owner, f.workflow_id).await.unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.output_schema.is_some()));
    }

    #[tokio::test]
    async fn schema_validation_flags_nodes_that_cannot_be_inferred() {
        let mut graph = two_sources_into_sink();
        graph.nodes.push(Node::new(id("broken"), "ftp_source", NodeRole::Source));
        let f = fixture(graph).await;

        let validation = f.service.validate_schema(f.owner, f.workflow_id).await.unwrap();

        assert!(!validation.result.valid);
        assert_eq!(validation.result.errors.len(), 1);
        let issue = &validation.result.errors[0];
        assert_eq!(issue.code, IssueCode::SchemaInference);
        assert_eq!(issue.node_id, Some(id("broken")));
        assert!(issue.message.starts_with("Node broken: "));
        assert_eq!(validation.schema.len(), 4);

        let body = serde_json::to_value(&validation).unwrap();
        assert_eq!(body["valid"], json!(false));
        assert_eq!(body["schema"].as_array().map(Vec::len), Some(4));
    }

    #[tokio::test]
    async fn schema_validation_passes_clean_graphs() {
        let f = fixture(two_sources_into_sink()).await;
        let validation = f.service.validate_schema(f.owner, f.workflow_id).await.unwrap();
        assert!(validation.result.valid);
        assert!(validation.result.errors.is_empty());
    }
}
