//! Sample-data previews for the editor.
//!
//! A preview runs a node against the stored graph without creating an
//! execution. Upstream nodes are run first, recursively, and their outputs
//! are merged the way the engine merges them. Every envelope is cut down to
//! the requested limit before it flows further.
//!
//! Sink nodes are not run, since a preview must not write anywhere; their
//! sample is the input they would receive. An upstream that fails, or that
//! closes a cycle, is skipped with a warning.

use crate::definition::GraphDefinition;
use crate::error::InferenceError;
use crate::inference::load_owned_graph;
use crate::merge::{UpstreamEnvelope, merge_envelopes};
use crate::node::{Node, NodeRole};
use crate::store::GraphStore;
use conduit_connector::{ConnectorRegistry, ExecutionContext};
use conduit_core::{DataEnvelope, DataSchema, ExecutionId, NodeId, UserId, WorkflowId};
use futures::future::{BoxFuture, FutureExt};
use rootcause::Report;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Records returned when the caller does not ask for a limit.
pub const DEFAULT_SAMPLE_LIMIT: usize = 20;

/// Upper bound on records returned by one preview.
pub const MAX_SAMPLE_LIMIT: usize = 100;

/// Resolves a requested sample size. Missing or zero means the default.
#[must_use]
pub fn sample_limit(requested: Option<usize>) -> usize {
    match requested {
        None | Some(0) => DEFAULT_SAMPLE_LIMIT,
        Some(limit) => limit.min(MAX_SAMPLE_LIMIT),
    }
}

/// Produces sample records for nodes of stored workflows.
#[derive(Clone)]
pub struct PreviewService {
    store: Arc<dyn GraphStore>,
    registry: Arc<ConnectorRegistry>,
}

impl std::fmt::Debug for PreviewService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewService")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl PreviewService {
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>, registry: Arc<ConnectorRegistry>) -> Self {
        Self { store, registry }
    }

    /// Runs a node and its upstreams and returns up to `limit` of its records.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow or node does not exist, the node's
    /// connector is unknown, or the connector fails.
    #[instrument(skip(self), fields(workflow_id = %workflow_id, node_id = %node_id))]
    pub async fn node_sample(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
        node_id: &NodeId,
        limit: Option<usize>,
    ) -> Result<DataEnvelope, Report<InferenceError>> {
        let graph = load_owned_graph(self.store.as_ref(), owner_id, workflow_id).await?;
        let mut pass = SamplePass {
            owner_id,
            workflow_id,
            graph: &graph,
            registry: &self.registry,
            limit: sample_limit(limit),
            memo: HashMap::new(),
            in_progress: HashSet::new(),
        };
        Ok(pass.sample(node_id).await?)
    }
}

struct SamplePass<'a> {
    owner_id: UserId,
    workflow_id: WorkflowId,
    graph: &'a GraphDefinition,
    registry: &'a ConnectorRegistry,
    limit: usize,
    memo: HashMap<NodeId, DataEnvelope>,
    in_progress: HashSet<NodeId>,
}

impl<'a> SamplePass<'a> {
    fn sample<'s>(&'s mut self, node_id: &'a NodeId) -> BoxFuture<'s, Result<DataEnvelope, InferenceError>> {
        async move {
            if let Some(envelope) = self.memo.get(node_id) {
                return Ok(envelope.clone());
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
            let result = self.run(node).await;
            self.in_progress.remove(node_id);

            let envelope = result?;
            self.memo.insert(node_id.clone(), envelope.clone());
            Ok(envelope)
        }
        .boxed()
    }

    async fn input(&mut self, node: &'a Node) -> DataEnvelope {
        let graph = self.graph;
        let upstreams: Vec<&'a Node> = graph
            .connections
            .iter()
            .filter(|c| c.target_id == node.id)
            .filter_map(|c| graph.node(&c.source_id))
            .collect();

        let mut resolved = Vec::with_capacity(upstreams.len());
        for upstream in upstreams {
            match self.sample(&upstream.id).await {
                Ok(envelope) => resolved.push(UpstreamEnvelope {
                    node_id: upstream.id.clone(),
                    prefix: upstream.conflict_prefix(),
                    envelope,
                }),
                Err(e) => tracing::warn!(
                    node_id = %node.id,
                    upstream = %upstream.id,
                    error = %e,
                    "Skipping upstream without sample data"
                ),
            }
        }
        merge_envelopes(resolved)
    }

    async fn run(&mut self, node: &'a Node) -> Result<DataEnvelope, InferenceError> {
        let connector = self
            .registry
            .get(&node.connector_id)
            .ok_or_else(|| InferenceError::ConnectorNotFound {
                node_id: node.id.clone(),
                connector_id: node.connector_id.clone(),
            })?;

        let input = if node.is_source() {
            DataEnvelope::empty()
        } else {
            self.input(node).await
        };

        let started = Instant::now();
        let mut envelope = if node.role == NodeRole::Sink {
            input
        } else {
            let ctx = ExecutionContext {
                workflow_id: self.workflow_id,
                execution_id: ExecutionId::new(),
                node_id: node.id.clone(),
                owner_id: self.owner_id,
                cancellation: CancellationToken::new(),
            };
            let run = connector.execute(&ctx, &node.config, input);
            match AssertUnwindSafe(run).catch_unwind().await {
                Ok(Ok(envelope)) => envelope,
                Ok(Err(e)) => {
                    return Err(InferenceError::Sample {
                        node_id: node.id.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    return Err(InferenceError::Sample {
                        node_id: node.id.clone(),
                        reason: "connector panicked".to_string(),
                    });
                }
            }
        };

        envelope.data.truncate(self.limit);
        envelope.sync_count();
        envelope.metadata.node_id = Some(node.id.clone());
        envelope.metadata.connector_id = Some(node.connector_id.clone());
        envelope.metadata.execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if envelope.metadata.schema.is_empty() && !envelope.is_empty() {
            envelope.metadata.schema = DataSchema::infer_from_records(&envelope.data, Some(&node.id));
        }
        Ok(envelope)
    }
}
