//! Detached workflow execution.
//!
//! [`ExecutionEngine::execute`] validates the stored graph, persists a
//! `pending` execution and returns it immediately. The nodes run on a
//! spawned task that owns its own cancellation token, so the run outlives
//! the request that triggered it.
//!
//! Scheduling is driven by a [`RemainingWorkGraph`]: ready nodes are started
//! up to `max_parallel_nodes` at a time, a completed node is removed so its
//! dependents can become ready, and a failed node stays behind with a
//! self-edge so its dependents never start. The run task is the only writer
//! of the execution record while it is live.

use crate::definition::GraphDefinition;
use crate::error::EngineError;
use crate::execution::{Execution, LogLevel, NodeResult};
use crate::graph::WorkflowGraph;
use crate::merge::{UpstreamEnvelope, merge_envelopes};
use crate::remaining_work::RemainingWorkGraph;
use crate::store::GraphStore;
use crate::trigger::ExecutionRequest;
use crate::validator::GraphValidator;
use chrono::Utc;
use conduit_connector::{ConnectorRegistry, ExecutionContext};
use conduit_core::{DataEnvelope, DataSchema, ExecutionId, NodeId, UserId, WorkflowId};
use futures::FutureExt;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::task::{self, AbortHandle, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, instrument};

/// Upper bound on executions returned by one listing.
pub const MAX_LIST_LIMIT: usize = 200;

/// What happens to the rest of the graph after a node fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Branches that do not depend on the failed node run to completion;
    /// its dependents are skipped.
    #[default]
    ContinueIndependent,
    /// No node is started after the first failure.
    Halt,
}

/// Engine settings. Missing fields take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum nodes of one execution running at the same time.
    pub max_parallel_nodes: usize,
    pub failure_policy: FailurePolicy,
    /// Maximum log entries kept per execution.
    pub log_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            failure_policy: FailurePolicy::default(),
            log_limit: 500,
        }
    }
}

type RunningExecutions = Arc<Mutex<HashMap<ExecutionId, CancellationToken>>>;

fn lock(running: &RunningExecutions) -> MutexGuard<'_, HashMap<ExecutionId, CancellationToken>> {
    running.lock().unwrap_or_else(PoisonError::into_inner)
}

fn store_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::Store {
        details: e.to_string(),
    }
}

/// Starts, cancels and reports on workflow executions.
#[derive(Clone)]
pub struct ExecutionEngine {
    store: Arc<dyn GraphStore>,
    registry: Arc<ConnectorRegistry>,
    validator: GraphValidator,
    config: EngineConfig,
    running: RunningExecutions,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("config", &self.config)
            .field("running", &lock(&self.running).len())
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>, registry: Arc<ConnectorRegistry>, config: EngineConfig) -> Self {
        let validator = GraphValidator::new(registry.clone());
        Self {
            store,
            registry,
            validator,
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the engine settings.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts an execution and returns it without waiting for any node.
    ///
    /// # Errors
    ///
    /// Returns an error, and creates nothing, if the workflow does not exist
    /// for this owner, is inactive, has an invalid graph, or the execution
    /// record cannot be stored.
    #[instrument(skip(self, request), fields(workflow_id = %request.workflow_id, trigger = %request.trigger))]
    pub async fn execute(&self, request: ExecutionRequest) -> Result<Execution, Report<EngineError>> {
        let ExecutionRequest {
            owner_id,
            workflow_id,
            trigger,
            payload,
        } = request;

        let workflow = self
            .store
            .get_workflow(owner_id, workflow_id)
            .await
            .map_err(store_error)?
            .ok_or(EngineError::WorkflowNotFound { workflow_id })?;
        if !workflow.active {
            return Err(EngineError::WorkflowInactive { workflow_id }.into());
        }

        let definition = self.store.load_graph(workflow_id).await.map_err(store_error)?;
        let graph = self.prepare(&definition)?;
        let order = graph.topological_order().map_err(EngineError::from)?;

        let mut execution = Execution::new(workflow_id, owner_id, trigger);
        execution.node_results = order
            .iter()
            .filter_map(|node_id| graph.node(node_id))
            .map(NodeResult::pending)
            .collect();
        execution.log(
            LogLevel::Info,
            None,
            format!("Execution created by {trigger} trigger"),
            self.config.log_limit,
        );
        self.store
            .create_execution(&execution)
            .await
            .map_err(store_error)?;

        let token = CancellationToken::new();
        lock(&self.running).insert(execution.id, token.clone());

        let span = tracing::info_span!(
            "execution",
            workflow_id = %workflow_id,
            execution_id = %execution.id,
        );
        let run = Run {
            store: self.store.clone(),
            registry: self.registry.clone(),
            config: self.config,
            graph: Arc::new(graph),
            execution: execution.clone(),
            payload,
            token,
            running: self.running.clone(),
        };
        tokio::spawn(run.drive().instrument(span));

        tracing::info!(execution_id = %execution.id, "Execution accepted");
        Ok(execution)
    }

    fn prepare(&self, definition: &GraphDefinition) -> Result<WorkflowGraph, Report<EngineError>> {
        let result = self.validator.validate(definition);
        if !result.valid {
            return Err(EngineError::InvalidGraph { result }.into());
        }
        Ok(WorkflowGraph::build(definition).map_err(EngineError::from)?)
    }

    /// Returns the current snapshot of an execution.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionNotFound` if the execution does not exist for this owner.
    pub async fn status(
        &self,
        owner_id: UserId,
        execution_id: ExecutionId,
    ) -> Result<Execution, Report<EngineError>> {
        Ok(self
            .store
            .get_execution(owner_id, execution_id)
            .await
            .map_err(store_error)?
            .ok_or(EngineError::ExecutionNotFound { execution_id })?)
    }

    /// Lists a workflow's executions, most recent first.
    ///
    /// `limit` is clamped to `1..=MAX_LIST_LIMIT`.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowNotFound` if the workflow does not exist for this owner.
    pub async fn list_executions(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<Execution>, Report<EngineError>> {
        self.store
            .get_workflow(owner_id, workflow_id)
            .await
            .map_err(store_error)?
            .ok_or(EngineError::WorkflowNotFound { workflow_id })?;
        Ok(self
            .store
            .list_executions(workflow_id, limit.clamp(1, MAX_LIST_LIMIT))
            .await
            .map_err(store_error)?)
    }

    /// Requests cancellation of an execution.
    ///
    /// A live run stops scheduling at its next step and finishes as a
    /// failure; the returned snapshot may still show it running. An
    /// execution with no live run (for example after a restart) is marked
    /// failed directly, unless it finished in the meantime.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionNotFound` for unknown executions and
    /// `ExecutionFinished` if it already reached a terminal status.
    #[instrument(skip(self), fields(execution_id = %execution_id))]
    pub async fn cancel(
        &self,
        owner_id: UserId,
        execution_id: ExecutionId,
    ) -> Result<Execution, Report<EngineError>> {
        let mut execution = self.status(owner_id, execution_id).await?;
        if execution.status.is_terminal() {
            return Err(EngineError::ExecutionFinished { execution_id }.into());
        }

        let signalled = lock(&self.running).get(&execution_id).map(CancellationToken::cancel).is_some();
        if signalled {
            tracing::info!("Cancellation requested");
            return Ok(execution);
        }

        for result in &mut execution.node_results {
            if !result.status.is_terminal() {
                result.skip("execution cancelled");
            }
        }
        execution
            .fail("execution cancelled", None)
            .map_err(|_| EngineError::ExecutionFinished { execution_id })?;
        execution.log(LogLevel::Warn, None, "Execution cancelled", self.config.log_limit);
        let applied = self
            .store
            .update_execution(&execution)
            .await
            .map_err(store_error)?;
        if !applied {
            // the run finished between the read and the write
            return Err(EngineError::ExecutionFinished { execution_id }.into());
        }
        tracing::info!("Cancelled execution without a live run");
        Ok(execution)
    }

    /// Returns true if the execution has a live run in this process.
    #[must_use]
    pub fn is_running(&self, execution_id: ExecutionId) -> bool {
        lock(&self.running).contains_key(&execution_id)
    }
}

struct NodeOutcome {
    node_id: NodeId,
    result: Result<DataEnvelope, String>,
    duration_ms: u64,
}

/// Resolves a joined node task to its outcome.
///
/// A task that was aborted or panicked outside the connector still fails
/// its node, so it never stays `running` in the record.
fn settle(
    in_flight: &mut HashMap<task::Id, NodeId>,
    joined: Result<NodeOutcome, JoinError>,
) -> Option<NodeOutcome> {
    match joined {
        Ok(outcome) => {
            in_flight.retain(|_, node_id| *node_id != outcome.node_id);
            Some(outcome)
        }
        Err(e) => {
            let Some(node_id) = in_flight.remove(&e.id()) else {
                tracing::error!(error = %e, "Unknown node task ended abnormally");
                return None;
            };
            tracing::error!(error = %e, node_id = %node_id, "Node task ended abnormally");
            Some(NodeOutcome {
                node_id,
                result: Err(format!("node task ended abnormally: {e}")),
                duration_ms: 0,
            })
        }
    }
}

/// State owned by one detached run.
struct Run {
    store: Arc<dyn GraphStore>,
    registry: Arc<ConnectorRegistry>,
    config: EngineConfig,
    graph: Arc<WorkflowGraph>,
    execution: Execution,
    payload: JsonValue,
    token: CancellationToken,
    running: RunningExecutions,
}

impl Run {
    fn log(&mut self, level: LogLevel, node_id: Option<&NodeId>, message: impl Into<String>) {
        self.execution.log(level, node_id, message, self.config.log_limit);
    }

    async fn save(&self) {
        match self.store.update_execution(&self.execution).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Stored execution is already finished, state not saved"),
            Err(e) => tracing::error!(error = %e, "Failed to persist execution state"),
        }
    }

    async fn drive(mut self) {
        if let Err(e) = self.execution.start() {
            tracing::error!(error = %e, "Execution could not start");
            lock(&self.running).remove(&self.execution.id);
            return;
        }
        self.log(LogLevel::Info, None, "Execution started");
        self.save().await;

        let mut work = RemainingWorkGraph::from_workflow(&self.graph);
        let mut outputs: HashMap<NodeId, DataEnvelope> = HashMap::new();
        let mut tasks: JoinSet<NodeOutcome> = JoinSet::new();
        let mut in_flight: HashMap<task::Id, NodeId> = HashMap::new();
        let mut first_failure: Option<NodeId> = None;
        let max_parallel = self.config.max_parallel_nodes.max(1);

        loop {
            let halted = work.has_failures() && self.config.failure_policy == FailurePolicy::Halt;
            if !self.token.is_cancelled() && !halted {
                let mut started = false;
                for node_id in work.ready_nodes() {
                    if tasks.len() >= max_parallel {
                        break;
                    }
                    if let Some(handle) = self.start_node(&mut tasks, &mut work, &outputs, &node_id) {
                        in_flight.insert(handle.id(), node_id);
                    }
                    started = true;
                }
                if started {
                    self.save().await;
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let Some(outcome) = settle(&mut in_flight, joined) else {
                continue;
            };
            self.finish_node(outcome, &mut work, &mut outputs, &mut first_failure);
            self.save().await;
        }

        self.conclude(&work, &mut outputs, first_failure).await;
    }

    /// Spawns a ready node. Returns `None` if the node vanished from the graph.
    fn start_node(
        &mut self,
        tasks: &mut JoinSet<NodeOutcome>,
        work: &mut RemainingWorkGraph,
        outputs: &HashMap<NodeId, DataEnvelope>,
        node_id: &NodeId,
    ) -> Option<AbortHandle> {
        let Some(node) = self.graph.node(node_id).cloned() else {
            work.mark_completed(node_id);
            return None;
        };

        let input = if node.is_source() {
            DataEnvelope::from_payload(&self.payload)
        } else {
            let upstreams = self
                .graph
                .predecessors(node_id)
                .into_iter()
                .filter_map(|pred| {
                    outputs.get(&pred.id).map(|envelope| UpstreamEnvelope {
                        node_id: pred.id.clone(),
                        prefix: pred.conflict_prefix(),
                        envelope: envelope.clone(),
                    })
                })
                .collect();
            merge_envelopes(upstreams)
        };

        work.mark_executing(node_id);
        if let Some(result) = self.execution.node_result_mut(node_id) {
            result.start(Utc::now());
        }
        self.log(
            LogLevel::Info,
            Some(node_id),
            format!("Node {} started with {} records", node.display_name(), input.len()),
        );

        let connector = self.registry.get(&node.connector_id);
        let ctx = ExecutionContext {
            workflow_id: self.execution.workflow_id,
            execution_id: self.execution.id,
            node_id: node_id.clone(),
            owner_id: self.execution.owner_id,
            cancellation: self.token.child_token(),
        };
        let span = tracing::info_span!("node", node_id = %node_id, connector = %node.connector_id);

        Some(tasks.spawn(
            async move {
                let started = Instant::now();
                let result = match connector {
                    None => Err(format!("connector '{}' is not registered", node.connector_id)),
                    Some(connector) => {
                        let run = connector.execute(&ctx, &node.config, input);
                        match AssertUnwindSafe(run).catch_unwind().await {
                            Ok(Ok(envelope)) => Ok(envelope),
                            Ok(Err(e)) => Err(e.to_string()),
                            Err(_) => Err("connector panicked".to_string()),
                        }
                    }
                };
                let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                match &result {
                    Ok(envelope) => tracing::debug!(records = envelope.len(), duration_ms, "Node finished"),
                    Err(reason) => tracing::warn!(%reason, duration_ms, "Node failed"),
                }
                NodeOutcome {
                    node_id: ctx.node_id,
                    result,
                    duration_ms,
                }
            }
            .instrument(span),
        ))
    }

    fn finish_node(
        &mut self,
        outcome: NodeOutcome,
        work: &mut RemainingWorkGraph,
        outputs: &mut HashMap<NodeId, DataEnvelope>,
        first_failure: &mut Option<NodeId>,
    ) {
        let NodeOutcome {
            node_id,
            result,
            duration_ms,
        } = outcome;
        let name = self
            .graph
            .node(&node_id)
            .map_or_else(|| node_id.to_string(), |n| n.display_name().to_string());
        let connector_id = self.graph.node(&node_id).map(|n| n.connector_id.clone());

        match result {
            Ok(mut envelope) => {
                envelope.sync_count();
                envelope.metadata.node_id = Some(node_id.clone());
                envelope.metadata.connector_id = connector_id;
                envelope.metadata.execution_time_ms = duration_ms;
                if envelope.metadata.schema.is_empty() && !envelope.is_empty() {
                    envelope.metadata.schema = DataSchema::infer_from_records(&envelope.data, Some(&node_id));
                }

                let records = envelope.len();
                if let Some(result) = self.execution.node_result_mut(&node_id) {
                    result.succeed(envelope.clone(), duration_ms);
                }
                self.log(
                    LogLevel::Info,
                    Some(&node_id),
                    format!("Node {name} completed with {records} records in {duration_ms}ms"),
                );
                outputs.insert(node_id.clone(), envelope);
                work.mark_completed(&node_id);
            }
            Err(reason) => {
                if let Some(result) = self.execution.node_result_mut(&node_id) {
                    result.fail(reason.clone(), duration_ms);
                }
                self.log(LogLevel::Error, Some(&node_id), format!("Node {name} failed: {reason}"));
                if first_failure.is_none() {
                    *first_failure = Some(node_id.clone());
                }
                work.mark_failed(&node_id);
            }
        }
    }

    async fn conclude(
        mut self,
        work: &RemainingWorkGraph,
        outputs: &mut HashMap<NodeId, DataEnvelope>,
        first_failure: Option<NodeId>,
    ) {
        let cancelled = self.token.is_cancelled();
        let blocked = work.blocked_nodes();

        for node_id in work.unfinished_nodes() {
            let reason = if cancelled {
                "execution cancelled".to_string()
            } else if blocked.contains(&node_id) {
                "upstream node failed".to_string()
            } else {
                match &first_failure {
                    Some(failed) => format!("halted after node {failed} failed"),
                    None => "node was not scheduled".to_string(),
                }
            };
            if let Some(result) = self.execution.node_result_mut(&node_id) {
                result.skip(reason.clone());
            }
            self.log(LogLevel::Warn, Some(&node_id), format!("Node skipped: {reason}"));
        }

        let finished = if cancelled {
            self.log(LogLevel::Warn, None, "Execution cancelled");
            self.execution.fail("execution cancelled", first_failure)
        } else if let Some(failed) = first_failure {
            let reason = self
                .execution
                .node_result(&failed)
                .and_then(|r| r.error.clone())
                .unwrap_or_default();
            let name = self
                .graph
                .node(&failed)
                .map_or_else(|| failed.to_string(), |n| n.display_name().to_string());
            self.log(LogLevel::Error, None, "Execution failed");
            self.execution
                .fail(format!("node {name} failed: {reason}"), Some(failed))
        } else {
            let result: BTreeMap<NodeId, DataEnvelope> = self
                .graph
                .terminal_nodes()
                .into_iter()
                .filter_map(|node| outputs.remove(&node.id).map(|output| (node.id.clone(), output)))
                .collect();
            self.log(LogLevel::Info, None, "Execution succeeded");
            self.execution.succeed(result)
        };

        if let Err(e) = finished {
            tracing::error!(error = %e, "Execution could not be finalized");
        }
        self.save().await;
        lock(&self.running).remove(&self.execution.id);

        tracing::info!(status = %self.execution.status, "Execution finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Workflow;
    use crate::edge::Connection;
    use crate::execution::{ExecutionStatus, NodeRunStatus};
    use crate::node::{Node, NodeRole};
    use crate::store::InMemoryGraphStore;
    use crate::validator::IssueCode;
    use async_trait::async_trait;
    use conduit_connector::{ConfigSchema, Connector, ConnectorError, ConnectorType};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Transform that fails every record batch.
    struct Failing;

    #[async_trait]
    impl Connector for Failing {
        fn id(&self) -> &str {
            "failing"
        }
        fn name(&self) -> &str {
            "Failing"
        }
        fn connector_type(&self) -> ConnectorType {
            ConnectorType::Transform
        }
        fn config_schema(&self) -> ConfigSchema {
            ConfigSchema::new()
        }
        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            _config: &JsonValue,
            _input: DataEnvelope,
        ) -> Result<DataEnvelope, ConnectorError> {
            Err(ConnectorError::ExecutionFailed {
                reason: "upstream API returned 500".to_string(),
            })
        }
    }

    struct Panicking;

    #[async_trait]
    impl Connector for Panicking {
        fn id(&self) -> &str {
            "panicking"
        }
        fn name(&self) -> &str {
            "Panicking"
        }
        fn connector_type(&self) -> ConnectorType {
            ConnectorType::Transform
        }
        fn config_schema(&self) -> ConfigSchema {
            ConfigSchema::new()
        }
        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            _config: &JsonValue,
            _input: DataEnvelope,
        ) -> Result<DataEnvelope, ConnectorError> {
            panic!("bug in connector");
        }
    }

    /// Source that blocks until released, tracking how many run at once.
    struct Gate {
        release: Semaphore,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gate {
        fn new() -> Self {
            Self {
                release: Semaphore::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    struct Gated(Arc<Gate>);

    #[async_trait]
    impl Connector for Gated {
        fn id(&self) -> &str {
            "gated"
        }
        fn name(&self) -> &str {
            "Gated"
        }
        fn connector_type(&self) -> ConnectorType {
            ConnectorType::Source
        }
        fn config_schema(&self) -> ConfigSchema {
            ConfigSchema::new()
        }
        async fn execute(
            &self,
            ctx: &ExecutionContext,
            _config: &JsonValue,
            _input: DataEnvelope,
        ) -> Result<DataEnvelope, ConnectorError> {
            let now = self.0.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.0.peak.fetch_max(now, Ordering::SeqCst);
            let permit = self.0.release.acquire().await;
            self.0.active.fetch_sub(1, Ordering::SeqCst);
            permit
                .map_err(|e| ConnectorError::ExecutionFailed { reason: e.to_string() })?
                .forget();
            Ok(DataEnvelope::from_payload(&json!([{ "from": ctx.node_id.as_str() }])))
        }
    }

    fn id(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn static_node(name: &str, label: &str, records: JsonValue) -> Node {
        Node::new(id(name), "static_source", NodeRole::Source)
            .with_label(label)
            .with_config(json!({ "records": records }))
    }

    fn node(name: &str, connector: &str, role: NodeRole) -> Node {
        Node::new(id(name), connector, role)
    }

    fn connect(from: &str, to: &str) -> Connection {
        Connection::new(id(from), id(to))
    }

    struct Harness {
        engine: ExecutionEngine,
        store: Arc<InMemoryGraphStore>,
        owner: UserId,
        gate: Arc<Gate>,
    }

    fn registry(gate: &Arc<Gate>) -> Arc<ConnectorRegistry> {
        let mut registry = ConnectorRegistry::with_builtins();
        registry.register(Arc::new(Failing)).unwrap();
        registry.register(Arc::new(Panicking)).unwrap();
        registry.register(Arc::new(Gated(gate.clone()))).unwrap();
        Arc::new(registry)
    }

    fn harness(config: EngineConfig) -> Harness {
        let gate = Arc::new(Gate::new());
        let store = Arc::new(InMemoryGraphStore::new());
        let engine = ExecutionEngine::new(store.clone(), registry(&gate), config);
        Harness {
            engine,
            store,
            owner: UserId::new(),
            gate,
        }
    }

    impl Harness {
        async fn workflow(&self, graph: GraphDefinition) -> WorkflowId {
            let workflow = Workflow::new(self.owner, "test");
            self.store.create_workflow(&workflow).await.unwrap();
            self.store.replace_graph(workflow.id, &graph).await.unwrap();
            workflow.id
        }

        async fn run(&self, workflow_id: WorkflowId, payload: Option<JsonValue>) -> Execution {
            let started = self
                .engine
                .execute(ExecutionRequest::manual(self.owner, workflow_id, payload))
                .await
                .unwrap();
            self.wait(started.id).await
        }

        async fn wait(&self, execution_id: ExecutionId) -> Execution {
            for _ in 0..500 {
                let execution = self.engine.status(self.owner, execution_id).await.unwrap();
                if execution.status.is_terminal() {
                    return execution;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("execution {execution_id} did not finish");
        }

        async fn wait_for_peak(&self, expected: usize) {
            for _ in 0..500 {
                if self.gate.active.load(Ordering::SeqCst) >= expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            panic!("gate never reached {expected} active nodes");
        }
    }

    fn status_of(execution: &Execution, node: &str) -> NodeRunStatus {
        execution.node_result(&id(node)).map(|r| r.status).unwrap()
    }

    #[tokio::test]
    async fn linear_workflow_succeeds() {
        let h = harness(EngineConfig::default());
        let workflow_id = h
            .workflow(GraphDefinition::new(
                vec![
                    static_node("src", "Seed", json!([{"name": " Ada "}, {"name": "Grace"}])),
                    node("clean", "transform_processor", NodeRole::Transform).with_config(json!({
                        "transformations": [
                            {"type": "trim", "source_field": "name"},
                            {"type": "uppercase", "source_field": "name"}
                        ]
                    })),
                    node("out", "log_destination", NodeRole::Sink),
                ],
                vec![connect("src", "clean"), connect("clean", "out")],
            ))
            .await;

        let execution = h.run(workflow_id, None).await;

        assert_eq!(execution.status, ExecutionStatus::Success);
        assert!(execution.started_at.is_some());
        assert!(execution.completed_at.is_some());
        let result = execution.result.as_ref().expect("result");
        let out = &result[&id("out")];
        assert_eq!(out.data[0]["name"], json!("ADA"));
        assert_eq!(out.metadata.node_id, Some(id("out")));
        assert_eq!(out.metadata.sources, vec![id("clean")]);
        assert!(execution.node_results.iter().all(|r| r.status == NodeRunStatus::Success));
        assert_eq!(execution.node_result(&id("src")).unwrap().record_count, 2);
    }

    #[tokio::test]
    async fn execute_returns_before_nodes_run() {
        let h = harness(EngineConfig::default());
        let workflow_id = h
            .workflow(GraphDefinition::new(vec![node("wait", "gated", NodeRole::Source)], vec![]))
            .await;

        let started = h
            .engine
            .execute(ExecutionRequest::manual(h.owner, workflow_id, None))
            .await
            .unwrap();
        assert_eq!(started.status, ExecutionStatus::Pending);
        assert_eq!(started.node_results.len(), 1);

        h.wait_for_peak(1).await;
        let snapshot = h.engine.status(h.owner, started.id).await.unwrap();
        assert_eq!(snapshot.status, ExecutionStatus::Running);
        assert_eq!(status_of(&snapshot, "wait"), NodeRunStatus::Running);
        assert!(h.engine.is_running(started.id));

        h.gate.release.add_permits(1);
        let finished = h.wait(started.id).await;
        assert_eq!(finished.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn webhook_payload_feeds_sources() {
        let h = harness(EngineConfig::default());
        let workflow_id = h
            .workflow(GraphDefinition::new(
                vec![
                    node("hook", "trigger_payload", NodeRole::Source),
                    node("out", "log_destination", NodeRole::Sink),
                ],
                vec![connect("hook", "out")],
            ))
            .await;

        let started = h
            .engine
            .execute(ExecutionRequest::webhook(
                h.owner,
                workflow_id,
                json!({"event": "signup", "user": "ada"}),
            ))
            .await
            .unwrap();
        let execution = h.wait(started.id).await;

        assert_eq!(execution.status, ExecutionStatus::Success);
        let out = &execution.result.as_ref().unwrap()[&id("out")];
        assert_eq!(out.len(), 1);
        assert_eq!(out.data[0]["event"], json!("signup"));
    }

    #[tokio::test]
    async fn join_merges_upstreams_with_prefixes() {
        let h = harness(EngineConfig::default());
        let workflow_id = h
            .workflow(GraphDefinition::new(
                vec![
                    static_node("a", "CSV", json!([{"id": 1, "name": "Ada"}])),
                    static_node("b", "API", json!([{"id": 2, "email": "b@example.com"}])),
                    node("out", "log_destination", NodeRole::Sink),
                ],
                vec![connect("a", "out"), connect("b", "out")],
            ))
            .await;

        let execution = h.run(workflow_id, None).await;
        let out = &execution.result.as_ref().unwrap()[&id("out")];

        assert_eq!(out.len(), 2);
        assert_eq!(out.data[0]["CSV_id"], json!(1));
        assert_eq!(out.data[1]["API_id"], json!(2));
        let names: Vec<_> = out.metadata.schema.field_names().collect();
        assert_eq!(names, vec!["CSV_id", "name", "API_id", "email"]);
        assert_eq!(out.metadata.sources, vec![id("a"), id("b")]);
    }

    #[tokio::test]
    async fn failure_skips_dependents_but_finishes_independent_branches() {
        let h = harness(EngineConfig::default());
        let workflow_id = h
            .workflow(GraphDefinition::new(
                vec![
                    static_node("a", "A", json!([{"x": 1}])),
                    node("bad", "failing", NodeRole::Transform).with_label("Enrich"),
                    node("after", "log_destination", NodeRole::Sink),
                    static_node("c", "C", json!([{"y": 2}])),
                    node("other", "log_destination", NodeRole::Sink),
                ],
                vec![connect("a", "bad"), connect("bad", "after"), connect("c", "other")],
            ))
            .await;

        let execution = h.run(workflow_id, None).await;

        assert_eq!(execution.status, ExecutionStatus::Failure);
        assert_eq!(execution.failed_node, Some(id("bad")));
        let error = execution.error.as_deref().unwrap();
        assert!(error.contains("Enrich"));
        assert!(error.contains("upstream API returned 500"));
        assert_eq!(status_of(&execution, "bad"), NodeRunStatus::Failure);
        assert_eq!(status_of(&execution, "after"), NodeRunStatus::Skipped);
        assert_eq!(status_of(&execution, "other"), NodeRunStatus::Success);
        assert!(execution.result.is_none());
    }

    #[tokio::test]
    async fn halt_policy_stops_scheduling() {
        let h = harness(EngineConfig {
            max_parallel_nodes: 1,
            failure_policy: FailurePolicy::Halt,
            ..EngineConfig::default()
        });
        let workflow_id = h
            .workflow(GraphDefinition::new(
                vec![
                    static_node("a", "A", json!([{"x": 1}])),
                    node("bad", "failing", NodeRole::Transform),
                    static_node("c", "C", json!([{"y": 2}])),
                    node("other", "log_destination", NodeRole::Sink),
                    node("end", "log_destination", NodeRole::Sink),
                ],
                vec![connect("a", "bad"), connect("bad", "end"), connect("c", "other")],
            ))
            .await;

        let execution = h.run(workflow_id, None).await;

        // one node at a time: a, then bad; c never starts
        assert_eq!(execution.status, ExecutionStatus::Failure);
        assert_eq!(status_of(&execution, "a"), NodeRunStatus::Success);
        assert_eq!(status_of(&execution, "bad"), NodeRunStatus::Failure);
        assert_eq!(status_of(&execution, "c"), NodeRunStatus::Skipped);
        assert_eq!(status_of(&execution, "other"), NodeRunStatus::Skipped);
        assert_eq!(status_of(&execution, "end"), NodeRunStatus::Skipped);
        let skipped = execution.node_result(&id("other")).unwrap();
        assert!(skipped.error.as_deref().unwrap().contains("halted"));
    }

    #[tokio::test]
    async fn panicking_connector_fails_its_node() {
        let h = harness(EngineConfig::default());
        let workflow_id = h
            .workflow(GraphDefinition::new(
                vec![
                    static_node("a", "A", json!([{"x": 1}])),
                    node("boom", "panicking", NodeRole::Transform),
                ],
                vec![connect("a", "boom")],
            ))
            .await;

        let execution = h.run(workflow_id, None).await;

        assert_eq!(execution.status, ExecutionStatus::Failure);
        let boom = execution.node_result(&id("boom")).unwrap();
        assert_eq!(boom.error.as_deref(), Some("connector panicked"));
        assert!(!h.engine.is_running(execution.id));
    }

    #[tokio::test]
    async fn parallelism_is_bounded() {
        let h = harness(EngineConfig {
            max_parallel_nodes: 2,
            ..EngineConfig::default()
        });
        let workflow_id = h
            .workflow(GraphDefinition::new(
                vec![
                    node("g1", "gated", NodeRole::Source),
                    node("g2", "gated", NodeRole::Source),
                    node("g3", "gated", NodeRole::Source),
                ],
                vec![],
            ))
            .await;

        let started = h
            .engine
            .execute(ExecutionRequest::manual(h.owner, workflow_id, None))
            .await
            .unwrap();

        h.wait_for_peak(2).await;
        h.gate.release.add_permits(3);

        let execution = h.wait(started.id).await;
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(h.gate.peak.load(Ordering::SeqCst), 2);
        assert_eq!(execution.result.as_ref().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn cancel_stops_between_steps() {
        let h = harness(EngineConfig::default());
        let workflow_id = h
            .workflow(GraphDefinition::new(
                vec![
                    node("wait", "gated", NodeRole::Source),
                    node("out", "log_destination", NodeRole::Sink),
                ],
                vec![connect("wait", "out")],
            ))
            .await;

        let started = h
            .engine
            .execute(ExecutionRequest::manual(h.owner, workflow_id, None))
            .await
            .unwrap();
        h.wait_for_peak(1).await;

        h.engine.cancel(h.owner, started.id).await.unwrap();
        h.gate.release.add_permits(1);
        let execution = h.wait(started.id).await;

        assert_eq!(execution.status, ExecutionStatus::Failure);
        assert_eq!(execution.error.as_deref(), Some("execution cancelled"));
        assert_eq!(status_of(&execution, "wait"), NodeRunStatus::Success);
        assert_eq!(status_of(&execution, "out"), NodeRunStatus::Skipped);

        let err = h.engine.cancel(h.owner, started.id).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            EngineError::ExecutionFinished { .. }
        ));
    }

    #[tokio::test]
    async fn cancel_without_live_run_marks_failure() {
        let h = harness(EngineConfig::default());
        let workflow_id = h
            .workflow(GraphDefinition::new(
                vec![static_node("a", "A", json!([]))],
                vec![],
            ))
            .await;
        let orphan = Execution::new(workflow_id, h.owner, crate::trigger::TriggerKind::Manual);
        h.store.create_execution(&orphan).await.unwrap();

        let cancelled = h.engine.cancel(h.owner, orphan.id).await.unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Failure);

        let stored = h.engine.status(h.owner, orphan.id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failure);
    }

    #[tokio::test]
    async fn invalid_graph_is_refused_without_creating_execution() {
        let h = harness(EngineConfig::default());
        let workflow_id = h
            .workflow(GraphDefinition::new(
                vec![
                    static_node("root", "Root", json!([])),
                    node("a", "log_destination", NodeRole::Sink),
                    node("b", "log_destination", NodeRole::Sink),
                ],
                vec![connect("root", "a"), connect("a", "b"), connect("b", "a")],
            ))
            .await;

        let err = h
            .engine
            .execute(ExecutionRequest::manual(h.owner, workflow_id, None))
            .await
            .unwrap_err();
        match err.current_context() {
            EngineError::InvalidGraph { result } => assert!(result.has_error(IssueCode::Cycle)),
            other => panic!("unexpected error: {other}"),
        }
        assert!(
            h.engine
                .list_executions(h.owner, workflow_id, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn inactive_and_foreign_workflows_are_refused() {
        let h = harness(EngineConfig::default());
        let mut workflow = Workflow::new(h.owner, "off");
        workflow.active = false;
        h.store.create_workflow(&workflow).await.unwrap();

        let err = h
            .engine
            .execute(ExecutionRequest::manual(h.owner, workflow.id, None))
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            EngineError::WorkflowInactive { .. }
        ));

        let err = h
            .engine
            .execute(ExecutionRequest::manual(UserId::new(), workflow.id, None))
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            EngineError::WorkflowNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn terminal_status_never_reverts() {
        let h = harness(EngineConfig::default());
        let workflow_id = h
            .workflow(GraphDefinition::new(vec![static_node("a", "A", json!([{"x": 1}]))], vec![]))
            .await;
        let execution = h.run(workflow_id, None).await;

        for _ in 0..5 {
            let again = h.engine.status(h.owner, execution.id).await.unwrap();
            assert_eq!(again.status, ExecutionStatus::Success);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let listed = h.engine.list_executions(h.owner, workflow_id, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].logs.is_empty());
    }

    /// Store whose execution reads stall until the test lets them through.
    struct StalledReads {
        inner: Arc<InMemoryGraphStore>,
        read: tokio::sync::Notify,
        resume: Semaphore,
    }

    #[async_trait]
    impl GraphStore for StalledReads {
        async fn create_workflow(&self, workflow: &Workflow) -> Result<(), Report<crate::StoreError>> {
            self.inner.create_workflow(workflow).await
        }
        async fn get_workflow(
            &self,
            owner_id: UserId,
            workflow_id: WorkflowId,
        ) -> Result<Option<Workflow>, Report<crate::StoreError>> {
            self.inner.get_workflow(owner_id, workflow_id).await
        }
        async fn list_workflows(&self, owner_id: UserId) -> Result<Vec<Workflow>, Report<crate::StoreError>> {
            self.inner.list_workflows(owner_id).await
        }
        async fn update_workflow(&self, workflow: &Workflow) -> Result<(), Report<crate::StoreError>> {
            self.inner.update_workflow(workflow).await
        }
        async fn delete_workflow(
            &self,
            owner_id: UserId,
            workflow_id: WorkflowId,
        ) -> Result<bool, Report<crate::StoreError>> {
            self.inner.delete_workflow(owner_id, workflow_id).await
        }
        async fn load_graph(&self, workflow_id: WorkflowId) -> Result<GraphDefinition, Report<crate::StoreError>> {
            self.inner.load_graph(workflow_id).await
        }
        async fn replace_graph(
            &self,
            workflow_id: WorkflowId,
            graph: &GraphDefinition,
        ) -> Result<(), Report<crate::StoreError>> {
            self.inner.replace_graph(workflow_id, graph).await
        }
        async fn create_execution(&self, execution: &Execution) -> Result<(), Report<crate::StoreError>> {
            self.inner.create_execution(execution).await
        }
        async fn update_execution(&self, execution: &Execution) -> Result<bool, Report<crate::StoreError>> {
            self.inner.update_execution(execution).await
        }
        async fn get_execution(
            &self,
            owner_id: UserId,
            execution_id: ExecutionId,
        ) -> Result<Option<Execution>, Report<crate::StoreError>> {
            let found = self.inner.get_execution(owner_id, execution_id).await;
            self.read.notify_one();
            if let Ok(permit) = self.resume.acquire().await {
                permit.forget();
            }
            found
        }
        async fn list_executions(
            &self,
            workflow_id: WorkflowId,
            limit: usize,
        ) -> Result<Vec<Execution>, Report<crate::StoreError>> {
            self.inner.list_executions(workflow_id, limit).await
        }
    }

    #[tokio::test]
    async fn cancel_racing_completion_keeps_success() {
        let gate = Arc::new(Gate::new());
        let inner = Arc::new(InMemoryGraphStore::new());
        let store = Arc::new(StalledReads {
            inner: inner.clone(),
            read: tokio::sync::Notify::new(),
            resume: Semaphore::new(0),
        });
        let engine = ExecutionEngine::new(store.clone(), registry(&gate), EngineConfig::default());

        let owner = UserId::new();
        let workflow = Workflow::new(owner, "race");
        inner.create_workflow(&workflow).await.unwrap();
        inner
            .replace_graph(
                workflow.id,
                &GraphDefinition::new(vec![node("wait", "gated", NodeRole::Source)], vec![]),
            )
            .await
            .unwrap();

        let started = engine
            .execute(ExecutionRequest::manual(owner, workflow.id, None))
            .await
            .unwrap();
        for _ in 0..500 {
            if gate.active.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // cancel reads a running snapshot, then stalls
        let cancel = tokio::spawn({
            let engine = engine.clone();
            async move { engine.cancel(owner, started.id).await }
        });
        store.read.notified().await;

        // the run finishes before cancel acts on its snapshot
        gate.release.add_permits(1);
        for _ in 0..500 {
            if !engine.is_running(started.id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(!engine.is_running(started.id));

        store.resume.add_permits(1);
        let err = cancel.await.unwrap().unwrap_err();
        assert!(matches!(
            err.current_context(),
            EngineError::ExecutionFinished { .. }
        ));

        let stored = inner.get_execution(owner, started.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Success);
        assert!(stored.error.is_none());
        assert_eq!(status_of(&stored, "wait"), NodeRunStatus::Success);
        assert!(stored.logs.iter().any(|entry| entry.message == "Execution succeeded"));
    }

    #[tokio::test]
    async fn aborted_node_task_fails_its_node() {
        let mut tasks: JoinSet<NodeOutcome> = JoinSet::new();
        let handle = tasks.spawn(std::future::pending());
        let mut in_flight = HashMap::from([(handle.id(), id("stuck"))]);
        handle.abort();

        let joined = tasks.join_next().await.unwrap();
        let outcome = settle(&mut in_flight, joined).unwrap();

        assert_eq!(outcome.node_id, id("stuck"));
        assert!(outcome.result.unwrap_err().contains("ended abnormally"));
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn finished_node_task_leaves_in_flight() {
        let mut tasks: JoinSet<NodeOutcome> = JoinSet::new();
        let handle = tasks.spawn(async {
            NodeOutcome {
                node_id: NodeId::new("done").unwrap(),
                result: Ok(DataEnvelope::empty()),
                duration_ms: 1,
            }
        });
        let mut in_flight = HashMap::from([(handle.id(), id("done"))]);

        let joined = tasks.join_next().await.unwrap();
        let outcome = settle(&mut in_flight, joined).unwrap();
        assert!(outcome.result.is_ok());
        assert!(in_flight.is_empty());
    }
}
