//! Error types for the workflow crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `GraphError`: building and ordering a graph
//! - `StoreError`: the persistence collaborator
//! - `InferenceError`: schema inference and sample previews for one node
//! - `ExecutionError`: execution state machine violations
//! - `EngineError`: starting, cancelling and querying executions
//! - `WorkflowError`: workflow management operations

use crate::execution::ExecutionStatus;
use crate::validator::ValidationResult;
use conduit_core::{ExecutionId, NodeId, WorkflowId};
use std::fmt;

/// Errors from graph operations.
///
/// These errors contain only information available at the graph layer.
/// Workflow-level context should be added by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Two nodes share an ID.
    DuplicateNode { node_id: NodeId },
    /// Node with the given ID was not found in the graph.
    NodeNotFound { node_id: NodeId },
    /// Graph contains cycles through the listed nodes.
    CycleDetected { nodes: Vec<NodeId> },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateNode { node_id } => write!(f, "duplicate node: {node_id}"),
            Self::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
            Self::CycleDetected { nodes } => {
                let names: Vec<&str> = nodes.iter().map(NodeId::as_str).collect();
                write!(f, "graph contains a cycle through: {}", names.join(", "))
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors from the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing database rejected or failed an operation.
    Database { details: String },
    /// A stored row could not be converted into a domain value.
    Decode { details: String },
    /// An update targeted a row that does not exist.
    Missing { entity: &'static str, id: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database { details } => write!(f, "database error: {details}"),
            Self::Decode { details } => write!(f, "failed to decode stored data: {details}"),
            Self::Missing { entity, id } => write!(f, "{entity} not found: {id}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from schema inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// Workflow not found, or not owned by the caller.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// The node is not part of the workflow.
    NodeNotFound { node_id: NodeId },
    /// The node's connector is not registered.
    ConnectorNotFound { node_id: NodeId, connector_id: String },
    /// The node's output depends on itself.
    CycleDetected { node_id: NodeId },
    /// The connector could not describe its output.
    Connector { node_id: NodeId, reason: String },
    /// The connector failed while producing sample records.
    Sample { node_id: NodeId, reason: String },
    /// Loading the graph failed.
    Store { details: String },
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound { workflow_id } => write!(f, "workflow not found: {workflow_id}"),
            Self::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
            Self::ConnectorNotFound {
                node_id,
                connector_id,
            } => write!(f, "connector '{connector_id}' for node {node_id} is not registered"),
            Self::CycleDetected { node_id } => {
                write!(f, "schema of node {node_id} depends on itself")
            }
            Self::Connector { node_id, reason } => {
                write!(f, "cannot describe output of node {node_id}: {reason}")
            }
            Self::Sample { node_id, reason } => {
                write!(f, "node {node_id} could not produce sample data: {reason}")
            }
            Self::Store { details } => write!(f, "failed to load workflow: {details}"),
        }
    }
}

impl std::error::Error for InferenceError {}

/// Errors from the execution state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The requested status change would leave a terminal state or go backwards.
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { from, to } => {
                write!(f, "invalid execution status transition from {from} to {to}")
            }
        }
    }
}

impl std::error::Error for ExecutionError {}

/// Errors from the execution engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Workflow not found, or not owned by the caller.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// The workflow is switched off.
    WorkflowInactive { workflow_id: WorkflowId },
    /// The stored graph failed validation; no execution was created.
    InvalidGraph { result: ValidationResult },
    /// The graph could not be ordered for execution.
    Graph(GraphError),
    /// Execution not found, or not owned by the caller.
    ExecutionNotFound { execution_id: ExecutionId },
    /// The execution already reached a terminal status.
    ExecutionFinished { execution_id: ExecutionId },
    /// The persistence collaborator failed.
    Store { details: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound { workflow_id } => write!(f, "workflow not found: {workflow_id}"),
            Self::WorkflowInactive { workflow_id } => {
                write!(f, "workflow {workflow_id} is inactive")
            }
            Self::InvalidGraph { result } => write!(f, "workflow graph is invalid: {result}"),
            Self::Graph(e) => write!(f, "{e}"),
            Self::ExecutionNotFound { execution_id } => {
                write!(f, "execution not found: {execution_id}")
            }
            Self::ExecutionFinished { execution_id } => {
                write!(f, "execution {execution_id} has already finished")
            }
            Self::Store { details } => write!(f, "storage failure: {details}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<GraphError> for EngineError {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}

/// Errors from workflow management operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// Workflow not found, or not owned by the caller.
    NotFound { workflow_id: WorkflowId },
    /// The workflow name is empty.
    InvalidName,
    /// The persistence collaborator failed.
    Store { details: String },
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { workflow_id } => write!(f, "workflow not found: {workflow_id}"),
            Self::InvalidName => write!(f, "workflow name must not be empty"),
            Self::Store { details } => write!(f, "storage failure: {details}"),
        }
    }
}

impl std::error::Error for WorkflowError {}
