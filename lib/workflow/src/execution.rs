//! Workflow execution records.
//!
//! An execution moves `pending -> running -> success | failure`. Terminal
//! statuses are final: every transition goes through
//! [`ExecutionStatus::can_transition_to`], and stores refuse to overwrite a
//! record that is already terminal.
//! Per-node results are filled in as nodes finish, which is what callers
//! see while polling.

use crate::error::ExecutionError;
use crate::node::Node;
use crate::trigger::TriggerKind;
use chrono::{DateTime, Utc};
use conduit_core::{DataEnvelope, ExecutionId, NodeId, UserId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The overall status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, no node has run yet.
    Pending,
    /// Nodes are executing.
    Running,
    /// Every node completed.
    Success,
    /// At least one node failed, or the execution was cancelled.
    Failure,
}

impl ExecutionStatus {
    /// Returns true if this is a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    /// Returns true if moving from `self` to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Failure)
                | (Self::Running, Self::Success | Self::Failure)
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The status of a single node within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    /// Waiting for predecessors.
    Pending,
    Running,
    Success,
    Failure,
    /// Never ran: an upstream node failed, or scheduling stopped.
    Skipped,
}

impl NodeRunStatus {
    /// Returns true if this is a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Skipped)
    }
}

/// Outcome of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: NodeId,
    #[serde(default)]
    pub label: String,
    pub connector_id: String,
    pub status: NodeRunStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub record_count: usize,
    /// The node's output envelope, when it succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<DataEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeResult {
    /// Creates a pending result for a node.
    #[must_use]
    pub fn pending(node: &Node) -> Self {
        Self {
            node_id: node.id.clone(),
            label: node.label.clone(),
            connector_id: node.connector_id.clone(),
            status: NodeRunStatus::Pending,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            record_count: 0,
            output: None,
            error: None,
        }
    }

    /// Marks the node as running.
    pub fn start(&mut self, at: DateTime<Utc>) {
        self.status = NodeRunStatus::Running;
        self.started_at = Some(at);
    }

    /// Marks the node as successful.
    pub fn succeed(&mut self, output: DataEnvelope, duration_ms: u64) {
        self.status = NodeRunStatus::Success;
        self.finished_at = Some(Utc::now());
        self.duration_ms = Some(duration_ms);
        self.record_count = output.len();
        self.output = Some(output);
    }

    /// Marks the node as failed.
    pub fn fail(&mut self, error: impl Into<String>, duration_ms: u64) {
        self.status = NodeRunStatus::Failure;
        self.finished_at = Some(Utc::now());
        self.duration_ms = Some(duration_ms);
        self.error = Some(error.into());
    }

    /// Marks the node as skipped.
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = NodeRunStatus::Skipped;
        self.finished_at = Some(Utc::now());
        self.error = Some(reason.into());
    }
}

/// Severity of an execution log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A user-visible line in an execution's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub message: String,
}

/// One run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub owner_id: UserId,
    pub trigger: TriggerKind,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Per-node outcomes in execution order.
    #[serde(default)]
    pub node_results: Vec<NodeResult>,
    /// Outputs of terminal nodes, set on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BTreeMap<NodeId, DataEnvelope>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The first node that failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_node: Option<NodeId>,
    #[serde(default)]
    pub logs: Vec<ExecutionLogEntry>,
}

impl Execution {
    /// Creates a pending execution.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, owner_id: UserId, trigger: TriggerKind) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id,
            owner_id,
            trigger,
            status: ExecutionStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            node_results: Vec::new(),
            result: None,
            error: None,
            failed_node: None,
            logs: Vec::new(),
        }
    }

    fn transition(&mut self, to: ExecutionStatus) -> Result<(), ExecutionError> {
        if !self.status.can_transition_to(to) {
            return Err(ExecutionError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Moves to `running`.
    ///
    /// # Errors
    ///
    /// Returns an error unless the execution is pending.
    pub fn start(&mut self) -> Result<(), ExecutionError> {
        self.transition(ExecutionStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Moves to `success` with the terminal nodes' outputs.
    ///
    /// # Errors
    ///
    /// Returns an error unless the execution is running.
    pub fn succeed(&mut self, result: BTreeMap<NodeId, DataEnvelope>) -> Result<(), ExecutionError> {
        self.transition(ExecutionStatus::Success)?;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
        Ok(())
    }

    /// Moves to `failure`.
    ///
    /// # Errors
    ///
    /// Returns an error if the execution is already terminal.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        failed_node: Option<NodeId>,
    ) -> Result<(), ExecutionError> {
        self.transition(ExecutionStatus::Failure)?;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
        self.failed_node = failed_node;
        Ok(())
    }

    /// Returns the result for a node.
    #[must_use]
    pub fn node_result(&self, node_id: &NodeId) -> Option<&NodeResult> {
        self.node_results.iter().find(|r| &r.node_id == node_id)
    }

    /// Returns the mutable result for a node.
    pub fn node_result_mut(&mut self, node_id: &NodeId) -> Option<&mut NodeResult> {
        self.node_results.iter_mut().find(|r| &r.node_id == node_id)
    }

    /// Appends a log entry, dropping the oldest entries beyond `limit`.
    pub fn log(
        &mut self,
        level: LogLevel,
        node_id: Option<&NodeId>,
        message: impl Into<String>,
        limit: usize,
    ) {
        self.logs.push(ExecutionLogEntry {
            timestamp: Utc::now(),
            level,
            node_id: node_id.cloned(),
            message: message.into(),
        });
        if self.logs.len() > limit {
            let excess = self.logs.len() - limit;
            self.logs.drain(..excess);
        }
    }

    /// Returns the duration of the run, if it has started.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some(end - start)
    }
}
