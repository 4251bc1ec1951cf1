//! Trigger types for workflow initiation.
//!
//! Manual runs and webhook deliveries both reduce to one
//! [`ExecutionRequest`]; the engine never sees the transport that produced it.

use conduit_core::{UserId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// What started an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// User-initiated run.
    Manual,
    /// HTTP webhook delivery.
    Webhook,
}

impl TriggerKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Webhook => "webhook",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "manual" => Some(Self::Manual),
            "webhook" => Some(Self::Webhook),
            _ => None,
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to run a workflow.
///
/// Carries only the data the run needs: the caller, the workflow and the
/// payload handed to source nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub owner_id: UserId,
    pub workflow_id: WorkflowId,
    pub trigger: TriggerKind,
    /// Input for source nodes. `null` means no payload.
    #[serde(default)]
    pub payload: JsonValue,
}

impl ExecutionRequest {
    /// A manual run; the payload is empty unless supplied.
    #[must_use]
    pub fn manual(owner_id: UserId, workflow_id: WorkflowId, payload: Option<JsonValue>) -> Self {
        Self {
            owner_id,
            workflow_id,
            trigger: TriggerKind::Manual,
            payload: payload.unwrap_or(JsonValue::Null),
        }
    }

    /// A webhook delivery; the payload is the delivered body.
    #[must_use]
    pub fn webhook(owner_id: UserId, workflow_id: WorkflowId, payload: JsonValue) -> Self {
        Self {
            owner_id,
            workflow_id,
            trigger: TriggerKind::Webhook,
            payload,
        }
    }
}
