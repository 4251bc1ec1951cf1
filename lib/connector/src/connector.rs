//! Connector trait and related types.
//!
//! Every processing unit a node can be bound to implements [`Connector`],
//! giving the engine a uniform interface for identity, configuration,
//! schema description, and execution.

use crate::config::ConfigSchema;
use crate::error::{ConfigError, ConnectorError};
use async_trait::async_trait;
use conduit_core::{DataEnvelope, DataSchema, ExecutionId, NodeId, UserId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// The declared role of a connector, and of the nodes bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    /// Produces data; has no upstream.
    Source,
    /// Reshapes data from upstream nodes.
    Transform,
    /// Delivers data somewhere; typically terminal.
    Sink,
}

impl ConnectorType {
    /// Returns the role name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Transform => "transform",
            Self::Sink => "sink",
        }
    }

    /// Parses a role name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "source" => Some(Self::Source),
            "transform" => Some(Self::Transform),
            "sink" => Some(Self::Sink),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Information about a connector, as listed to editors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorInfo {
    /// Unique identifier for this connector.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Declared role.
    #[serde(rename = "type")]
    pub connector_type: ConnectorType,
    /// Description of what the connector does.
    pub description: String,
    /// Configuration descriptor.
    pub config_schema: ConfigSchema,
}

/// Data available to a connector while it executes one node.
///
/// Carries identity and the execution's cancellation scope only; nothing
/// from the request that triggered the execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workflow_id: WorkflowId,
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub owner_id: UserId,
    /// Cancelled when the execution is cancelled.
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    /// Returns true if the execution has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Returns `Err(Cancelled)` if the execution has been cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Cancelled`] when cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), ConnectorError> {
        if self.is_cancelled() {
            Err(ConnectorError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Trait for pluggable processing units.
///
/// Connectors are registered once at startup and are stateless per
/// execution: all per-node state arrives through `config` and `input`.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Unique identifier.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Declared role.
    fn connector_type(&self) -> ConnectorType;

    /// Description of what the connector does.
    fn description(&self) -> &str {
        ""
    }

    /// Describes the configuration document this connector accepts.
    fn config_schema(&self) -> ConfigSchema;

    /// Validates a node's configuration document.
    ///
    /// The default performs the structural check of [`Connector::config_schema`].
    ///
    /// # Errors
    ///
    /// Returns an error identifying the offending field.
    fn validate(&self, config: &JsonValue) -> Result<(), ConfigError> {
        self.config_schema().check(config)
    }

    /// Whether [`Connector::output_schema`] needs the resolved input schema.
    fn uses_input_schema(&self) -> bool {
        self.connector_type() != ConnectorType::Source
    }

    /// Describes the shape of this connector's output for a node.
    ///
    /// `input` is the node's merged input schema (empty for sources or when
    /// [`Connector::uses_input_schema`] is false). The default passes it
    /// through unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the shape cannot be determined from the configuration.
    async fn output_schema(
        &self,
        node_id: &NodeId,
        config: &JsonValue,
        input: &DataSchema,
    ) -> Result<DataSchema, ConnectorError> {
        let _ = (node_id, config);
        Ok(input.clone())
    }

    /// Executes the connector for one node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node fails; the engine records it on the node.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        config: &JsonValue,
        input: DataEnvelope,
    ) -> Result<DataEnvelope, ConnectorError>;

    /// Returns information about this connector.
    fn info(&self) -> ConnectorInfo {
        ConnectorInfo {
            id: self.id().to_string(),
            name: self.name().to_string(),
            connector_type: self.connector_type(),
            description: self.description().to_string(),
            config_schema: self.config_schema(),
        }
    }
}
