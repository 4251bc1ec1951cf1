//! Workflow nodes.
//!
//! A node binds one connector to one configuration document. Its role
//! mirrors the connector's declared type and decides whether the node has
//! an upstream at all.

use conduit_connector::ConnectorType;
use conduit_core::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The role a node plays in its graph.
pub type NodeRole = ConnectorType;

/// A graph vertex bound to one connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Editor-assigned ID, unique within the workflow.
    pub id: NodeId,
    /// ID of the connector this node runs.
    pub connector_id: String,
    /// Declared role; must agree with the connector's type.
    pub role: NodeRole,
    /// Human label, also used to prefix conflicting field names.
    #[serde(default)]
    pub label: String,
    /// Opaque connector configuration.
    #[serde(default)]
    pub config: JsonValue,
}

impl Node {
    /// Creates a node with an empty label and no configuration.
    #[must_use]
    pub fn new(id: NodeId, connector_id: impl Into<String>, role: NodeRole) -> Self {
        Self {
            id,
            connector_id: connector_id.into(),
            role,
            label: String::new(),
            config: JsonValue::Null,
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the configuration document.
    #[must_use]
    pub fn with_config(mut self, config: JsonValue) -> Self {
        self.config = config;
        self
    }

    /// Returns true for source nodes, which never have an upstream.
    #[must_use]
    pub fn is_source(&self) -> bool {
        self.role == NodeRole::Source
    }

    /// Prefix used when this node's fields collide with another upstream's.
    ///
    /// The label exactly as given when set, otherwise the first eight
    /// characters of the ID.
    #[must_use]
    pub fn conflict_prefix(&self) -> String {
        if self.label.is_empty() {
            self.id.short(8).to_string()
        } else {
            self.label.clone()
        }
    }

    /// Returns the label, falling back to the ID.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.label.trim().is_empty() {
            self.id.as_str()
        } else {
            &self.label
        }
    }
}
