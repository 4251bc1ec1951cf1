//! Workflow definition types.
//!
//! A workflow is an owner-scoped container with:
//! - Metadata (name, description, active flag, timestamps)
//! - A graph of nodes and connections, stored separately and replaced as a whole

use crate::edge::Connection;
use crate::node::Node;
use chrono::{DateTime, Utc};
use conduit_core::{NodeId, UserId, WorkflowId};
use serde::{Deserialize, Serialize};

/// An owner-scoped workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier.
    pub id: WorkflowId,
    /// The user who owns the workflow.
    pub owner_id: UserId,
    /// Human-readable name.
    pub name: String,
    /// What the workflow does.
    #[serde(default)]
    pub description: String,
    /// Inactive workflows are never executed.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Creates an active workflow with no description.
    #[must_use]
    pub fn new(owner_id: UserId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            owner_id,
            name: name.into(),
            description: String::new(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Bumps `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A workflow's nodes and connections as submitted by an editor.
///
/// Nothing here is guaranteed to be valid: IDs may repeat and connections
/// may dangle. See [`crate::validator::GraphValidator`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl GraphDefinition {
    /// Creates a graph from nodes and connections.
    #[must_use]
    pub fn new(nodes: Vec<Node>, connections: Vec<Connection>) -> Self {
        Self { nodes, connections }
    }

    /// Returns the first node with the given ID.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == node_id)
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
