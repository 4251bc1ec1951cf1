//! Connections between nodes.
//!
//! Connections refer to nodes by ID only, so a graph can be stored and
//! validated even when an endpoint is missing.

use conduit_core::{ConnectionId, NodeId};
use serde::{Deserialize, Serialize};

/// A directed edge from one node's output to another node's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Server-assigned when the editor omits it.
    #[serde(default = "ConnectionId::new")]
    pub id: ConnectionId,
    /// The upstream node.
    pub source_id: NodeId,
    /// The downstream node.
    pub target_id: NodeId,
}

impl Connection {
    /// Creates a connection with a fresh ID.
    #[must_use]
    pub fn new(source_id: NodeId, target_id: NodeId) -> Self {
        Self {
            id: ConnectionId::new(),
            source_id,
            target_id,
        }
    }

    /// Returns true if both ends are the same node.
    #[must_use]
    pub fn is_self_loop(&self) -> bool {
        self.source_id == self.target_id
    }
}
