//! Database repositories for workflows and their graphs.

use chrono::{DateTime, Utc};
use conduit_connector::ConnectorType;
use conduit_core::{ConnectionId, NodeId, UserId, WorkflowId};
use conduit_workflow::{Connection, GraphDefinition, Node, Workflow};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

use super::decode_error;

/// Row type for workflow queries.
#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    owner_id: String,
    name: String,
    description: String,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    fn try_into_record(self) -> Result<Workflow, sqlx::Error> {
        let id = WorkflowId::from_str(&self.id)
            .map_err(|e| decode_error(format!("invalid workflow id '{}': {}", self.id, e)))?;
        let owner_id = UserId::from_str(&self.owner_id)
            .map_err(|e| decode_error(format!("invalid owner id '{}': {}", self.owner_id, e)))?;

        Ok(Workflow {
            id,
            owner_id,
            name: self.name,
            description: self.description,
            active: self.active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Repository for workflow metadata.
pub struct WorkflowRepository {
    pool: PgPool,
}

impl WorkflowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, workflow: &Workflow) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, owner_id, name, description, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.owner_id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.active)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Finds a workflow by ID, visible only to its owner.
    pub async fn find(
        &self,
        owner_id: UserId,
        id: WorkflowId,
    ) -> Result<Option<Workflow>, sqlx::Error> {
        let row: Option<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, name, description, active, created_at, updated_at
            FROM workflows
            WHERE id = $1 AND owner_id = $2
            "#,
        )
        .bind(id.to_string())
        .bind(owner_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowRow::try_into_record).transpose()
    }

    /// Lists an owner's workflows, newest first.
    pub async fn list(&self, owner_id: UserId) -> Result<Vec<Workflow>, sqlx::Error> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, name, description, active, created_at, updated_at
            FROM workflows
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(owner_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WorkflowRow::try_into_record).collect()
    }

    /// Overwrites metadata. Returns false if no row matched.
    pub async fn update(&self, workflow: &Workflow) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET name = $2, description = $3, active = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.active)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes a workflow; nodes, connections and executions cascade.
    pub async fn delete(&self, owner_id: UserId, id: WorkflowId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM workflows
            WHERE id = $1 AND owner_id = $2
            "#,
        )
        .bind(id.to_string())
        .bind(owner_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Row type for node queries.
#[derive(FromRow)]
struct NodeRow {
    node_id: String,
    connector_id: String,
    role: String,
    label: String,
    config: serde_json::Value,
}

impl NodeRow {
    fn try_into_node(self) -> Result<Node, sqlx::Error> {
        let id = NodeId::new(self.node_id.clone())
            .map_err(|e| decode_error(format!("invalid node id '{}': {}", self.node_id, e)))?;
        let role = ConnectorType::from_name(&self.role)
            .ok_or_else(|| decode_error(format!("invalid node role '{}'", self.role)))?;

        Ok(Node {
            id,
            connector_id: self.connector_id,
            role,
            label: self.label,
            config: self.config,
        })
    }
}

/// Row type for connection queries.
#[derive(FromRow)]
struct ConnectionRow {
    id: String,
    source_id: String,
    target_id: String,
}

impl ConnectionRow {
    fn try_into_connection(self) -> Result<Connection, sqlx::Error> {
        let id = ConnectionId::from_str(&self.id)
            .map_err(|e| decode_error(format!("invalid connection id '{}': {}", self.id, e)))?;
        let source_id = NodeId::new(self.source_id.clone())
            .map_err(|e| decode_error(format!("invalid node id '{}': {}", self.source_id, e)))?;
        let target_id = NodeId::new(self.target_id.clone())
            .map_err(|e| decode_error(format!("invalid node id '{}': {}", self.target_id, e)))?;

        Ok(Connection {
            id,
            source_id,
            target_id,
        })
    }
}

/// Repository for workflow graphs.
///
/// Nodes and connections are stored in submission order, including
/// duplicates, so an invalid graph reads back exactly as it was saved.
pub struct GraphRepository {
    pool: PgPool,
}

impl GraphRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn load(&self, workflow_id: WorkflowId) -> Result<GraphDefinition, sqlx::Error> {
        let nodes: Vec<NodeRow> = sqlx::query_as(
            r#"
            SELECT node_id, connector_id, role, label, config
            FROM workflow_nodes
            WHERE workflow_id = $1
            ORDER BY position
            "#,
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let connections: Vec<ConnectionRow> = sqlx::query_as(
            r#"
            SELECT id, source_id, target_id
            FROM workflow_connections
            WHERE workflow_id = $1
            ORDER BY position
            "#,
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(GraphDefinition {
            nodes: nodes
                .into_iter()
                .map(NodeRow::try_into_node)
                .collect::<Result<_, _>>()?,
            connections: connections
                .into_iter()
                .map(ConnectionRow::try_into_connection)
                .collect::<Result<_, _>>()?,
        })
    }

    /// Replaces the whole graph in one transaction. Returns false if the
    /// workflow does not exist.
    pub async fn replace(
        &self,
        workflow_id: WorkflowId,
        graph: &GraphDefinition,
    ) -> Result<bool, sqlx::Error> {
        let id = workflow_id.to_string();
        let mut tx = self.pool.begin().await?;

        let exists: Option<(String,)> =
            sqlx::query_as("SELECT id FROM workflows WHERE id = $1 FOR UPDATE")
                .bind(&id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Ok(false);
        }

        sqlx::query("DELETE FROM workflow_connections WHERE workflow_id = $1")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM workflow_nodes WHERE workflow_id = $1")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        for (position, node) in (0i32..).zip(&graph.nodes) {
            sqlx::query(
                r#"
                INSERT INTO workflow_nodes
                    (workflow_id, position, node_id, connector_id, role, label, config)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&id)
            .bind(position)
            .bind(node.id.as_str())
            .bind(&node.connector_id)
            .bind(node.role.as_str())
            .bind(&node.label)
            .bind(&node.config)
            .execute(&mut *tx)
            .await?;
        }

        for (position, connection) in (0i32..).zip(&graph.connections) {
            sqlx::query(
                r#"
                INSERT INTO workflow_connections
                    (workflow_id, position, id, source_id, target_id)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&id)
            .bind(position)
            .bind(connection.id.to_string())
            .bind(connection.source_id.as_str())
            .bind(connection.target_id.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}
