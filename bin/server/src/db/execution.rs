//! Database repository for execution records.
//!
//! Node results, the final result map and the execution log are stored as
//! JSONB; the run task always writes the whole record.

use chrono::{DateTime, Utc};
use conduit_core::{ExecutionId, NodeId, UserId, WorkflowId};
use conduit_workflow::{Execution, ExecutionStatus, TriggerKind};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

use super::decode_error;

/// Row type for execution queries.
#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    workflow_id: String,
    owner_id: String,
    trigger_kind: String,
    status: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    node_results: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<String>,
    failed_node: Option<String>,
    logs: serde_json::Value,
}

fn from_json<T: DeserializeOwned>(column: &str, value: serde_json::Value) -> Result<T, sqlx::Error> {
    serde_json::from_value(value).map_err(|e| decode_error(format!("invalid {column}: {e}")))
}

fn to_json<T: Serialize>(column: &str, value: &T) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(value).map_err(|e| sqlx::Error::Encode(format!("{column}: {e}").into()))
}

impl ExecutionRow {
    fn try_into_record(self) -> Result<Execution, sqlx::Error> {
        let id = ExecutionId::from_str(&self.id)
            .map_err(|e| decode_error(format!("invalid execution id '{}': {}", self.id, e)))?;
        let workflow_id = WorkflowId::from_str(&self.workflow_id).map_err(|e| {
            decode_error(format!("invalid workflow id '{}': {}", self.workflow_id, e))
        })?;
        let owner_id = UserId::from_str(&self.owner_id)
            .map_err(|e| decode_error(format!("invalid owner id '{}': {}", self.owner_id, e)))?;
        let trigger = TriggerKind::from_name(&self.trigger_kind)
            .ok_or_else(|| decode_error(format!("invalid trigger '{}'", self.trigger_kind)))?;
        let status = ExecutionStatus::from_name(&self.status)
            .ok_or_else(|| decode_error(format!("invalid status '{}'", self.status)))?;
        let failed_node = self
            .failed_node
            .map(|raw| {
                NodeId::new(raw.clone())
                    .map_err(|e| decode_error(format!("invalid node id '{raw}': {e}")))
            })
            .transpose()?;

        Ok(Execution {
            id,
            workflow_id,
            owner_id,
            trigger,
            status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            node_results: from_json("node_results", self.node_results)?,
            result: self
                .result
                .map(|value| from_json("result", value))
                .transpose()?,
            error: self.error,
            failed_node,
            logs: from_json("logs", self.logs)?,
        })
    }
}

/// Repository for execution records.
pub struct ExecutionRepository {
    pool: PgPool,
}

impl ExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, execution: &Execution) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, owner_id, trigger_kind, status, created_at, started_at,
                 completed_at, node_results, result, error, failed_node, logs)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.owner_id.to_string())
        .bind(execution.trigger.as_str())
        .bind(execution.status.as_str())
        .bind(execution.created_at)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(to_json("node_results", &execution.node_results)?)
        .bind(
            execution
                .result
                .as_ref()
                .map(|result| to_json("result", result))
                .transpose()?,
        )
        .bind(&execution.error)
        .bind(execution.failed_node.as_ref().map(NodeId::as_str))
        .bind(to_json("logs", &execution.logs)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Overwrites the mutable part of an unfinished record. Returns false if
    /// no row matched or the stored row is already terminal.
    pub async fn update(&self, execution: &Execution) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = $2, started_at = $3, completed_at = $4, node_results = $5,
                result = $6, error = $7, failed_node = $8, logs = $9
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(to_json("node_results", &execution.node_results)?)
        .bind(
            execution
                .result
                .as_ref()
                .map(|result| to_json("result", result))
                .transpose()?,
        )
        .bind(&execution.error)
        .bind(execution.failed_node.as_ref().map(NodeId::as_str))
        .bind(to_json("logs", &execution.logs)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Finds an execution, visible only to its owner.
    pub async fn find(
        &self,
        owner_id: UserId,
        id: ExecutionId,
    ) -> Result<Option<Execution>, sqlx::Error> {
        let row: Option<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, owner_id, trigger_kind, status, created_at, started_at,
                   completed_at, node_results, result, error, failed_node, logs
            FROM workflow_executions
            WHERE id = $1 AND owner_id = $2
            "#,
        )
        .bind(id.to_string())
        .bind(owner_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ExecutionRow::try_into_record).transpose()
    }

    /// Lists a workflow's executions, most recent first.
    pub async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<Execution>, sqlx::Error> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, owner_id, trigger_kind, status, created_at, started_at,
                   completed_at, node_results, result, error, failed_node, logs
            FROM workflow_executions
            WHERE workflow_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ExecutionRow::try_into_record).collect()
    }
}
