//! PostgreSQL persistence for the conduit server.
//!
//! Repositories own the SQL for one table family each; [`PgGraphStore`]
//! composes them behind the [`GraphStore`] seam the engine depends on.

pub mod execution;
pub mod workflow;

pub use execution::ExecutionRepository;
pub use workflow::{GraphRepository, WorkflowRepository};

use async_trait::async_trait;
use conduit_core::{ExecutionId, UserId, WorkflowId};
use conduit_workflow::{Execution, GraphDefinition, GraphStore, StoreError, Workflow};
use rootcause::Report;
use sqlx::PgPool;

/// Builds the error for a stored value that no longer parses.
pub(crate) fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message,
    )))
}

fn store_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Decode(source) => StoreError::Decode {
            details: source.to_string(),
        },
        other => StoreError::Database {
            details: other.to_string(),
        },
    }
}

/// A [`GraphStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgGraphStore {
    pool: PgPool,
}

impl PgGraphStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn workflows(&self) -> WorkflowRepository {
        WorkflowRepository::new(self.pool.clone())
    }

    fn graphs(&self) -> GraphRepository {
        GraphRepository::new(self.pool.clone())
    }

    fn executions(&self) -> ExecutionRepository {
        ExecutionRepository::new(self.pool.clone())
    }
}

#[async_trait]
impl GraphStore for PgGraphStore {
    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), Report<StoreError>> {
        Ok(self.workflows().create(workflow).await.map_err(store_error)?)
    }

    async fn get_workflow(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
    ) -> Result<Option<Workflow>, Report<StoreError>> {
        Ok(self
            .workflows()
            .find(owner_id, workflow_id)
            .await
            .map_err(store_error)?)
    }

    async fn list_workflows(&self, owner_id: UserId) -> Result<Vec<Workflow>, Report<StoreError>> {
        Ok(self.workflows().list(owner_id).await.map_err(store_error)?)
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<(), Report<StoreError>> {
        let updated = self.workflows().update(workflow).await.map_err(store_error)?;
        if !updated {
            return Err(StoreError::Missing {
                entity: "workflow",
                id: workflow.id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn delete_workflow(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
    ) -> Result<bool, Report<StoreError>> {
        Ok(self
            .workflows()
            .delete(owner_id, workflow_id)
            .await
            .map_err(store_error)?)
    }

    async fn load_graph(&self, workflow_id: WorkflowId) -> Result<GraphDefinition, Report<StoreError>> {
        Ok(self.graphs().load(workflow_id).await.map_err(store_error)?)
    }

    async fn replace_graph(
        &self,
        workflow_id: WorkflowId,
        graph: &GraphDefinition,
    ) -> Result<(), Report<StoreError>> {
        let replaced = self
            .graphs()
            .replace(workflow_id, graph)
            .await
            .map_err(store_error)?;
        if !replaced {
            return Err(StoreError::Missing {
                entity: "workflow",
                id: workflow_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn create_execution(&self, execution: &Execution) -> Result<(), Report<StoreError>> {
        Ok(self
            .executions()
            .create(execution)
            .await
            .map_err(store_error)?)
    }

    async fn update_execution(&self, execution: &Execution) -> Result<bool, Report<StoreError>> {
        Ok(self
            .executions()
            .update(execution)
            .await
            .map_err(store_error)?)
    }

    async fn get_execution(
        &self,
        owner_id: UserId,
        execution_id: ExecutionId,
    ) -> Result<Option<Execution>, Report<StoreError>> {
        Ok(self
            .executions()
            .find(owner_id, execution_id)
            .await
            .map_err(store_error)?)
    }

    async fn list_executions(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<Execution>, Report<StoreError>> {
        Ok(self
            .executions()
            .list_for_workflow(workflow_id, limit)
            .await
            .map_err(store_error)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_failures_keep_their_category() {
        let err = store_error(decode_error("invalid workflow id 'x'".to_string()));
        assert!(matches!(err, StoreError::Decode { ref details } if details.contains("'x'")));

        let err = store_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Database { .. }));
    }
}
