//! Owner-scoped workflow management.
//!
//! Graph saves are persisted whether or not the graph validates, so an
//! editor never loses work; only execution refuses an invalid graph.

use crate::definition::{GraphDefinition, Workflow};
use crate::error::WorkflowError;
use crate::schema_cache::SchemaCache;
use crate::store::GraphStore;
use crate::validator::{GraphValidator, ValidationResult};
use conduit_connector::ConnectorRegistry;
use conduit_core::{UserId, WorkflowId};
use rootcause::Report;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

/// Partial update of workflow metadata; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WorkflowUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

fn store_error(e: impl std::fmt::Display) -> WorkflowError {
    WorkflowError::Store {
        details: e.to_string(),
    }
}

fn checked_name(name: &str) -> Result<String, WorkflowError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(WorkflowError::InvalidName);
    }
    Ok(name.to_string())
}

/// Creates, edits and deletes workflows and their graphs.
#[derive(Clone)]
pub struct WorkflowService {
    store: Arc<dyn GraphStore>,
    validator: GraphValidator,
    cache: Arc<SchemaCache>,
}

impl std::fmt::Debug for WorkflowService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowService")
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

impl WorkflowService {
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>, registry: Arc<ConnectorRegistry>, cache: Arc<SchemaCache>) -> Self {
        Self {
            store,
            validator: GraphValidator::new(registry),
            cache,
        }
    }

    /// Creates an active workflow with an empty graph.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` for a blank name.
    #[instrument(skip(self, description), fields(owner_id = %owner_id))]
    pub async fn create_workflow(
        &self,
        owner_id: UserId,
        name: &str,
        description: Option<String>,
    ) -> Result<Workflow, Report<WorkflowError>> {
        let name = checked_name(name)?;
        let workflow = Workflow::new(owner_id, name).with_description(description.unwrap_or_default());
        self.store
            .create_workflow(&workflow)
            .await
            .map_err(store_error)?;
        tracing::info!(workflow_id = %workflow.id, "Created workflow");
        Ok(workflow)
    }

    /// # Errors
    ///
    /// Returns `NotFound` if the workflow does not exist for this owner.
    pub async fn get_workflow(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
    ) -> Result<Workflow, Report<WorkflowError>> {
        Ok(self
            .store
            .get_workflow(owner_id, workflow_id)
            .await
            .map_err(store_error)?
            .ok_or(WorkflowError::NotFound { workflow_id })?)
    }

    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_workflows(&self, owner_id: UserId) -> Result<Vec<Workflow>, Report<WorkflowError>> {
        Ok(self
            .store
            .list_workflows(owner_id)
            .await
            .map_err(store_error)?)
    }

    /// Applies a partial metadata update.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown workflows and `InvalidName` for a blank name.
    #[instrument(skip(self, update), fields(workflow_id = %workflow_id))]
    pub async fn update_workflow(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
        update: WorkflowUpdate,
    ) -> Result<Workflow, Report<WorkflowError>> {
        let mut workflow = self.get_workflow(owner_id, workflow_id).await?;
        if let Some(name) = update.name.as_deref() {
            workflow.name = checked_name(name)?;
        }
        if let Some(description) = update.description {
            workflow.description = description;
        }
        if let Some(active) = update.active {
            workflow.active = active;
        }
        workflow.touch();
        self.store
            .update_workflow(&workflow)
            .await
            .map_err(store_error)?;
        Ok(workflow)
    }

    /// Switches a workflow on or off.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the workflow does not exist for this owner.
    pub async fn set_active(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
        active: bool,
    ) -> Result<Workflow, Report<WorkflowError>> {
        self.update_workflow(
            owner_id,
            workflow_id,
            WorkflowUpdate {
                active: Some(active),
                ..WorkflowUpdate::default()
            },
        )
        .await
    }

    /// Deletes a workflow with its graph and executions.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the workflow does not exist for this owner.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn delete_workflow(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
    ) -> Result<(), Report<WorkflowError>> {
        let deleted = self
            .store
            .delete_workflow(owner_id, workflow_id)
            .await
            .map_err(store_error)?;
        if !deleted {
            return Err(WorkflowError::NotFound { workflow_id }.into());
        }
        self.cache.invalidate_workflow(workflow_id);
        tracing::info!("Deleted workflow");
        Ok(())
    }

    /// Returns the stored graph.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the workflow does not exist for this owner.
    pub async fn get_graph(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
    ) -> Result<GraphDefinition, Report<WorkflowError>> {
        self.get_workflow(owner_id, workflow_id).await?;
        Ok(self
            .store
            .load_graph(workflow_id)
            .await
            .map_err(store_error)?)
    }

    /// Validates and stores a graph, returning the validation result.
    ///
    /// The graph is stored even when it is invalid.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the workflow does not exist for this owner, or
    /// an error if the store fails.
    #[instrument(skip(self, graph), fields(workflow_id = %workflow_id, nodes = graph.nodes.len()))]
    pub async fn save_graph(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
        graph: &GraphDefinition,
    ) -> Result<ValidationResult, Report<WorkflowError>> {
        let mut workflow = self.get_workflow(owner_id, workflow_id).await?;
        let result = self.validator.validate(graph);

        self.store
            .replace_graph(workflow_id, graph)
            .await
            .map_err(store_error)?;
        self.cache.invalidate_workflow(workflow_id);

        workflow.touch();
        self.store
            .update_workflow(&workflow)
            .await
            .map_err(store_error)?;

        if result.valid {
            tracing::info!(warnings = result.warnings.len(), "Saved workflow graph");
        } else {
            tracing::info!(errors = result.errors.len(), "Saved invalid workflow graph");
        }
        Ok(result)
    }

    /// Validates a graph without storing anything.
    ///
    /// With no graph given, the stored graph is validated.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the workflow does not exist for this owner.
    pub async fn validate_graph(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
        graph: Option<&GraphDefinition>,
    ) -> Result<ValidationResult, Report<WorkflowError>> {
        match graph {
            Some(graph) => {
                self.get_workflow(owner_id, workflow_id).await?;
                Ok(self.validator.validate(graph))
            }
            None => {
                let stored = self.get_graph(owner_id, workflow_id).await?;
                Ok(self.validator.validate(&stored))
            }
        }
    }
}
