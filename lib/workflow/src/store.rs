//! Persistence seam for workflows, graphs and executions.
//!
//! Every read that takes an owner is scoped by it: a record owned by someone
//! else is indistinguishable from a missing one.

use crate::definition::{GraphDefinition, Workflow};
use crate::error::StoreError;
use crate::execution::Execution;
use async_trait::async_trait;
use conduit_core::{ExecutionId, UserId, WorkflowId};
use rootcause::Report;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Storage for workflows and everything hanging off them.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), Report<StoreError>>;

    async fn get_workflow(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
    ) -> Result<Option<Workflow>, Report<StoreError>>;

    /// Lists an owner's workflows, most recently created first.
    async fn list_workflows(&self, owner_id: UserId) -> Result<Vec<Workflow>, Report<StoreError>>;

    /// Overwrites workflow metadata.
    async fn update_workflow(&self, workflow: &Workflow) -> Result<(), Report<StoreError>>;

    /// Deletes a workflow with its graph and executions. Returns false if
    /// nothing matched.
    async fn delete_workflow(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
    ) -> Result<bool, Report<StoreError>>;

    /// Loads the stored graph; a workflow without one has an empty graph.
    async fn load_graph(&self, workflow_id: WorkflowId) -> Result<GraphDefinition, Report<StoreError>>;

    /// Replaces the whole graph of a workflow.
    async fn replace_graph(
        &self,
        workflow_id: WorkflowId,
        graph: &GraphDefinition,
    ) -> Result<(), Report<StoreError>>;

    async fn create_execution(&self, execution: &Execution) -> Result<(), Report<StoreError>>;

    /// Overwrites an execution record that has not finished yet.
    ///
    /// Returns false, leaving the stored record untouched, if no record with
    /// this ID exists or the stored one is already terminal.
    async fn update_execution(&self, execution: &Execution) -> Result<bool, Report<StoreError>>;

    async fn get_execution(
        &self,
        owner_id: UserId,
        execution_id: ExecutionId,
    ) -> Result<Option<Execution>, Report<StoreError>>;

    /// Lists a workflow's executions, most recent first.
    async fn list_executions(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<Execution>, Report<StoreError>>;
}

#[derive(Debug, Default)]
struct Tables {
    workflows: HashMap<WorkflowId, (u64, Workflow)>,
    graphs: HashMap<WorkflowId, GraphDefinition>,
    executions: HashMap<ExecutionId, (u64, Execution)>,
    sequence: u64,
}

impl Tables {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

/// A [`GraphStore`] kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    tables: RwLock<Tables>,
}

impl InMemoryGraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), Report<StoreError>> {
        let mut tables = self.tables.write().await;
        let sequence = tables.next_sequence();
        tables.workflows.insert(workflow.id, (sequence, workflow.clone()));
        Ok(())
    }

    async fn get_workflow(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
    ) -> Result<Option<Workflow>, Report<StoreError>> {
        let tables = self.tables.read().await;
        Ok(tables
            .workflows
            .get(&workflow_id)
            .map(|(_, workflow)| workflow)
            .filter(|workflow| workflow.owner_id == owner_id)
            .cloned())
    }

    async fn list_workflows(&self, owner_id: UserId) -> Result<Vec<Workflow>, Report<StoreError>> {
        let tables = self.tables.read().await;
        let mut owned: Vec<&(u64, Workflow)> = tables
            .workflows
            .values()
            .filter(|(_, workflow)| workflow.owner_id == owner_id)
            .collect();
        owned.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(owned.into_iter().map(|(_, workflow)| workflow.clone()).collect())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<(), Report<StoreError>> {
        let mut tables = self.tables.write().await;
        match tables.workflows.get_mut(&workflow.id) {
            Some((_, stored)) => {
                *stored = workflow.clone();
                Ok(())
            }
            None => Err(StoreError::Missing {
                entity: "workflow",
                id: workflow.id.to_string(),
            }
            .into()),
        }
    }

    async fn delete_workflow(
        &self,
        owner_id: UserId,
        workflow_id: WorkflowId,
    ) -> Result<bool, Report<StoreError>> {
        let mut tables = self.tables.write().await;
        let owned = tables
            .workflows
            .get(&workflow_id)
            .is_some_and(|(_, workflow)| workflow.owner_id == owner_id);
        if !owned {
            return Ok(false);
        }
        tables.workflows.remove(&workflow_id);
        tables.graphs.remove(&workflow_id);
        tables
            .executions
            .retain(|_, (_, execution)| execution.workflow_id != workflow_id);
        Ok(true)
    }

    async fn load_graph(&self, workflow_id: WorkflowId) -> Result<GraphDefinition, Report<StoreError>> {
        let tables = self.tables.read().await;
        Ok(tables.graphs.get(&workflow_id).cloned().unwrap_or_default())
    }

    async fn replace_graph(
        &self,
        workflow_id: WorkflowId,
        graph: &GraphDefinition,
    ) -> Result<(), Report<StoreError>> {
        let mut tables = self.tables.write().await;
        if !tables.workflows.contains_key(&workflow_id) {
            return Err(StoreError::Missing {
                entity: "workflow",
                id: workflow_id.to_string(),
            }
            .into());
        }
        tables.graphs.insert(workflow_id, graph.clone());
        Ok(())
    }

    async fn create_execution(&self, execution: &Execution) -> Result<(), Report<StoreError>> {
        let mut tables = self.tables.write().await;
        let sequence = tables.next_sequence();
        tables
            .executions
            .insert(execution.id, (sequence, execution.clone()));
        Ok(())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<bool, Report<StoreError>> {
        let mut tables = self.tables.write().await;
        match tables.executions.get_mut(&execution.id) {
            Some((_, stored)) if !stored.status.is_terminal() => {
                *stored = execution.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_execution(
        &self,
        owner_id: UserId,
        execution_id: ExecutionId,
    ) -> Result<Option<Execution>, Report<StoreError>> {
        let tables = self.tables.read().await;
        Ok(tables
            .executions
            .get(&execution_id)
            .map(|(_, execution)| execution)
            .filter(|execution| execution.owner_id == owner_id)
            .cloned())
    }

    async fn list_executions(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<Execution>, Report<StoreError>> {
        let tables = self.tables.read().await;
        let mut runs: Vec<&(u64, Execution)> = tables
            .executions
            .values()
            .filter(|(_, execution)| execution.workflow_id == workflow_id)
            .collect();
        runs.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(runs
            .into_iter()
            .take(limit)
            .map(|(_, execution)| execution.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStatus;
    use crate::node::{Node, NodeRole};
    use crate::trigger::TriggerKind;
    use conduit_core::NodeId;

    #[tokio::test]
    async fn workflows_are_owner_scoped() {
        let store = InMemoryGraphStore::new();
        let owner = UserId::new();
        let stranger = UserId::new();
        let workflow = Workflow::new(owner, "Sync");
        store.create_workflow(&workflow).await.unwrap();

        assert!(store.get_workflow(owner, workflow.id).await.unwrap().is_some());
        assert!(store.get_workflow(stranger, workflow.id).await.unwrap().is_none());
        assert!(store.list_workflows(stranger).await.unwrap().is_empty());
        assert!(!store.delete_workflow(stranger, workflow.id).await.unwrap());
    }

    #[tokio::test]
    async fn list_workflows_newest_first() {
        let store = InMemoryGraphStore::new();
        let owner = UserId::new();
        let first = Workflow::new(owner, "first");
        let second = Workflow::new(owner, "second");
        store.create_workflow(&first).await.unwrap();
        store.create_workflow(&second).await.unwrap();

        let names: Vec<_> = store
            .list_workflows(owner)
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn delete_cascades() {
        let store = InMemoryGraphStore::new();
        let owner = UserId::new();
        let workflow = Workflow::new(owner, "Sync");
        store.create_workflow(&workflow).await.unwrap();

        let graph = GraphDefinition::new(
            vec![Node::new(NodeId::new("a").unwrap(), "static_source", NodeRole::Source)],
            vec![],
        );
        store.replace_graph(workflow.id, &graph).await.unwrap();
        let execution = Execution::new(workflow.id, owner, TriggerKind::Manual);
        store.create_execution(&execution).await.unwrap();

        assert!(store.delete_workflow(owner, workflow.id).await.unwrap());
        assert!(store.load_graph(workflow.id).await.unwrap().is_empty());
        assert!(store.get_execution(owner, execution.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn executions_listed_most_recent_first_with_limit() {
        let store = InMemoryGraphStore::new();
        let owner = UserId::new();
        let workflow = Workflow::new(owner, "Sync");
        store.create_workflow(&workflow).await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..3 {
            let execution = Execution::new(workflow.id, owner, TriggerKind::Manual);
            store.create_execution(&execution).await.unwrap();
            ids.push(execution.id);
        }

        let listed: Vec<_> = store
            .list_executions(workflow.id, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(listed, vec![ids[2], ids[1]]);
    }

    #[tokio::test]
    async fn updating_missing_records_fails() {
        let store = InMemoryGraphStore::new();
        let execution = Execution::new(WorkflowId::new(), UserId::new(), TriggerKind::Manual);
        assert!(!store.update_execution(&execution).await.unwrap());

        let err = store
            .replace_graph(WorkflowId::new(), &GraphDefinition::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("workflow not found"));
    }

    #[tokio::test]
    async fn finished_executions_are_not_overwritten() {
        let store = InMemoryGraphStore::new();
        let owner = UserId::new();
        let mut execution = Execution::new(WorkflowId::new(), owner, TriggerKind::Manual);
        store.create_execution(&execution).await.unwrap();

        execution.start().unwrap();
        assert!(store.update_execution(&execution).await.unwrap());
        execution.succeed(Default::default()).unwrap();
        assert!(store.update_execution(&execution).await.unwrap());

        let mut stale = execution.clone();
        stale.status = ExecutionStatus::Running;
        stale.fail("execution cancelled", None).unwrap();
        assert!(!store.update_execution(&stale).await.unwrap());

        let stored = store.get_execution(owner, execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Success);
        assert!(stored.error.is_none());
    }
}
