//! Shared application state.

use crate::config::ExecutionsConfig;
use conduit_connector::ConnectorRegistry;
use conduit_workflow::{
    EngineConfig, ExecutionEngine, GraphStore, PreviewService, SchemaCache, SchemaCacheConfig,
    SchemaService, WorkflowService,
};
use std::sync::Arc;

/// Services shared by every handler.
#[derive(Clone, Debug)]
pub struct AppState {
    pub registry: Arc<ConnectorRegistry>,
    pub workflows: WorkflowService,
    pub schemas: SchemaService,
    pub previews: PreviewService,
    pub engine: ExecutionEngine,
    pub executions: ExecutionsConfig,
}

impl AppState {
    /// Wires the services around one store and one registry.
    ///
    /// The workflow and schema services share a schema cache so that saving
    /// a graph invalidates what inference cached for it.
    #[must_use]
    pub fn new(
        store: Arc<dyn GraphStore>,
        registry: Arc<ConnectorRegistry>,
        engine: EngineConfig,
        schema_cache: SchemaCacheConfig,
        executions: ExecutionsConfig,
    ) -> Self {
        let cache = Arc::new(SchemaCache::new(schema_cache));
        Self {
            workflows: WorkflowService::new(store.clone(), registry.clone(), cache.clone()),
            schemas: SchemaService::new(store.clone(), registry.clone(), cache),
            previews: PreviewService::new(store.clone(), registry.clone()),
            engine: ExecutionEngine::new(store, registry.clone(), engine),
            registry,
            executions,
        }
    }
}
