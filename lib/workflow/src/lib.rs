//! Workflow engine for the conduit platform.
//!
//! This crate provides everything between a stored graph and a finished run:
//!
//! - **Graph Model**: nodes bound to connectors, connections between them, petgraph-backed ordering
//! - **Validation**: structural and configuration checks producing a `ValidationResult`
//! - **Schema Inference**: output and input schemas with conflict-aware merging and a shared cache
//! - **Previews**: sample records for one node, run without creating an execution
//! - **Execution**: a detached, cancellable engine with per-node results
//! - **Triggers**: manual and webhook requests reduced to one `ExecutionRequest`
//! - **Storage**: the `GraphStore` seam and an in-memory implementation

pub mod definition;
pub mod edge;
pub mod engine;
pub mod error;
pub mod execution;
pub mod graph;
pub mod inference;
pub mod merge;
pub mod node;
pub mod preview;
pub mod remaining_work;
pub mod schema_cache;
pub mod service;
pub mod store;
pub mod trigger;
pub mod validator;

pub use definition::{GraphDefinition, Workflow};
pub use edge::Connection;
pub use engine::{EngineConfig, ExecutionEngine, FailurePolicy, MAX_LIST_LIMIT};
pub use error::{EngineError, ExecutionError, GraphError, InferenceError, StoreError, WorkflowError};
pub use execution::{Execution, ExecutionLogEntry, ExecutionStatus, LogLevel, NodeResult, NodeRunStatus};
pub use graph::WorkflowGraph;
pub use inference::{NodeSchemaReport, SchemaService, SchemaValidation};
pub use merge::{UpstreamEnvelope, UpstreamSchema, merge_envelopes, merge_schemas};
pub use node::{Node, NodeRole};
pub use preview::{DEFAULT_SAMPLE_LIMIT, MAX_SAMPLE_LIMIT, PreviewService, sample_limit};
pub use remaining_work::RemainingWorkGraph;
pub use schema_cache::{CacheStats, SchemaCache, SchemaCacheConfig};
pub use service::{WorkflowService, WorkflowUpdate};
pub use store::{GraphStore, InMemoryGraphStore};
pub use trigger::{ExecutionRequest, TriggerKind};
pub use validator::{GraphValidator, IssueCode, ValidationIssue, ValidationResult};
