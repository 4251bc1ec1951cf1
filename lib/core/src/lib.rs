//! Core domain types and utilities for the conduit workflow platform.
//!
//! This crate provides the foundational types shared by every other crate:
//!
//! - **IDs**: strongly-typed identifiers for workflows, executions, nodes, and owners
//! - **Schemas**: field definitions, data schemas, and the record envelope passed between nodes
//! - **Errors**: the rootcause-based `Result` alias

pub mod error;
pub mod id;
pub mod schema;

pub use error::Result;
pub use id::{ConnectionId, ExecutionId, NodeId, ParseIdError, UserId, WorkflowId};
pub use schema::{DataEnvelope, DataSchema, EnvelopeMetadata, FieldDefinition, FieldType, Record};
