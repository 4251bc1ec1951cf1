//! Connector framework for the conduit workflow platform.
//!
//! This crate provides:
//!
//! - **Connector trait**: the capability every processing unit implements
//! - **Config schemas**: per-connector configuration descriptors with structural validation
//! - **Registry**: the lookup table populated once at startup
//! - **Builtin connectors**: trigger payload, static records, CSV in/out, transforms, logging

pub mod builtin;
pub mod config;
pub mod connector;
pub mod error;
pub mod registry;

pub use config::{ConfigField, ConfigKind, ConfigSchema, parse_config};
pub use connector::{Connector, ConnectorInfo, ConnectorType, ExecutionContext};
pub use error::{ConfigError, ConnectorError, RegistryError};
pub use registry::ConnectorRegistry;
