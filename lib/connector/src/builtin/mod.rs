//! Builtin connectors.
//!
//! | id | type |
//! |---|---|
//! | `trigger_payload` | source |
//! | `static_source` | source |
//! | `csv_source` | source |
//! | `transform_processor` | transform |
//! | `csv_destination` | sink |
//! | `log_destination` | sink |

mod csv_destination;
mod csv_source;
mod log_destination;
mod static_source;
mod transform;
mod trigger_payload;

pub use csv_destination::CsvDestination;
pub use csv_source::CsvSource;
pub use log_destination::LogDestination;
pub use static_source::StaticSource;
pub use transform::{TransformProcessor, Transformation};
pub use trigger_payload::TriggerPayload;

use crate::connector::Connector;
use crate::error::ConfigError;
use conduit_core::{DataSchema, FieldDefinition, NodeId};
use std::sync::Arc;

/// Returns one instance of every builtin connector.
#[must_use]
pub fn all() -> Vec<Arc<dyn Connector>> {
    vec![
        Arc::new(TriggerPayload),
        Arc::new(StaticSource),
        Arc::new(CsvSource),
        Arc::new(TransformProcessor),
        Arc::new(CsvDestination),
        Arc::new(LogDestination),
    ]
}

/// Converts a one-character string option into the byte the csv crate expects.
fn single_byte(field: &str, value: &str) -> Result<u8, ConfigError> {
    match value.as_bytes() {
        [b] if b.is_ascii() => Ok(*b),
        _ => Err(ConfigError::new(field, "must be a single ASCII character")),
    }
}

/// Builds a schema attributed to `node_id`, filling in missing field origins.
fn attributed(fields: Vec<FieldDefinition>, node_id: &NodeId) -> DataSchema {
    let fields = fields
        .into_iter()
        .map(|mut field| {
            if field.source_node.is_none() {
                field.source_node = Some(node_id.clone());
            }
            field
        })
        .collect();
    DataSchema::from_fields(fields, Some(node_id.clone()))
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_true() -> bool {
    true
}
