//! Source that emits the payload an execution was triggered with.

use super::attributed;
use crate::config::{ConfigField, ConfigKind, ConfigSchema, parse_config};
use crate::connector::{Connector, ConnectorType, ExecutionContext};
use crate::error::{ConfigError, ConnectorError};
use async_trait::async_trait;
use conduit_core::{DataEnvelope, DataSchema, FieldDefinition, NodeId};
use serde::Deserialize;
use serde_json::Value as JsonValue;

#[derive(Debug, Default, Deserialize)]
struct Config {
    /// Declared shape of the payload.
    #[serde(default)]
    fields: Vec<FieldDefinition>,
    /// Example payload used to describe the shape when no fields are declared.
    #[serde(default)]
    sample: Option<JsonValue>,
}

/// Emits the trigger payload as records.
///
/// The engine hands every source node the trigger payload as its input
/// envelope; this connector is the one that forwards it.
pub struct TriggerPayload;

#[async_trait]
impl Connector for TriggerPayload {
    fn id(&self) -> &str {
        "trigger_payload"
    }

    fn name(&self) -> &str {
        "Trigger Payload"
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Source
    }

    fn description(&self) -> &str {
        "Emits the manual or webhook payload that started the execution"
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new()
            .field(
                ConfigField::new("fields", ConfigKind::Array)
                    .title("Fields")
                    .description("Declared payload fields: {name, type, description, nullable}"),
            )
            .field(
                ConfigField::new("sample", ConfigKind::Object)
                    .title("Sample")
                    .description("Example payload used to describe the output shape"),
            )
    }

    fn validate(&self, config: &JsonValue) -> Result<(), ConfigError> {
        self.config_schema().check(config)?;
        let parsed: Config = parse_config(config)?;
        for (i, field) in parsed.fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                return Err(ConfigError::new(
                    format!("fields[{i}].name"),
                    "field name must not be empty",
                ));
            }
        }
        Ok(())
    }

    async fn output_schema(
        &self,
        node_id: &NodeId,
        config: &JsonValue,
        _input: &DataSchema,
    ) -> Result<DataSchema, ConnectorError> {
        let parsed: Config = parse_config(config)?;
        if !parsed.fields.is_empty() {
            return Ok(attributed(parsed.fields, node_id));
        }
        let Some(sample) = parsed.sample else {
            return Ok(DataSchema::from_fields(Vec::new(), Some(node_id.clone())));
        };
        let records = DataEnvelope::records_from_payload(&sample);
        Ok(DataSchema::infer_from_records(&records, Some(node_id)))
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        config: &JsonValue,
        input: DataEnvelope,
    ) -> Result<DataEnvelope, ConnectorError> {
        let parsed: Config = parse_config(config)?;
        let schema = if parsed.fields.is_empty() {
            DataSchema::infer_from_records(&input.data, Some(&ctx.node_id))
        } else {
            attributed(parsed.fields, &ctx.node_id)
        };
        Ok(DataEnvelope::new(input.data, schema))
    }
}
