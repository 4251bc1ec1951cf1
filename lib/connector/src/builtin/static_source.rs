//! Source that emits records written into its configuration.

use crate::config::{ConfigField, ConfigKind, ConfigSchema};
use crate::connector::{Connector, ConnectorType, ExecutionContext};
use crate::error::{ConfigError, ConnectorError};
use async_trait::async_trait;
use conduit_core::{DataEnvelope, DataSchema, NodeId, Record};
use serde_json::Value as JsonValue;

/// Emits the configured `records` array.
pub struct StaticSource;

fn records(config: &JsonValue) -> Result<Vec<Record>, ConfigError> {
    let items = config
        .get("records")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| ConfigError::missing("records"))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            JsonValue::Object(map) => Ok(map.clone()),
            _ => Err(ConfigError::new(format!("records[{i}]"), "expected object")),
        })
        .collect()
}

#[async_trait]
impl Connector for StaticSource {
    fn id(&self) -> &str {
        "static_source"
    }

    fn name(&self) -> &str {
        "Static Records"
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Source
    }

    fn description(&self) -> &str {
        "Emits a fixed list of records"
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new().field(
            ConfigField::new("records", ConfigKind::Array)
                .title("Records")
                .description("Objects to emit, in order")
                .required(),
        )
    }

    fn validate(&self, config: &JsonValue) -> Result<(), ConfigError> {
        self.config_schema().check(config)?;
        records(config).map(|_| ())
    }

    async fn output_schema(
        &self,
        node_id: &NodeId,
        config: &JsonValue,
        _input: &DataSchema,
    ) -> Result<DataSchema, ConnectorError> {
        let records = records(config)?;
        Ok(DataSchema::infer_from_records(&records, Some(node_id)))
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        config: &JsonValue,
        _input: DataEnvelope,
    ) -> Result<DataEnvelope, ConnectorError> {
        let records = records(config)?;
        let schema = DataSchema::infer_from_records(&records, Some(&ctx.node_id));
        Ok(DataEnvelope::new(records, schema))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::{context, node};
    use serde_json::json;

    #[tokio::test]
    async fn emits_configured_records() {
        let config = json!({"records": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}]});
        let output = StaticSource
            .execute(&context("static"), &config, DataEnvelope::empty())
            .await
            .expect("execute");

        assert_eq!(output.len(), 2);
        assert_eq!(output.data[1].get("name"), Some(&json!("b")));
        let names: Vec<_> = output.metadata.schema.field_names().collect();
        assert_eq!(names, vec!["id", "name"]);
    }

    #[tokio::test]
    async fn output_schema_matches_execution() {
        let config = json!({"records": [{"id": 1}]});
        let schema = StaticSource
            .output_schema(&node("static"), &config, &DataSchema::empty())
            .await
            .expect("schema");
        assert_eq!(schema.fields.len(), 1);
        assert_eq!(schema.source_nodes, vec![node("static")]);
    }

    #[test]
    fn rejects_missing_or_malformed_records() {
        assert_eq!(StaticSource.validate(&json!({})).unwrap_err().field, "records");

        let err = StaticSource
            .validate(&json!({"records": [{"id": 1}, 7]}))
            .unwrap_err();
        assert_eq!(err.field, "records[1]");
    }
}
