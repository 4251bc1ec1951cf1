//! Sink that logs what reaches it.

use crate::config::{ConfigField, ConfigKind, ConfigSchema, parse_config};
use crate::connector::{Connector, ConnectorType, ExecutionContext};
use crate::error::{ConfigError, ConnectorError};
use async_trait::async_trait;
use conduit_core::DataEnvelope;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Level {
    Debug,
    #[default]
    Info,
    Warn,
}

fn default_sample_size() -> usize {
    3
}

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    level: Level,
    #[serde(default = "default_sample_size")]
    sample_size: usize,
}

/// Logs the record count and a sample of records, then passes data through.
pub struct LogDestination;

#[async_trait]
impl Connector for LogDestination {
    fn id(&self) -> &str {
        "log_destination"
    }

    fn name(&self) -> &str {
        "Log"
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Sink
    }

    fn description(&self) -> &str {
        "Logs incoming records"
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new()
            .field(
                ConfigField::new("level", ConfigKind::String)
                    .title("Level")
                    .options(["debug", "info", "warn"])
                    .default_value(json!("info")),
            )
            .field(
                ConfigField::new("sample_size", ConfigKind::Number)
                    .title("Sample Size")
                    .description("Number of records to include in the log line")
                    .default_value(json!(3)),
            )
    }

    fn validate(&self, config: &JsonValue) -> Result<(), ConfigError> {
        self.config_schema().check(config)?;
        parse_config::<Config>(config).map(|_| ())
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        config: &JsonValue,
        input: DataEnvelope,
    ) -> Result<DataEnvelope, ConnectorError> {
        let config: Config = parse_config(config)?;
        let count = input.data.len();
        let sample = JsonValue::Array(
            input
                .data
                .iter()
                .take(config.sample_size)
                .cloned()
                .map(JsonValue::Object)
                .collect(),
        );

        match config.level {
            Level::Debug => {
                tracing::debug!(node_id = %ctx.node_id, records = count, %sample, "records received");
            }
            Level::Info => {
                tracing::info!(node_id = %ctx.node_id, records = count, %sample, "records received");
            }
            Level::Warn => {
                tracing::warn!(node_id = %ctx.node_id, records = count, %sample, "records received");
            }
        }

        let mut output = input;
        output.sync_count();
        output
            .metadata
            .custom
            .insert("logged".to_string(), JsonValue::from(count));
        Ok(output)
    }
}
