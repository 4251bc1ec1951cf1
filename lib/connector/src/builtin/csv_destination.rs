//! Sink that writes records to a CSV file.

use super::{default_delimiter, default_true, single_byte};
use crate::config::{ConfigField, ConfigKind, ConfigSchema, parse_config};
use crate::connector::{Connector, ConnectorType, ExecutionContext};
use crate::error::{ConfigError, ConnectorError};
use async_trait::async_trait;
use conduit_core::{DataEnvelope, DataSchema};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::path::Path;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Deserialize)]
struct Config {
    path: String,
    #[serde(default = "default_delimiter")]
    delimiter: String,
    #[serde(default)]
    append: bool,
    #[serde(default = "default_true")]
    include_header: bool,
}

impl Config {
    fn parse(config: &JsonValue) -> Result<Self, ConfigError> {
        let parsed: Self = parse_config(config)?;
        if parsed.path.trim().is_empty() {
            return Err(ConfigError::missing("path"));
        }
        single_byte("delimiter", &parsed.delimiter)?;
        Ok(parsed)
    }
}

fn cell(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn io_error(path: &str, e: &std::io::Error) -> ConnectorError {
    ConnectorError::Io {
        path: path.to_string(),
        reason: e.to_string(),
    }
}

/// Writes input records to a CSV file and passes them through unchanged.
///
/// Columns follow the input schema; when the schema is empty they are
/// inferred from the records.
pub struct CsvDestination;

#[async_trait]
impl Connector for CsvDestination {
    fn id(&self) -> &str {
        "csv_destination"
    }

    fn name(&self) -> &str {
        "CSV Destination"
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Sink
    }

    fn description(&self) -> &str {
        "Writes records to a CSV file"
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new()
            .field(
                ConfigField::new("path", ConfigKind::String)
                    .title("File Path")
                    .description("Path of the CSV file to write")
                    .required(),
            )
            .field(
                ConfigField::new("delimiter", ConfigKind::String)
                    .title("Delimiter")
                    .default_value(json!(",")),
            )
            .field(
                ConfigField::new("append", ConfigKind::Boolean)
                    .title("Append")
                    .description("Append to an existing file instead of replacing it")
                    .default_value(json!(false)),
            )
            .field(
                ConfigField::new("include_header", ConfigKind::Boolean)
                    .title("Include Header")
                    .description("Write a header row (skipped when appending to a non-empty file)")
                    .default_value(json!(true)),
            )
    }

    fn validate(&self, config: &JsonValue) -> Result<(), ConfigError> {
        self.config_schema().check(config)?;
        Config::parse(config).map(|_| ())
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        config: &JsonValue,
        input: DataEnvelope,
    ) -> Result<DataEnvelope, ConnectorError> {
        let config = Config::parse(config)?;
        ctx.check_cancelled()?;

        let columns: Vec<String> = if input.metadata.schema.is_empty() {
            DataSchema::infer_from_records(&input.data, None)
                .field_names()
                .map(str::to_string)
                .collect()
        } else {
            input.metadata.schema.field_names().map(str::to_string).collect()
        };

        let path = Path::new(&config.path);
        let existing_len = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        let write_header = config.include_header && !(config.append && existing_len > 0);

        let mut writer = csv::WriterBuilder::new()
            .delimiter(single_byte("delimiter", &config.delimiter)?)
            .from_writer(Vec::new());
        if write_header {
            writer.write_record(&columns).map_err(|e| ConnectorError::Format {
                reason: e.to_string(),
            })?;
        }
        for record in &input.data {
            let row = columns.iter().map(|c| cell(record.get(c)));
            writer.write_record(row).map_err(|e| ConnectorError::Format {
                reason: e.to_string(),
            })?;
        }
        let bytes = writer.into_inner().map_err(|e| ConnectorError::Format {
            reason: e.to_string(),
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(&config.path, &e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(config.append)
            .truncate(!config.append)
            .open(path)
            .await
            .map_err(|e| io_error(&config.path, &e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| io_error(&config.path, &e))?;
        file.flush().await.map_err(|e| io_error(&config.path, &e))?;

        tracing::info!(
            node_id = %ctx.node_id,
            path = %config.path,
            rows = input.data.len(),
            "wrote csv file"
        );

        let mut output = input;
        output.sync_count();
        output
            .metadata
            .custom
            .insert("rows_written".to_string(), JsonValue::from(output.data.len()));
        output
            .metadata
            .custom
            .insert("path".to_string(), JsonValue::String(config.path));
        Ok(output)
    }
}
