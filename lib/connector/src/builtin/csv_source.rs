//! Source that reads records from a CSV file.

use super::{attributed, default_delimiter, default_true, single_byte};
use crate::config::{ConfigField, ConfigKind, ConfigSchema, parse_config};
use crate::connector::{Connector, ConnectorType, ExecutionContext};
use crate::error::{ConfigError, ConnectorError};
use async_trait::async_trait;
use conduit_core::{DataEnvelope, DataSchema, FieldDefinition, FieldType, NodeId, Record};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

#[derive(Debug, Deserialize)]
struct Config {
    path: String,
    #[serde(default = "default_delimiter")]
    delimiter: String,
    #[serde(default = "default_true")]
    has_header: bool,
    #[serde(default)]
    comment: Option<String>,
}

impl Config {
    fn parse(config: &JsonValue) -> Result<Self, ConfigError> {
        let parsed: Self = parse_config(config)?;
        if parsed.path.trim().is_empty() {
            return Err(ConfigError::missing("path"));
        }
        single_byte("delimiter", &parsed.delimiter)?;
        if let Some(comment) = parsed.comment.as_deref().filter(|c| !c.is_empty()) {
            single_byte("comment", comment)?;
        }
        Ok(parsed)
    }

    fn reader<'a>(&self, bytes: &'a [u8]) -> Result<csv::Reader<&'a [u8]>, ConfigError> {
        let comment = match self.comment.as_deref().filter(|c| !c.is_empty()) {
            Some(c) => Some(single_byte("comment", c)?),
            None => None,
        };
        Ok(csv::ReaderBuilder::new()
            .delimiter(single_byte("delimiter", &self.delimiter)?)
            .has_headers(false)
            .flexible(true)
            .comment(comment)
            .from_reader(bytes))
    }
}

/// Parsed file contents: column names and rows.
struct Table {
    columns: Vec<String>,
    rows: Vec<csv::StringRecord>,
}

async fn read_table(config: &Config) -> Result<Table, ConnectorError> {
    let bytes = tokio::fs::read(&config.path)
        .await
        .map_err(|e| ConnectorError::Io {
            path: config.path.clone(),
            reason: e.to_string(),
        })?;

    let mut reader = config.reader(&bytes)?;
    let mut rows = Vec::new();
    for row in reader.records() {
        rows.push(row.map_err(|e| ConnectorError::Format {
            reason: e.to_string(),
        })?);
    }

    let columns = if config.has_header && !rows.is_empty() {
        let header = rows.remove(0);
        header.iter().map(|h| h.trim().to_string()).collect()
    } else {
        let width = rows.iter().map(csv::StringRecord::len).max().unwrap_or(0);
        (1..=width).map(|i| format!("column_{i}")).collect()
    };

    Ok(Table { columns, rows })
}

fn schema_for(columns: &[String], node_id: &NodeId) -> DataSchema {
    let fields = columns
        .iter()
        .map(|name| FieldDefinition::new(name.clone(), FieldType::String))
        .collect();
    attributed(fields, node_id)
}

/// Reads a CSV file into string-valued records.
///
/// Rows shorter than the header get empty strings for the missing columns;
/// extra trailing cells are dropped.
pub struct CsvSource;

#[async_trait]
impl Connector for CsvSource {
    fn id(&self) -> &str {
        "csv_source"
    }

    fn name(&self) -> &str {
        "CSV Source"
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Source
    }

    fn description(&self) -> &str {
        "Reads records from a CSV file"
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new()
            .field(
                ConfigField::new("path", ConfigKind::String)
                    .title("File Path")
                    .description("Path to the CSV file")
                    .required(),
            )
            .field(
                ConfigField::new("delimiter", ConfigKind::String)
                    .title("Delimiter")
                    .description("Field delimiter (one character)")
                    .default_value(json!(",")),
            )
            .field(
                ConfigField::new("has_header", ConfigKind::Boolean)
                    .title("Has Header")
                    .description("Whether the first row holds column names")
                    .default_value(json!(true)),
            )
            .field(
                ConfigField::new("comment", ConfigKind::String)
                    .title("Comment Character")
                    .description("Lines starting with this character are skipped"),
            )
    }

    fn validate(&self, config: &JsonValue) -> Result<(), ConfigError> {
        self.config_schema().check(config)?;
        Config::parse(config).map(|_| ())
    }

    async fn output_schema(
        &self,
        node_id: &NodeId,
        config: &JsonValue,
        _input: &DataSchema,
    ) -> Result<DataSchema, ConnectorError> {
        let config = Config::parse(config)?;
        let table = read_table(&config).await?;
        Ok(schema_for(&table.columns, node_id))
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        config: &JsonValue,
        _input: DataEnvelope,
    ) -> Result<DataEnvelope, ConnectorError> {
        let config = Config::parse(config)?;
        let table = read_table(&config).await?;
        ctx.check_cancelled()?;

        let data: Vec<Record> = table
            .rows
            .iter()
            .map(|row| {
                table
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, column)| {
                        let cell = row.get(i).unwrap_or_default();
                        (column.clone(), JsonValue::String(cell.to_string()))
                    })
                    .collect()
            })
            .collect();

        tracing::debug!(
            node_id = %ctx.node_id,
            path = %config.path,
            rows = data.len(),
            "read csv file"
        );

        let mut envelope = DataEnvelope::new(data, schema_for(&table.columns, &ctx.node_id));
        envelope
            .metadata
            .custom
            .insert("path".to_string(), JsonValue::String(config.path));
        Ok(envelope)
    }
}
