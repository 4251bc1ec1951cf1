//! Field-level record transformations.
//!
//! A `transform_processor` node applies an ordered list of
//! [`Transformation`]s to every input record and describes the matching
//! schema change, so editors see the same shape the data will have.

use crate::config::{ConfigField, ConfigKind, ConfigSchema};
use crate::connector::{Connector, ConnectorType, ExecutionContext};
use crate::error::{ConfigError, ConnectorError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use conduit_core::{DataEnvelope, DataSchema, FieldDefinition, FieldType, NodeId, Record};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};

/// One step of a transform node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transformation {
    /// Renames a field in place.
    Rename {
        source_field: String,
        target_field: String,
    },
    /// Removes a field.
    Delete { source_field: String },
    /// Sets a field to a constant value.
    Add {
        target_field: String,
        #[serde(default)]
        value: JsonValue,
    },
    /// Duplicates a field under a new name.
    Copy {
        source_field: String,
        target_field: String,
    },
    /// Converts a field's values to another type, optionally renaming it.
    Cast {
        source_field: String,
        to_type: FieldType,
        #[serde(default)]
        target_field: Option<String>,
    },
    Lowercase { source_field: String },
    Uppercase { source_field: String },
    Trim { source_field: String },
    /// Replaces every occurrence of `old_value` in a string field.
    Replace {
        source_field: String,
        old_value: String,
        #[serde(default)]
        new_value: String,
    },
}

impl Transformation {
    fn check(&self, index: usize) -> Result<(), ConfigError> {
        let blank = |name: &str, value: &str| {
            if value.trim().is_empty() {
                Err(ConfigError::missing(format!("transformations[{index}].{name}")))
            } else {
                Ok(())
            }
        };

        match self {
            Self::Rename {
                source_field,
                target_field,
            }
            | Self::Copy {
                source_field,
                target_field,
            } => {
                blank("source_field", source_field)?;
                blank("target_field", target_field)
            }
            Self::Add { target_field, .. } => blank("target_field", target_field),
            Self::Cast {
                source_field,
                target_field,
                ..
            } => {
                blank("source_field", source_field)?;
                match target_field {
                    Some(target) => blank("target_field", target),
                    None => Ok(()),
                }
            }
            Self::Replace {
                source_field,
                old_value,
                ..
            } => {
                blank("source_field", source_field)?;
                if old_value.is_empty() {
                    return Err(ConfigError::missing(format!(
                        "transformations[{index}].old_value"
                    )));
                }
                Ok(())
            }
            Self::Delete { source_field }
            | Self::Lowercase { source_field }
            | Self::Uppercase { source_field }
            | Self::Trim { source_field } => blank("source_field", source_field),
        }
    }

    /// Applies this step's effect to a schema.
    fn apply_schema(&self, schema: &mut DataSchema, node_id: &NodeId) {
        match self {
            Self::Rename {
                source_field,
                target_field,
            } => {
                if let Some((index, mut field)) = take_field(schema, source_field, target_field) {
                    field.description = if field.description.is_empty() {
                        format!("Renamed from {source_field}")
                    } else {
                        format!("{} (renamed from {source_field})", field.description)
                    };
                    field.name.clone_from(target_field);
                    schema.fields.insert(index, field);
                }
            }
            Self::Delete { source_field } => {
                schema.fields.retain(|f| &f.name != source_field);
            }
            Self::Add {
                target_field,
                value,
            } => {
                let mut field = FieldDefinition::new(target_field.clone(), FieldType::of_value(value))
                    .from_node(node_id.clone());
                field.nullable = value.is_null();
                upsert_field(schema, field);
            }
            Self::Copy {
                source_field,
                target_field,
            } => {
                if let Some(source) = schema.field(source_field) {
                    let mut copy = source.clone();
                    copy.name.clone_from(target_field);
                    copy.description = format!("Copy of {source_field}");
                    upsert_field(schema, copy);
                }
            }
            Self::Cast {
                source_field,
                to_type,
                target_field,
            } => {
                let target = target_field.as_deref().unwrap_or(source_field);
                if let Some((index, mut field)) = take_field(schema, source_field, target) {
                    field.field_type = *to_type;
                    field.name = target.to_string();
                    schema.fields.insert(index, field);
                }
            }
            Self::Lowercase { .. }
            | Self::Uppercase { .. }
            | Self::Trim { .. }
            | Self::Replace { .. } => {}
        }
    }

    /// Applies this step's effect to one record.
    fn apply_record(&self, record: Record) -> Result<Record, String> {
        match self {
            Self::Rename {
                source_field,
                target_field,
            } => Ok(rename_key(record, source_field, target_field)),
            Self::Delete { source_field } => {
                Ok(record.into_iter().filter(|(k, _)| k != source_field).collect())
            }
            Self::Add {
                target_field,
                value,
            } => {
                let mut record = record;
                record.insert(target_field.clone(), value.clone());
                Ok(record)
            }
            Self::Copy {
                source_field,
                target_field,
            } => {
                let mut record = record;
                if let Some(value) = record.get(source_field).cloned() {
                    record.insert(target_field.clone(), value);
                }
                Ok(record)
            }
            Self::Cast {
                source_field,
                to_type,
                target_field,
            } => {
                let target = target_field.as_deref().unwrap_or(source_field);
                let mut record = rename_key(record, source_field, target);
                if let Some(value) = record.get_mut(target) {
                    let converted = cast(value, *to_type)
                        .map_err(|reason| format!("field '{source_field}': {reason}"))?;
                    *value = converted;
                }
                Ok(record)
            }
            Self::Lowercase { source_field } => {
                Ok(map_string(record, source_field, |s| s.to_lowercase()))
            }
            Self::Uppercase { source_field } => {
                Ok(map_string(record, source_field, |s| s.to_uppercase()))
            }
            Self::Trim { source_field } => {
                Ok(map_string(record, source_field, |s| s.trim().to_string()))
            }
            Self::Replace {
                source_field,
                old_value,
                new_value,
            } => Ok(map_string(record, source_field, |s| {
                s.replace(old_value.as_str(), new_value)
            })),
        }
    }
}

/// Removes `source` from the schema along with any other field already named
/// `target`, returning the field and the position it occupied.
fn take_field(
    schema: &mut DataSchema,
    source: &str,
    target: &str,
) -> Option<(usize, FieldDefinition)> {
    schema.position(source)?;
    if source != target {
        schema.fields.retain(|f| f.name != target);
    }
    let index = schema.position(source)?;
    Some((index, schema.fields.remove(index)))
}

/// Replaces a field of the same name in place, or appends it.
fn upsert_field(schema: &mut DataSchema, field: FieldDefinition) {
    match schema.position(&field.name) {
        Some(index) => schema.fields[index] = field,
        None => schema.fields.push(field),
    }
}

/// Renames a key in place, replacing any existing `target` key.
fn rename_key(record: Record, source: &str, target: &str) -> Record {
    if source == target || !record.contains_key(source) {
        return record;
    }
    record
        .into_iter()
        .filter(|(k, _)| k != target)
        .map(|(k, v)| if k == source { (target.to_string(), v) } else { (k, v) })
        .collect()
}

fn map_string(mut record: Record, field: &str, f: impl Fn(&str) -> String) -> Record {
    if let Some(JsonValue::String(s)) = record.get_mut(field) {
        *s = f(s);
    }
    record
}

fn number(value: f64) -> Result<JsonValue, String> {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        return Ok(JsonValue::from(value as i64));
    }
    Number::from_f64(value)
        .map(JsonValue::Number)
        .ok_or_else(|| format!("{value} is not a finite number"))
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Converts a value to the given type. `null` stays `null`.
fn cast(value: &JsonValue, to: FieldType) -> Result<JsonValue, String> {
    if value.is_null() {
        return Ok(JsonValue::Null);
    }

    match to {
        FieldType::String => Ok(JsonValue::String(match value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        })),
        FieldType::Number => match value {
            JsonValue::Number(_) => Ok(value.clone()),
            JsonValue::Bool(b) => Ok(JsonValue::from(u8::from(*b))),
            JsonValue::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("cannot cast '{s}' to number"))
                .and_then(number),
            _ => Err("cannot cast structured value to number".to_string()),
        },
        FieldType::Boolean => match value {
            JsonValue::Bool(_) => Ok(value.clone()),
            JsonValue::Number(n) => Ok(JsonValue::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
            JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" => Ok(JsonValue::Bool(true)),
                "false" | "0" | "no" | "n" | "" => Ok(JsonValue::Bool(false)),
                _ => Err(format!("cannot cast '{s}' to boolean")),
            },
            _ => Err("cannot cast structured value to boolean".to_string()),
        },
        FieldType::Date => {
            let parsed = match value {
                JsonValue::String(s) => parse_date(s),
                JsonValue::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
                _ => None,
            };
            parsed
                .map(|dt| JsonValue::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true)))
                .ok_or_else(|| format!("cannot cast {value} to date"))
        }
        FieldType::Json => match value {
            JsonValue::String(s) => {
                serde_json::from_str(s).map_err(|e| format!("cannot parse '{s}' as json: {e}"))
            }
            other => Ok(other.clone()),
        },
    }
}

fn transformations(config: &JsonValue) -> Result<Vec<Transformation>, ConfigError> {
    let items = config
        .get("transformations")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| ConfigError::missing("transformations"))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let step: Transformation = serde_json::from_value(item.clone())
                .map_err(|e| ConfigError::new(format!("transformations[{i}]"), e.to_string()))?;
            step.check(i)?;
            Ok(step)
        })
        .collect()
}

/// Applies ordered field transformations to every record.
pub struct TransformProcessor;

#[async_trait]
impl Connector for TransformProcessor {
    fn id(&self) -> &str {
        "transform_processor"
    }

    fn name(&self) -> &str {
        "Transform"
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Transform
    }

    fn description(&self) -> &str {
        "Renames, removes, adds, copies, casts and cleans up record fields"
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new().field(
            ConfigField::new("transformations", ConfigKind::Array)
                .title("Transformations")
                .description(
                    "Ordered steps; each has a type (rename, delete, add, copy, cast, \
                     lowercase, uppercase, trim, replace) and its fields",
                )
                .required(),
        )
    }

    fn validate(&self, config: &JsonValue) -> Result<(), ConfigError> {
        self.config_schema().check(config)?;
        transformations(config).map(|_| ())
    }

    async fn output_schema(
        &self,
        node_id: &NodeId,
        config: &JsonValue,
        input: &DataSchema,
    ) -> Result<DataSchema, ConnectorError> {
        let steps = transformations(config)?;
        let mut schema = input.clone();
        for step in &steps {
            step.apply_schema(&mut schema, node_id);
        }
        Ok(schema)
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        config: &JsonValue,
        input: DataEnvelope,
    ) -> Result<DataEnvelope, ConnectorError> {
        let steps = transformations(config)?;

        let mut schema = input.metadata.schema.clone();
        for step in &steps {
            step.apply_schema(&mut schema, &ctx.node_id);
        }

        let mut data = Vec::with_capacity(input.data.len());
        for (index, record) in input.data.into_iter().enumerate() {
            let mut record = record;
            for step in &steps {
                record = step.apply_record(record).map_err(|reason| {
                    ConnectorError::InvalidInput {
                        reason: format!("record {index}: {reason}"),
                    }
                })?;
            }
            data.push(record);
        }

        let mut envelope = DataEnvelope::new(data, schema);
        envelope.metadata.sources = input.metadata.sources;
        envelope.metadata.custom.insert(
            "transformations_applied".to_string(),
            JsonValue::from(steps.len()),
        );
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::{context, node};
    use serde_json::json;

    fn record(value: JsonValue) -> Record {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn input_schema() -> DataSchema {
        let src = node("src");
        DataSchema::from_fields(
            vec![
                FieldDefinition::new("id", FieldType::String).from_node(src.clone()),
                FieldDefinition::new("name", FieldType::String)
                    .from_node(src.clone())
                    .with_description("Full name"),
                FieldDefinition::new("email", FieldType::String).from_node(src.clone()),
            ],
            Some(src),
        )
    }

    async fn schema_after(steps: JsonValue) -> DataSchema {
        TransformProcessor
            .output_schema(&node("tx"), &json!({"transformations": steps}), &input_schema())
            .await
            .expect("schema")
    }

    #[tokio::test]
    async fn rename_keeps_position_and_describes_origin() {
        let schema = schema_after(json!([
            {"type": "rename", "source_field": "id", "target_field": "user_id"},
            {"type": "rename", "source_field": "name", "target_field": "full_name"}
        ]))
        .await;

        let names: Vec<_> = schema.field_names().collect();
        assert_eq!(names, vec!["user_id", "full_name", "email"]);
        assert_eq!(schema.fields[0].description, "Renamed from id");
        assert_eq!(schema.fields[1].description, "Full name (renamed from name)");
        assert_eq!(schema.fields[0].source_node, Some(node("src")));
    }

    #[tokio::test]
    async fn add_copy_delete_and_cast_shape_schema() {
        let schema = schema_after(json!([
            {"type": "delete", "source_field": "email"},
            {"type": "add", "target_field": "active", "value": true},
            {"type": "add", "target_field": "note"},
            {"type": "copy", "source_field": "name", "target_field": "display"},
            {"type": "cast", "source_field": "id", "to_type": "number"}
        ]))
        .await;

        let names: Vec<_> = schema.field_names().collect();
        assert_eq!(names, vec!["id", "name", "active", "note", "display"]);
        assert_eq!(schema.field("id").unwrap().field_type, FieldType::Number);
        assert_eq!(schema.field("active").unwrap().field_type, FieldType::Boolean);
        assert_eq!(schema.field("active").unwrap().source_node, Some(node("tx")));
        assert!(schema.field("note").unwrap().nullable);
        assert_eq!(schema.field("display").unwrap().description, "Copy of name");
    }

    #[tokio::test]
    async fn execute_applies_steps_in_order() {
        let input = DataEnvelope::new(
            vec![
                record(json!({"id": "1", "name": "  Ada ", "email": "ADA@EXAMPLE.COM"})),
                record(json!({"id": "2", "name": "Grace", "email": "grace@example.com"})),
            ],
            input_schema(),
        );
        let config = json!({"transformations": [
            {"type": "cast", "source_field": "id", "to_type": "number", "target_field": "user_id"},
            {"type": "trim", "source_field": "name"},
            {"type": "lowercase", "source_field": "email"},
            {"type": "replace", "source_field": "email", "old_value": "example.com", "new_value": "example.org"}
        ]});

        let output = TransformProcessor
            .execute(&context("tx"), &config, input)
            .await
            .expect("execute");

        assert_eq!(
            output.data[0],
            record(json!({"user_id": 1, "name": "Ada", "email": "ada@example.org"}))
        );
        let keys: Vec<_> = output.data[1].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["user_id", "name", "email"]);
        assert_eq!(
            output.metadata.custom.get("transformations_applied"),
            Some(&json!(4))
        );
    }

    #[tokio::test]
    async fn failed_cast_is_invalid_input() {
        let input = DataEnvelope::new(vec![record(json!({"id": "abc"}))], DataSchema::empty());
        let config = json!({"transformations": [
            {"type": "cast", "source_field": "id", "to_type": "number"}
        ]});

        let err = TransformProcessor
            .execute(&context("tx"), &config, input)
            .await
            .unwrap_err();
        match err {
            ConnectorError::InvalidInput { reason } => {
                assert!(reason.contains("record 0"));
                assert!(reason.contains("'id'"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn casts_between_types() {
        assert_eq!(cast(&json!("3.5"), FieldType::Number), Ok(json!(3.5)));
        assert_eq!(cast(&json!("42"), FieldType::Number), Ok(json!(42)));
        assert_eq!(cast(&json!("yes"), FieldType::Boolean), Ok(json!(true)));
        assert_eq!(cast(&json!(0), FieldType::Boolean), Ok(json!(false)));
        assert_eq!(cast(&json!(7), FieldType::String), Ok(json!("7")));
        assert_eq!(
            cast(&json!("2024-03-01"), FieldType::Date),
            Ok(json!("2024-03-01T00:00:00Z"))
        );
        assert_eq!(cast(&json!("[1,2]"), FieldType::Json), Ok(json!([1, 2])));
        assert_eq!(cast(&JsonValue::Null, FieldType::Number), Ok(JsonValue::Null));
        assert!(cast(&json!("soon"), FieldType::Date).is_err());
    }

    #[test]
    fn validate_names_offending_step() {
        let err = TransformProcessor
            .validate(&json!({"transformations": [
                {"type": "delete", "source_field": "a"},
                {"type": "rename", "source_field": "b", "target_field": ""}
            ]}))
            .unwrap_err();
        assert_eq!(err.field, "transformations[1].target_field");

        let err = TransformProcessor
            .validate(&json!({"transformations": [{"type": "explode"}]}))
            .unwrap_err();
        assert_eq!(err.field, "transformations[0]");

        assert_eq!(
            TransformProcessor.validate(&json!({})).unwrap_err().field,
            "transformations"
        );
    }
}
