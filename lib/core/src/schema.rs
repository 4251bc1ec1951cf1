//! Data shape descriptions and the record envelope exchanged between nodes.
//!
//! - [`FieldDefinition`]: one named, typed field and the node it came from
//! - [`DataSchema`]: ordered fields plus the de-duplicated set of contributing nodes
//! - [`DataEnvelope`]: records produced by a node together with their metadata

use crate::id::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// A single data record: an ordered JSON object.
pub type Record = Map<String, JsonValue>;

/// The declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    /// Arrays, objects, and anything else without a scalar mapping.
    Json,
}

impl FieldType {
    /// Returns the type name used in schemas and configuration.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Json => "json",
        }
    }

    /// Parses a type name, returning `None` for unknown names.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "date" => Some(Self::Date),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Infers the field type of a JSON value.
    ///
    /// `null` carries no type information and maps to `string`.
    #[must_use]
    pub fn of_value(value: &JsonValue) -> Self {
        match value {
            JsonValue::Bool(_) => Self::Boolean,
            JsonValue::Number(_) => Self::Number,
            JsonValue::String(_) | JsonValue::Null => Self::String,
            JsonValue::Array(_) | JsonValue::Object(_) => Self::Json,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes one field of a data shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field name as it appears in records.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Human-readable description; empty when none was provided.
    #[serde(default)]
    pub description: String,
    /// The node that originally produced this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_node: Option<NodeId>,
    /// Whether the field may be absent or null.
    #[serde(default)]
    pub nullable: bool,
}

impl FieldDefinition {
    /// Creates a non-nullable field without description or origin.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            description: String::new(),
            source_node: None,
            nullable: false,
        }
    }

    /// Sets the originating node.
    #[must_use]
    pub fn from_node(mut self, node_id: NodeId) -> Self {
        self.source_node = Some(node_id);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Marks the field nullable.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// An ordered description of a data shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSchema {
    /// Fields in output order.
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    /// Nodes that contributed to this shape, de-duplicated, in encounter order.
    #[serde(default)]
    pub source_nodes: Vec<NodeId>,
}

impl DataSchema {
    /// Creates an explicitly empty schema.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a schema from fields, attributing it to a single source node.
    #[must_use]
    pub fn from_fields(fields: Vec<FieldDefinition>, source_node: Option<NodeId>) -> Self {
        Self {
            fields,
            source_nodes: source_node.into_iter().collect(),
        }
    }

    /// Returns true if the schema has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the position of a field by name.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Returns field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Adds a contributing node if it is not already present.
    pub fn add_source_node(&mut self, node_id: NodeId) {
        if !self.source_nodes.contains(&node_id) {
            self.source_nodes.push(node_id);
        }
    }

    /// Infers a schema from sample records.
    ///
    /// Fields appear in order of first appearance. A field whose first non-null
    /// value is a boolean, number, or string takes that type; arrays and
    /// objects become `json`. A field that is null or missing in any record is
    /// nullable.
    #[must_use]
    pub fn infer_from_records(records: &[Record], source_node: Option<&NodeId>) -> Self {
        let mut fields: Vec<FieldDefinition> = Vec::new();
        let mut seen_in: Vec<usize> = Vec::new();
        let mut typed: Vec<bool> = Vec::new();

        for record in records {
            for (name, value) in record {
                match fields.iter().position(|f| &f.name == name) {
                    Some(index) => {
                        seen_in[index] += 1;
                        let field = &mut fields[index];
                        if value.is_null() {
                            field.nullable = true;
                        } else if !typed[index] {
                            field.field_type = FieldType::of_value(value);
                            typed[index] = true;
                        }
                    }
                    None => {
                        let mut field = FieldDefinition::new(name.clone(), FieldType::of_value(value));
                        field.nullable = value.is_null();
                        field.source_node = source_node.cloned();
                        fields.push(field);
                        seen_in.push(1);
                        typed.push(!value.is_null());
                    }
                }
            }
        }

        for (field, count) in fields.iter_mut().zip(seen_in) {
            if count < records.len() {
                field.nullable = true;
            }
        }

        Self::from_fields(fields, source_node.cloned())
    }
}

/// Metadata carried alongside the records of an envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    /// The node that produced the envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// The connector that produced the envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<String>,
    /// Shape of the records.
    #[serde(default)]
    pub schema: DataSchema,
    /// Number of records.
    #[serde(default)]
    pub record_count: usize,
    /// Time spent producing the envelope.
    #[serde(default)]
    pub execution_time_ms: u64,
    /// Upstream nodes whose data flowed into this envelope.
    #[serde(default)]
    pub sources: Vec<NodeId>,
    /// Connector-specific metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom: Map<String, JsonValue>,
}

/// Records produced by a node, with metadata describing them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataEnvelope {
    /// The records.
    #[serde(default)]
    pub data: Vec<Record>,
    /// Metadata about the records.
    #[serde(default)]
    pub metadata: EnvelopeMetadata,
}

impl DataEnvelope {
    /// Creates an envelope with no records and an empty schema.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates an envelope from records and a schema.
    #[must_use]
    pub fn new(data: Vec<Record>, schema: DataSchema) -> Self {
        let record_count = data.len();
        Self {
            data,
            metadata: EnvelopeMetadata {
                schema,
                record_count,
                ..EnvelopeMetadata::default()
            },
        }
    }

    /// Converts an arbitrary JSON payload into records.
    ///
    /// - object: one record
    /// - array: each object element is a record; scalar elements become `{"value": x}`
    /// - null: no records
    /// - any other scalar: one record `{"value": x}`
    #[must_use]
    pub fn records_from_payload(payload: &JsonValue) -> Vec<Record> {
        fn wrap(value: &JsonValue) -> Record {
            let mut record = Record::new();
            record.insert("value".to_string(), value.clone());
            record
        }

        match payload {
            JsonValue::Null => Vec::new(),
            JsonValue::Object(map) => vec![map.clone()],
            JsonValue::Array(items) => items
                .iter()
                .map(|item| match item {
                    JsonValue::Object(map) => map.clone(),
                    other => wrap(other),
                })
                .collect(),
            other => vec![wrap(other)],
        }
    }

    /// Builds an envelope from a trigger payload, inferring its schema.
    #[must_use]
    pub fn from_payload(payload: &JsonValue) -> Self {
        let records = Self::records_from_payload(payload);
        let schema = DataSchema::infer_from_records(&records, None);
        Self::new(records, schema)
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Refreshes `record_count` after the records were modified.
    pub fn sync_count(&mut self) {
        self.metadata.record_count = self.data.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: JsonValue) -> Record {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn infer_types_and_order() {
        let node = NodeId::new("src").unwrap();
        let records = vec![record(json!({
            "id": 1,
            "name": "Ada",
            "active": true,
            "tags": ["a"],
            "meta": {"k": 1},
            "note": null
        }))];

        let schema = DataSchema::infer_from_records(&records, Some(&node));

        let names: Vec<_> = schema.field_names().collect();
        assert_eq!(names, vec!["id", "name", "active", "tags", "meta", "note"]);
        assert_eq!(schema.field("id").unwrap().field_type, FieldType::Number);
        assert_eq!(schema.field("name").unwrap().field_type, FieldType::String);
        assert_eq!(schema.field("active").unwrap().field_type, FieldType::Boolean);
        assert_eq!(schema.field("tags").unwrap().field_type, FieldType::Json);
        assert_eq!(schema.field("meta").unwrap().field_type, FieldType::Json);
        let note = schema.field("note").unwrap();
        assert_eq!(note.field_type, FieldType::String);
        assert!(note.nullable);
        assert!(!schema.field("id").unwrap().nullable);
        assert_eq!(schema.source_nodes, vec![node.clone()]);
        assert_eq!(schema.field("id").unwrap().source_node, Some(node));
    }

    #[test]
    fn infer_marks_partially_present_fields_nullable() {
        let records = vec![
            record(json!({"id": 1, "email": "a@example.com"})),
            record(json!({"id": 2})),
        ];

        let schema = DataSchema::infer_from_records(&records, None);

        assert!(!schema.field("id").unwrap().nullable);
        assert!(schema.field("email").unwrap().nullable);
    }

    #[test]
    fn infer_refines_type_after_leading_null() {
        let records = vec![record(json!({"score": null})), record(json!({"score": 4.5}))];

        let schema = DataSchema::infer_from_records(&records, None);

        let score = schema.field("score").unwrap();
        assert_eq!(score.field_type, FieldType::Number);
        assert!(score.nullable);
    }

    #[test]
    fn payload_conversion() {
        assert!(DataEnvelope::records_from_payload(&JsonValue::Null).is_empty());
        assert_eq!(DataEnvelope::records_from_payload(&json!({"a": 1})).len(), 1);

        let records = DataEnvelope::records_from_payload(&json!([{"a": 1}, 2]));
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("value"), Some(&json!(2)));

        let scalar = DataEnvelope::records_from_payload(&json!("hello"));
        assert_eq!(scalar[0].get("value"), Some(&json!("hello")));
    }

    #[test]
    fn envelope_from_payload_counts_records() {
        let envelope = DataEnvelope::from_payload(&json!([{"a": 1}, {"a": 2}]));
        assert_eq!(envelope.metadata.record_count, 2);
        assert_eq!(envelope.metadata.schema.fields.len(), 1);
    }

    #[test]
    fn add_source_node_deduplicates() {
        let mut schema = DataSchema::empty();
        let a = NodeId::new("a").unwrap();
        schema.add_source_node(a.clone());
        schema.add_source_node(a);
        assert_eq!(schema.source_nodes.len(), 1);
    }

    #[test]
    fn field_type_names() {
        for ty in [
            FieldType::String,
            FieldType::Number,
            FieldType::Boolean,
            FieldType::Date,
            FieldType::Json,
        ] {
            assert_eq!(FieldType::from_name(ty.as_str()), Some(ty));
        }
        assert_eq!(FieldType::from_name("uuid"), None);
    }
}
