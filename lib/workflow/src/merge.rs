//! Merging the outputs of several upstream nodes into one input.
//!
//! The same conflict policy applies at inference time (schemas only) and at
//! run time (schemas and records):
//!
//! - no upstream: empty
//! - one upstream: unchanged, no renaming
//! - two or more: a field name present in more than one upstream schema is a
//!   conflict field and becomes `{prefix}_{name}` for every upstream that has
//!   it, where the prefix is the upstream's label or its short ID. Fields are
//!   appended in upstream order and collapse to the first occurrence of each
//!   final name.

use conduit_core::{DataEnvelope, DataSchema, FieldDefinition, NodeId, Record};
use std::collections::{HashMap, HashSet};

/// One upstream schema, in connection order.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamSchema {
    pub node_id: NodeId,
    /// Label or short ID used when renaming conflict fields.
    pub prefix: String,
    pub schema: DataSchema,
}

/// One upstream output envelope, in connection order.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamEnvelope {
    pub node_id: NodeId,
    pub prefix: String,
    pub envelope: DataEnvelope,
}

/// Returns the field names present in more than one schema.
#[must_use]
pub fn conflicting_names<'a>(schemas: impl IntoIterator<Item = &'a DataSchema>) -> HashSet<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for schema in schemas {
        let names: HashSet<&str> = schema.field_names().collect();
        for name in names {
            *counts.entry(name).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name.to_string())
        .collect()
}

fn prefixed(prefix: &str, name: &str) -> String {
    format!("{prefix}_{name}")
}

/// Merges upstream schemas into the input schema of a downstream node.
#[must_use]
pub fn merge_schemas(upstreams: &[UpstreamSchema]) -> DataSchema {
    match upstreams {
        [] => return DataSchema::empty(),
        [single] => return single.schema.clone(),
        _ => {}
    }

    let conflicts = conflicting_names(upstreams.iter().map(|u| &u.schema));
    let mut merged = DataSchema::empty();
    let mut added: HashSet<String> = HashSet::new();

    for upstream in upstreams {
        for node_id in &upstream.schema.source_nodes {
            merged.add_source_node(node_id.clone());
        }

        for field in &upstream.schema.fields {
            let mut field: FieldDefinition = field.clone();
            if conflicts.contains(&field.name) {
                if field.description.is_empty() {
                    field.description = format!("{} (from {})", field.name, upstream.prefix);
                }
                field.name = prefixed(&upstream.prefix, &field.name);
            }
            if field.source_node.is_none() {
                field.source_node = Some(upstream.node_id.clone());
            }
            if added.insert(field.name.clone()) {
                merged.fields.push(field);
            }
        }
    }

    merged
}

fn schema_of(envelope: &DataEnvelope) -> DataSchema {
    if envelope.metadata.schema.is_empty() && !envelope.data.is_empty() {
        DataSchema::infer_from_records(&envelope.data, envelope.metadata.node_id.as_ref())
    } else {
        envelope.metadata.schema.clone()
    }
}

/// Merges upstream outputs into the input envelope of a downstream node.
///
/// Records are concatenated in upstream order. Keys of conflict fields are
/// renamed inside each record so the data matches the merged schema.
#[must_use]
pub fn merge_envelopes(upstreams: Vec<UpstreamEnvelope>) -> DataEnvelope {
    let sources: Vec<NodeId> = upstreams.iter().map(|u| u.node_id.clone()).collect();

    if upstreams.len() < 2 {
        let mut envelope = upstreams
            .into_iter()
            .next()
            .map(|u| u.envelope)
            .unwrap_or_default();
        envelope.metadata.node_id = None;
        envelope.metadata.connector_id = None;
        envelope.metadata.custom.clear();
        envelope.metadata.sources = sources;
        envelope.sync_count();
        return envelope;
    }

    let schemas: Vec<UpstreamSchema> = upstreams
        .iter()
        .map(|u| UpstreamSchema {
            node_id: u.node_id.clone(),
            prefix: u.prefix.clone(),
            schema: schema_of(&u.envelope),
        })
        .collect();
    let conflicts = conflicting_names(schemas.iter().map(|u| &u.schema));
    let schema = merge_schemas(&schemas);

    let mut data: Vec<Record> = Vec::new();
    for upstream in upstreams {
        for record in upstream.envelope.data {
            if conflicts.is_empty() {
                data.push(record);
                continue;
            }
            let renamed: Record = record
                .into_iter()
                .map(|(key, value)| {
                    if conflicts.contains(&key) {
                        (prefixed(&upstream.prefix, &key), value)
                    } else {
                        (key, value)
                    }
                })
                .collect();
            data.push(renamed);
        }
    }

    let mut envelope = DataEnvelope::new(data, schema);
    envelope.metadata.sources = sources;
    envelope
}
