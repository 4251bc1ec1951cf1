//! Configuration schema descriptors.
//!
//! Node configuration is an opaque JSON document. Each connector describes the
//! shape it expects with a [`ConfigSchema`], which editors render and which
//! performs the structural part of validation. Connectors layer their own
//! semantic checks on top.

use crate::error::ConfigError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// The JSON kind a configuration field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ConfigKind {
    fn matches(self, value: &JsonValue) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// Describes one configuration field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    pub kind: ConfigKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
    /// Allowed values for string fields; empty means unrestricted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl ConfigField {
    /// Creates an optional field of the given kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ConfigKind) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            kind,
            description: String::new(),
            required: false,
            default: None,
            options: Vec::new(),
        }
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: JsonValue) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }
}

/// Ordered set of configuration field descriptors for one connector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub fields: Vec<ConfigField>,
}

impl ConfigSchema {
    /// Creates an empty schema (the connector takes no configuration).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field descriptor.
    #[must_use]
    pub fn field(mut self, field: ConfigField) -> Self {
        self.fields.push(field);
        self
    }

    /// Structurally checks a configuration document against this schema.
    ///
    /// `null` is treated as an empty document. Fields not described by the
    /// schema are ignored.
    ///
    /// # Errors
    ///
    /// Returns the first field that is missing, has the wrong kind, or holds a
    /// value outside its options.
    pub fn check(&self, config: &JsonValue) -> Result<(), ConfigError> {
        let empty = Map::new();
        let object = match config {
            JsonValue::Null => &empty,
            JsonValue::Object(map) => map,
            _ => return Err(ConfigError::new("config", "configuration must be an object")),
        };

        for field in &self.fields {
            let value = object.get(&field.name).filter(|v| !v.is_null());
            let Some(value) = value else {
                if field.required {
                    return Err(ConfigError::missing(&field.name));
                }
                continue;
            };

            if !field.kind.matches(value) {
                return Err(ConfigError::new(
                    &field.name,
                    format!("expected {}", field.kind.as_str()),
                ));
            }

            if let JsonValue::String(s) = value {
                if field.required && s.trim().is_empty() {
                    return Err(ConfigError::missing(&field.name));
                }
                if !field.options.is_empty() && !field.options.iter().any(|o| o == s) {
                    return Err(ConfigError::new(
                        &field.name,
                        format!("must be one of: {}", field.options.join(", ")),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Deserializes a configuration document into a connector's typed config.
///
/// `null` deserializes as an empty object so that all-default configs work.
///
/// # Errors
///
/// Returns a [`ConfigError`] naming the field serde complained about, or
/// `config` when the error is not attributable to a single field.
pub fn parse_config<T: DeserializeOwned>(config: &JsonValue) -> Result<T, ConfigError> {
    let document = if config.is_null() {
        JsonValue::Object(Map::new())
    } else {
        config.clone()
    };

    serde_json::from_value(document).map_err(|e| {
        let message = e.to_string();
        let field = message
            .split('`')
            .nth(1)
            .filter(|_| message.starts_with("missing field") || message.starts_with("unknown field"))
            .unwrap_or("config")
            .to_string();
        ConfigError::new(field, message)
    })
}
