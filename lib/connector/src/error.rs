//! Error types for the connector crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ConfigError`: a node configuration failed a connector's validation
//! - `ConnectorError`: errors from describing or executing a connector
//! - `RegistryError`: errors from registering connectors

use std::fmt;

/// A configuration document failed validation.
///
/// Always identifies the offending field so editors can highlight it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// Path of the offending field (e.g. `path`, `transformations[1].source_field`).
    pub field: String,
    /// Why the field is invalid.
    pub reason: String,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an error for a required field that is absent or empty.
    #[must_use]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "required configuration field missing")
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration field '{}': {}", self.field, self.reason)
    }
}

impl std::error::Error for ConfigError {}

/// Errors from connector operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Configuration was rejected.
    InvalidConfig(ConfigError),
    /// Input records could not be processed.
    InvalidInput { reason: String },
    /// Reading or writing a file failed.
    Io { path: String, reason: String },
    /// Data could not be parsed or encoded.
    Format { reason: String },
    /// Execution was cancelled before it finished.
    Cancelled,
    /// Any other execution failure.
    ExecutionFailed { reason: String },
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(e) => write!(f, "{e}"),
            Self::InvalidInput { reason } => write!(f, "invalid input: {reason}"),
            Self::Io { path, reason } => write!(f, "i/o error on '{path}': {reason}"),
            Self::Format { reason } => write!(f, "format error: {reason}"),
            Self::Cancelled => write!(f, "connector execution cancelled"),
            Self::ExecutionFailed { reason } => write!(f, "execution failed: {reason}"),
        }
    }
}

impl std::error::Error for ConnectorError {}

impl From<ConfigError> for ConnectorError {
    fn from(e: ConfigError) -> Self {
        Self::InvalidConfig(e)
    }
}

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A connector with this id is already registered.
    DuplicateConnector { id: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateConnector { id } => {
                write!(f, "connector '{id}' is already registered")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_field() {
        let err = ConfigError::missing("path");
        assert!(err.to_string().contains("'path'"));
        assert!(err.to_string().contains("required configuration field missing"));
    }

    #[test]
    fn connector_error_wraps_config_error() {
        let err: ConnectorError = ConfigError::new("delimiter", "must be one character").into();
        assert!(matches!(err, ConnectorError::InvalidConfig(_)));
        assert!(err.to_string().contains("delimiter"));
    }

    #[test]
    fn io_error_display() {
        let err = ConnectorError::Io {
            path: "/tmp/x.csv".to_string(),
            reason: "not found".to_string(),
        };
        assert!(err.to_string().contains("/tmp/x.csv"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn registry_error_display() {
        let err = RegistryError::DuplicateConnector {
            id: "csv_source".to_string(),
        };
        assert!(err.to_string().contains("csv_source"));
    }
}
