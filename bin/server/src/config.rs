//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables. Nested keys use
//! `__` as separator, so `ENGINE__MAX_PARALLEL_NODES` sets
//! [`EngineConfig::max_parallel_nodes`].

use conduit_workflow::{EngineConfig, MAX_LIST_LIMIT, SchemaCacheConfig};
use serde::Deserialize;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// PostgreSQL connection URL. Without one, state lives in memory.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub schema_cache: SchemaCacheConfig,

    #[serde(default)]
    pub executions: ExecutionsConfig,
}

/// Execution listing configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ExecutionsConfig {
    /// Page size when the caller gives no `limit`.
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

impl ExecutionsConfig {
    /// Resolves the number of executions to list for a request.
    #[must_use]
    pub fn limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.list_limit).clamp(1, MAX_LIST_LIMIT)
    }
}

impl Default for ExecutionsConfig {
    fn default() -> Self {
        Self {
            list_limit: default_list_limit(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_database_max_connections() -> u32 {
    5
}

fn default_list_limit() -> usize {
    50
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but cannot be parsed.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(environment())
    }

    fn from_environment(source: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}

fn environment() -> config::Environment {
    config::Environment::default()
        .separator("__")
        .try_parsing(true)
}
