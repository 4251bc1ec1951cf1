//! Connector registry.

use crate::builtin;
use crate::connector::{Connector, ConnectorInfo};
use crate::error::RegistryError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Lookup table of connectors by id.
///
/// Populated once at startup and shared read-only afterwards, so it needs no
/// interior locking.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry containing every builtin connector.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for connector in builtin::all() {
            registry
                .connectors
                .insert(connector.id().to_string(), connector);
        }
        registry
    }

    /// Registers a connector.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateConnector` if a connector with the same id exists.
    pub fn register(&mut self, connector: Arc<dyn Connector>) -> Result<(), RegistryError> {
        let id = connector.id().to_string();
        if self.connectors.contains_key(&id) {
            return Err(RegistryError::DuplicateConnector { id });
        }
        tracing::debug!(connector_id = %id, "registered connector");
        self.connectors.insert(id, connector);
        Ok(())
    }

    /// Looks up a connector by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.connectors.contains_key(id)
    }

    /// Returns registered connector ids in sorted order.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.connectors.keys().cloned().collect()
    }

    /// Returns descriptive information for every connector, sorted by id.
    #[must_use]
    pub fn infos(&self) -> Vec<ConnectorInfo> {
        self.connectors.values().map(|c| c.info()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("connectors", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::StaticSource;

    #[test]
    fn register_and_lookup() {
        let mut registry = ConnectorRegistry::new();
        assert!(registry.is_empty());

        registry
            .register(Arc::new(StaticSource))
            .expect("first registration succeeds");

        assert!(registry.contains("static_source"));
        assert_eq!(
            registry.get("static_source").map(|c| c.id().to_string()),
            Some("static_source".to_string())
        );
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(StaticSource)).expect("first");

        let err = registry.register(Arc::new(StaticSource)).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateConnector {
                id: "static_source".to_string()
            }
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn builtins_are_listed_sorted() {
        let registry = ConnectorRegistry::with_builtins();
        let ids = registry.list();

        assert_eq!(
            ids,
            vec![
                "csv_destination",
                "csv_source",
                "log_destination",
                "static_source",
                "transform_processor",
                "trigger_payload",
            ]
        );

        let infos = registry.infos();
        assert_eq!(infos.len(), ids.len());
        assert!(infos.iter().zip(&ids).all(|(info, id)| &info.id == id));
    }
}
