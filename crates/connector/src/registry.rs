use std::collections::HashMap;
use std::sync::Arc;

use tollgate_core::{ConnectorConfig, ConnectorId};

use crate::chat::ChatConnector;

/// Registry of connectors keyed by id. Built once at startup and then read
/// concurrently from the dispatch path.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<ConnectorId, Arc<dyn ChatConnector>>,
}

impl ConnectorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector, replacing any existing one with the same id.
    pub fn register(&mut self, connector: Arc<dyn ChatConnector>) {
        self.connectors.insert(connector.id().clone(), connector);
    }

    /// Look up a connector by id.
    #[must_use]
    pub fn get(&self, id: &ConnectorId) -> Option<Arc<dyn ChatConnector>> {
        self.connectors.get(id).cloned()
    }

    /// Static configurations of every registered connector.
    #[must_use]
    pub fn configs(&self) -> Vec<ConnectorConfig> {
        self.connectors
            .values()
            .map(|c| c.config().clone())
            .collect()
    }

    /// Registered connector ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<&ConnectorId> {
        let mut ids: Vec<&ConnectorId> = self.connectors.keys().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    /// Number of registered connectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::mock::MockConnector;

    use super::*;

    #[test]
    fn register_and_get() {
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::new("a")));
        registry.register(Arc::new(MockConnector::new("b")));

        assert_eq!(registry.len(), 2);
        assert!(registry.get(&ConnectorId::new("a")).is_some());
        assert!(registry.get(&ConnectorId::new("missing")).is_none());
    }

    #[test]
    fn ids_sorted() {
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::new("zeta")));
        registry.register(Arc::new(MockConnector::new("alpha")));
        let ids: Vec<&str> = registry.ids().iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }

    #[test]
    fn register_replaces_same_id() {
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::new("a")));
        registry.register(Arc::new(MockConnector::new("a")));
        assert_eq!(registry.len(), 1);
    }
}
