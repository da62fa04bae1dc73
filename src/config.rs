//! Configuration handed to a backend when the host sets it up.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::storage::Storage;
use crate::system_view::{StaticSystemView, SystemView};

/// Configuration for setting up a backend.
///
/// Everything a backend learns about its host arrives here; there are no
/// environment variables or files. Use the builder methods for ergonomic
/// configuration:
///
/// ```
/// use std::sync::Arc;
/// use vaultframe::config::BackendConfig;
/// use vaultframe::storage::InmemStorage;
///
/// let config = BackendConfig::new()
///     .with_storage(Arc::new(InmemStorage::new()))
///     .with_logger(tracing::info_span!("plugin", mount = "aws/"))
///     .with_backend_uuid("5d0b4c3e")
///     .with_option("region", "us-west-2");
///
/// assert_eq!(config.get_option("region"), Some(&"us-west-2".to_string()));
/// assert!(config.storage_view.is_some());
/// ```
#[derive(Clone)]
pub struct BackendConfig {
    /// Storage scoped to the backend's mount
    pub storage_view: Option<Arc<dyn Storage>>,

    /// Span the backend logs under (default: disabled span)
    pub logger: tracing::Span,

    /// Host capabilities: lease ceilings, replication state, identity
    pub system: Arc<dyn SystemView>,

    /// Mount configuration options
    pub options: HashMap<String, String>,

    /// Unique id of this mount
    pub backend_uuid: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            storage_view: None,
            logger: tracing::Span::none(),
            system: Arc::new(StaticSystemView::new()),
            options: HashMap::new(),
            backend_uuid: String::new(),
        }
    }
}

impl BackendConfig {
    /// Creates a configuration with a [`StaticSystemView`] and no storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the storage view.
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage_view = Some(storage);
        self
    }

    /// Sets the span backend logs are recorded under.
    pub fn with_logger(mut self, logger: tracing::Span) -> Self {
        self.logger = logger;
        self
    }

    /// Sets the system view.
    pub fn with_system(mut self, system: Arc<dyn SystemView>) -> Self {
        self.system = system;
        self
    }

    pub fn with_backend_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.backend_uuid = uuid.into();
        self
    }

    /// Adds a mount configuration option.
    ///
    /// Options are opaque to the framework; backends interpret them, e.g.
    /// `plugin_name` or a cloud `region`.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Gets a mount configuration option.
    pub fn get_option(&self, key: &str) -> Option<&String> {
        self.options.get(key)
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("storage_view", &self.storage_view.is_some())
            .field("logger", &self.logger)
            .field("options", &self.options)
            .field("backend_uuid", &self.backend_uuid)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_config_builder() {
        let system = StaticSystemView {
            max_lease_ttl: Duration::from_secs(60),
            ..StaticSystemView::default()
        };
        let config = BackendConfig::new()
            .with_system(Arc::new(system))
            .with_backend_uuid("uuid-1")
            .with_option("plugin_name", "demo");

        assert_eq!(config.backend_uuid, "uuid-1");
        assert_eq!(config.get_option("plugin_name"), Some(&"demo".to_string()));
        assert_eq!(config.get_option("missing"), None);
        assert_eq!(config.system.max_lease_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_default_config() {
        let config = BackendConfig::default();
        assert!(config.storage_view.is_none());
        assert!(config.options.is_empty());
        assert_eq!(config.system.default_lease_ttl(), Duration::from_secs(24 * 3600));
        assert!(config.logger.is_none());
    }
}
