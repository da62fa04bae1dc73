//! Registry of backend factories, keyed by plugin name.
//!
//! A host that serves several plugins from one process registers a factory
//! per plugin name and builds mounts through [`new_backend`]. Factories run
//! [`LogicalBackend::setup`] themselves, so what comes back is ready for
//! requests.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::backend::LogicalBackend;
use crate::config::BackendConfig;
use crate::context::Context;
use crate::error::{FrameworkError, Result};

/// Builds and sets up a backend.
pub type BackendFactory = fn(&Context, BackendConfig) -> Result<Arc<dyn LogicalBackend>>;

static FACTORY_REGISTRY: OnceLock<RwLock<HashMap<String, BackendFactory>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<String, BackendFactory>> {
    FACTORY_REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registers a factory under `name`, replacing any earlier one.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use vaultframe::factory::{new_backend, register_factory};
/// use vaultframe::{Backend, BackendConfig, BackendType, Context, LogicalBackend, Result};
///
/// fn factory(ctx: &Context, config: BackendConfig) -> Result<Arc<dyn LogicalBackend>> {
///     let backend = Backend::new(BackendType::Logical);
///     backend.setup(ctx, config)?;
///     Ok(Arc::new(backend))
/// }
///
/// register_factory("demo", factory);
/// let backend = new_backend("demo", &Context::background(), BackendConfig::new()).unwrap();
/// assert!(backend.system().is_some());
/// ```
pub fn register_factory(name: &str, factory: BackendFactory) {
    let mut reg = registry().write().unwrap_or_else(|e| e.into_inner());
    reg.insert(name.to_string(), factory);
}

/// Builds the backend registered under `name`.
///
/// # Errors
///
/// Returns [`FrameworkError::InvalidRequest`] if no factory is registered
/// under `name`, or whatever the factory returns.
pub fn new_backend(
    name: &str,
    ctx: &Context,
    config: BackendConfig,
) -> Result<Arc<dyn LogicalBackend>> {
    let factory = {
        let reg = registry().read().unwrap_or_else(|e| e.into_inner());
        *reg.get(name).ok_or_else(|| {
            FrameworkError::InvalidRequest(format!("unknown plugin: {name}"))
        })?
    };

    tracing::debug!(plugin = name, "building backend");
    factory(ctx, config)
}

/// Names of all registered factories, sorted.
pub fn registered_factories() -> Vec<String> {
    let reg = registry().read().unwrap_or_else(|e| e.into_inner());
    let mut names: Vec<String> = reg.keys().cloned().collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BackendType};

    fn credential_factory(ctx: &Context, config: BackendConfig) -> Result<Arc<dyn LogicalBackend>> {
        let backend = Backend::new(BackendType::Credential);
        backend.setup(ctx, config)?;
        Ok(Arc::new(backend))
    }

    fn failing_factory(_ctx: &Context, _config: BackendConfig) -> Result<Arc<dyn LogicalBackend>> {
        Err(FrameworkError::User("bad configuration".into()))
    }

    #[test]
    fn test_factory_registration() {
        register_factory("test-credential", credential_factory);
        assert!(registered_factories().contains(&"test-credential".to_string()));

        let backend = new_backend("test-credential", &Context::background(), BackendConfig::new()).unwrap();
        assert_eq!(backend.backend_type(), BackendType::Credential);
        assert!(backend.system().is_some());
    }

    #[test]
    fn test_factory_error_propagates() {
        register_factory("test-failing", failing_factory);
        let Err(err) = new_backend("test-failing", &Context::background(), BackendConfig::new()) else {
            panic!("expected the factory error");
        };
        assert_eq!(err.to_string(), "bad configuration");
    }

    #[test]
    fn test_unknown_plugin() {
        let Err(err) = new_backend("no-such-plugin", &Context::background(), BackendConfig::new()) else {
            panic!("expected an unknown plugin error");
        };
        assert!(err.to_string().contains("unknown plugin: no-such-plugin"));
    }
}
