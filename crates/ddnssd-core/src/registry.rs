//! Plugin-based backend registry
//!
//! Backend crates register a factory under their type name at startup; the
//! daemon then instantiates whatever the ordered `backends` configuration
//! names, without a hard-coded if-else chain.
//!
//! ```rust,ignore
//! let registry = BackendRegistry::new();
//! ddnssd_backend_route53::register(&registry);
//!
//! for entry in &config.backends {
//!     backends.push(registry.create(entry, &config.host_context()).await?);
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::backend::{Backend, BackendFactory};
use crate::config::{BackendConfig, HostContext};
use crate::error::{Error, Result};

/// Registry mapping backend type names to factories.
///
/// Interior mutability with RwLock: registration happens once at startup,
/// lookups afterwards are concurrent reads. Factories are stored as `Arc` so
/// the lock is released before the async construction runs.
#[derive(Default)]
pub struct BackendRegistry {
    factories: RwLock<HashMap<String, Arc<dyn BackendFactory>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend factory under `name` (e.g. "route53", "power_dns").
    pub fn register(&self, name: impl Into<String>, factory: Box<dyn BackendFactory>) {
        let mut factories = self.factories.write().unwrap();
        factories.insert(name.into(), Arc::from(factory));
    }

    /// Create a backend from its configuration entry.
    pub async fn create(
        &self,
        config: &BackendConfig,
        host: &HostContext,
    ) -> Result<Box<dyn Backend>> {
        let factory = {
            let factories = self.factories.read().unwrap();
            factories
                .get(config.type_name())
                .cloned()
                .ok_or_else(|| {
                    Error::config(format!("unknown backend type: {}", config.type_name()))
                })?
        };
        factory.create(config, host).await
    }

    /// List all registered backend type names.
    pub fn list(&self) -> Vec<String> {
        let factories = self.factories.read().unwrap();
        factories.keys().cloned().collect()
    }

    /// Check whether a backend type is registered.
    pub fn has(&self, name: &str) -> bool {
        let factories = self.factories.read().unwrap();
        factories.contains_key(name)
    }
}
