//! Plugin-based notifier/updater registry
//!
//! The registry maps type names from the configuration (`"type": "web"`) to
//! factories, so the binding layer never hard-codes implementations.
//!
//! ## Registration
//!
//! Plugin crates expose a `register` function:
//!
//! ```rust,ignore
//! // In ruddr-notifier-web
//! pub fn register(registry: &ruddr_core::Registry) {
//!     registry.register_notifier("web", Box::new(WebNotifierFactory));
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{NotifierConfig, UpdaterConfig};
use crate::error::{Error, Result};
use crate::notifiers::StaticNotifierFactory;
use crate::traits::{Notifier, NotifierFactory, Updater, UpdaterFactory};

/// Registry of notifier and updater factories
///
/// Interior mutability with `RwLock`: registration takes `&self`, so a
/// shared registry can be populated by several plugin crates.
#[derive(Default)]
pub struct Registry {
    notifiers: RwLock<HashMap<String, Box<dyn NotifierFactory>>>,
    updaters: RwLock<HashMap<String, Box<dyn UpdaterFactory>>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the notifiers built into this crate
    ///
    /// Currently: `static`.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_notifier("static", Box::new(StaticNotifierFactory));
        registry
    }

    /// Register a notifier factory under `name`, replacing any previous one
    pub fn register_notifier(&self, name: impl Into<String>, factory: Box<dyn NotifierFactory>) {
        let name = name.into();
        tracing::debug!("Registering notifier type {}", name);
        self.notifiers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, factory);
    }

    /// Register an updater factory under `name`, replacing any previous one
    pub fn register_updater(&self, name: impl Into<String>, factory: Box<dyn UpdaterFactory>) {
        let name = name.into();
        tracing::debug!("Registering updater type {}", name);
        self.updaters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, factory);
    }

    /// Create the notifier `name` from its configuration
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the type is not registered, or whatever the
    /// factory reports.
    pub fn create_notifier(&self, name: &str, config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
        let notifiers = self.notifiers.read().unwrap_or_else(PoisonError::into_inner);
        let factory = notifiers.get(&config.kind).ok_or_else(|| {
            Error::config(format!(
                "Notifier {} has unknown type {}",
                name, config.kind
            ))
        })?;
        factory.create(name, config)
    }

    /// Create the updater `name` from its configuration
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the type is not registered, or whatever the
    /// factory reports.
    pub fn create_updater(&self, name: &str, config: &UpdaterConfig) -> Result<Arc<dyn Updater>> {
        let updaters = self.updaters.read().unwrap_or_else(PoisonError::into_inner);
        let factory = updaters.get(&config.kind).ok_or_else(|| {
            Error::config(format!("Updater {} has unknown type {}", name, config.kind))
        })?;
        factory.create(name, config)
    }

    /// Registered notifier type names, sorted
    pub fn list_notifiers(&self) -> Vec<String> {
        let notifiers = self.notifiers.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = notifiers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered updater type names, sorted
    pub fn list_updaters(&self) -> Vec<String> {
        let updaters = self.updaters.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = updaters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_notifier(&self, name: &str) -> bool {
        self.notifiers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn has_updater(&self, name: &str) -> bool {
        self.updaters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::UpdaterCapabilities;
    use async_trait::async_trait;

    struct NullUpdater;

    #[async_trait]
    impl Updater for NullUpdater {
        fn capabilities(&self) -> UpdaterCapabilities {
            UpdaterCapabilities::default()
        }
    }

    struct NullUpdaterFactory;

    impl UpdaterFactory for NullUpdaterFactory {
        fn create(&self, _name: &str, _config: &UpdaterConfig) -> Result<Arc<dyn Updater>> {
            Ok(Arc::new(NullUpdater))
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = Registry::new();
        assert!(!registry.has_updater("null"));

        registry.register_updater("null", Box::new(NullUpdaterFactory));
        assert!(registry.has_updater("null"));
        assert_eq!(registry.list_updaters(), vec!["null".to_string()]);

        let config = UpdaterConfig::new("null", "n");
        assert!(registry.create_updater("u", &config).is_ok());
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let registry = Registry::new();
        let result = registry.create_updater("u", &UpdaterConfig::new("nope", "n"));
        assert!(matches!(result, Err(Error::Config(_))));

        let result = registry.create_notifier("n", &NotifierConfig::new("nope"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builtins() {
        let registry = Registry::with_builtins();
        assert!(registry.has_notifier("static"));
        assert_eq!(registry.list_notifiers(), vec!["static".to_string()]);

        let config = NotifierConfig::new("static").with_option("ipv4", "192.0.2.1");
        let notifier = registry.create_notifier("s", &config).unwrap();
        assert!(notifier.capabilities().ipv4);
    }
}
