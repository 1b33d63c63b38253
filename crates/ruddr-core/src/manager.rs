//! Binding layer: builds notifiers and updaters from configuration and
//! wires them together
//!
//! ```text
//! RuddrConfig ──► Registry ──► Notifier ──► NotifyScheduler ─┐
//!                         └──► Updater ──► PublishRetryEngine ◄┘ (callbacks, per family)
//!                                               │
//!                                          AddressLedger
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::RuddrConfig;
use crate::engine::PublishRetryEngine;
use crate::error::{Error, Result};
use crate::ledger::AddressLedger;
use crate::registry::Registry;
use crate::scheduler::NotifyScheduler;

/// Owns every scheduler and engine of a running agent
pub struct DdnsManager {
    ledger: Arc<AddressLedger>,
    schedulers: BTreeMap<String, NotifyScheduler>,
    engines: BTreeMap<String, PublishRetryEngine>,
}

impl DdnsManager {
    /// Build everything described by `config`
    ///
    /// Loads the ledger from `<datadir>/addrfile` before any engine exists.
    /// Each engine runs its [`initial_update`](PublishRetryEngine::initial_update)
    /// before being attached to its notifiers.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for invalid configuration, unknown types, or a
    /// notifier lacking configuration for a family an updater needs.
    pub async fn new(config: &RuddrConfig, registry: &Registry) -> Result<Self> {
        if let Err(e) = config.validate() {
            error!("Config error: {}", e);
            return Err(e);
        }

        let ledger = Arc::new(AddressLedger::load(config.ledger_path()).await);
        Self::with_ledger(config, registry, ledger).await
    }

    /// Like [`new`](Self::new) but with a caller-provided ledger
    pub async fn with_ledger(
        config: &RuddrConfig,
        registry: &Registry,
        ledger: Arc<AddressLedger>,
    ) -> Result<Self> {
        config.validate()?;

        let mut schedulers = BTreeMap::new();
        for (name, notifier_config) in &config.notifiers {
            let notifier = registry.create_notifier(name, notifier_config)?;
            let scheduler = NotifyScheduler::from_config(name.clone(), notifier, notifier_config)?;
            schedulers.insert(name.clone(), scheduler);
        }

        let mut engines = BTreeMap::new();
        for (name, updater_config) in &config.updaters {
            let updater = registry.create_updater(name, updater_config)?;
            let engine = PublishRetryEngine::new(name.clone(), updater, ledger.clone())?;

            engine.initial_update().await;

            // Each family is attached on its own; IPv4 and IPv6 may come from
            // different notifiers
            if let Some(notifier) = config.ipv4_notifier_for(updater_config) {
                if engine.capabilities().ipv4 {
                    lookup(&schedulers, name, notifier)?
                        .attach_ipv4_callback(engine.ipv4_callback())?;
                } else {
                    info!("Updater {} does not publish IPv4; not attaching", name);
                }
            }
            if let Some(notifier) = config.ipv6_notifier_for(updater_config) {
                if engine.capabilities().ipv6 {
                    lookup(&schedulers, name, notifier)?
                        .attach_ipv6_callback(engine.ipv6_callback())?;
                } else {
                    info!("Updater {} does not publish IPv6; not attaching", name);
                }
            }

            engines.insert(name.clone(), engine);
        }

        schedulers.retain(|name, scheduler| {
            let used = scheduler.dispatcher().has_subscribers();
            if !used {
                warn!("Notifier {} not attached to any updater", name);
            }
            used
        });

        Ok(Self {
            ledger,
            schedulers,
            engines,
        })
    }

    pub fn ledger(&self) -> &Arc<AddressLedger> {
        &self.ledger
    }

    /// Names of the notifiers in use
    pub fn notifier_names(&self) -> Vec<&str> {
        self.schedulers.keys().map(String::as_str).collect()
    }

    pub fn scheduler(&self, name: &str) -> Option<&NotifyScheduler> {
        self.schedulers.get(name)
    }

    pub fn engine(&self, name: &str) -> Option<&PublishRetryEngine> {
        self.engines.get(name)
    }

    /// Start every notifier
    ///
    /// # Errors
    ///
    /// If one notifier fails to start, all are stopped and its
    /// [`Error::NotifierSetup`] is returned.
    pub async fn start(&self) -> Result<()> {
        info!("Starting all notifiers...");
        for (name, scheduler) in &self.schedulers {
            if let Err(e) = scheduler.start().await {
                error!(
                    "Notifier {} failed to start. Stopping all notifiers.",
                    name
                );
                self.stop().await;
                return Err(e);
            }
        }
        info!("All notifiers started.");
        Ok(())
    }

    /// On-demand check of every notifier
    ///
    /// Never fails; problems are logged.
    pub async fn do_notify(&self) {
        info!("Checking once for all notifiers...");
        for (name, scheduler) in &self.schedulers {
            if let Err(e) = scheduler.do_notify().await {
                warn!("On-demand check of notifier {} failed: {}", name, e);
            }
        }
        info!("Check for all notifiers complete.");
    }

    /// Stop every notifier and cancel pending publish retries
    ///
    /// Never fails, even if not started.
    pub async fn stop(&self) {
        info!("Stopping all notifiers...");
        for scheduler in self.schedulers.values() {
            scheduler.stop().await;
        }
        for engine in self.engines.values() {
            engine.stop().await;
        }
        info!("All notifiers stopped.");
    }
}

fn lookup<'a>(
    schedulers: &'a BTreeMap<String, NotifyScheduler>,
    updater: &str,
    notifier: &str,
) -> Result<&'a NotifyScheduler> {
    schedulers.get(notifier).ok_or_else(|| {
        Error::config(format!(
            "Updater {} references unknown notifier {}",
            updater, notifier
        ))
    })
}
