//! Subscriber callbacks and the per-notifier family policy

use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error, info};

use crate::address::Ipv6Prefix;
use crate::config::NotifierConfig;
use crate::error::{Error, Result};
use crate::traits::NotifierCapabilities;

/// Future returned by an [`AddressCallback`]
pub type AddressFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A subscriber to one address family of a notifier
///
/// The callback is awaited on the notifier's scheduling path, so it should
/// do its own retry scheduling instead of blocking.
pub type AddressCallback<A> = Arc<dyn Fn(A) -> AddressFuture + Send + Sync>;

/// Wrap an async closure as an [`AddressCallback`]
pub fn callback<A, F, Fut>(f: F) -> AddressCallback<A>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |address| Box::pin(f(address)) as AddressFuture)
}

/// Which families a notifier notifies and which must be found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyPolicy {
    pub skip_ipv4: bool,
    pub skip_ipv6: bool,
    pub ipv4_required: bool,
    pub ipv6_required: bool,
}

impl Default for FamilyPolicy {
    fn default() -> Self {
        Self {
            skip_ipv4: false,
            skip_ipv6: false,
            ipv4_required: true,
            ipv6_required: false,
        }
    }
}

impl FamilyPolicy {
    /// Read and validate the policy from a notifier config
    pub fn from_config(name: &str, config: &NotifierConfig) -> Result<Self> {
        config.validate(name)?;
        Ok(Self {
            skip_ipv4: config.skip_ipv4,
            skip_ipv6: config.skip_ipv6,
            ipv4_required: config.ipv4_required(),
            ipv6_required: config.ipv6_required,
        })
    }
}

/// Fan-out of discovered addresses to attached callbacks
///
/// One per notifier. Notifiers receive a reference in
/// [`Notifier::check_once`](crate::Notifier::check_once) and call
/// [`notify_ipv4`](Self::notify_ipv4) / [`notify_ipv6`](Self::notify_ipv6).
pub struct Dispatcher {
    name: String,
    policy: FamilyPolicy,
    capabilities: NotifierCapabilities,
    ipv4: RwLock<Vec<AddressCallback<Ipv4Addr>>>,
    ipv6: RwLock<Vec<AddressCallback<Ipv6Prefix>>>,
    notify_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("ipv4_callbacks", &read(&self.ipv4).len())
            .field("ipv6_callbacks", &read(&self.ipv6).len())
            .finish()
    }
}

fn read<T: Clone>(lock: &RwLock<Vec<T>>) -> Vec<T> {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

impl Dispatcher {
    pub fn new(
        name: impl Into<String>,
        policy: FamilyPolicy,
        capabilities: NotifierCapabilities,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            capabilities,
            ipv4: RwLock::new(Vec::new()),
            ipv6: RwLock::new(Vec::new()),
            notify_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Name of the owning notifier
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> FamilyPolicy {
        self.policy
    }

    /// Attach an IPv4 subscriber
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: attached
    /// - `Ok(false)`: IPv4 is skipped for this notifier
    /// - `Err(Error::Config)`: the notifier lacks the configuration for IPv4
    pub fn attach_ipv4(&self, callback: AddressCallback<Ipv4Addr>) -> Result<bool> {
        if self.policy.skip_ipv4 {
            info!(
                "Not attaching updater to notifier {} for skipped IPv4",
                self.name
            );
            return Ok(false);
        }
        if !self.capabilities.ipv4 {
            error!("Notifier {} lacks the configuration for IPv4", self.name);
            return Err(Error::config(format!(
                "Notifier {} cannot be an IPv4 notifier without required IPv4 config",
                self.name
            )));
        }
        self.ipv4
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
        Ok(true)
    }

    /// Attach an IPv6 subscriber; see [`attach_ipv4`](Self::attach_ipv4)
    pub fn attach_ipv6(&self, callback: AddressCallback<Ipv6Prefix>) -> Result<bool> {
        if self.policy.skip_ipv6 {
            info!(
                "Not attaching updater to notifier {} for skipped IPv6",
                self.name
            );
            return Ok(false);
        }
        if !self.capabilities.ipv6 {
            error!("Notifier {} lacks the configuration for IPv6", self.name);
            return Err(Error::config(format!(
                "Notifier {} cannot be an IPv6 notifier without required IPv6 config",
                self.name
            )));
        }
        self.ipv6
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
        Ok(true)
    }

    /// Whether any IPv4 subscriber is attached
    pub fn want_ipv4(&self) -> bool {
        !self.ipv4.read().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    /// Whether any IPv6 subscriber is attached
    pub fn want_ipv6(&self) -> bool {
        !self.ipv6.read().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    /// Whether a check that finds no IPv4 address must fail
    pub fn need_ipv4(&self) -> bool {
        self.want_ipv4() && self.policy.ipv4_required
    }

    /// Whether a check that finds no IPv6 prefix must fail
    pub fn need_ipv6(&self) -> bool {
        self.want_ipv6() && self.policy.ipv6_required
    }

    /// Whether any subscriber of either family is attached
    pub fn has_subscribers(&self) -> bool {
        self.want_ipv4() || self.want_ipv6()
    }

    /// Deliver an IPv4 address to every IPv4 subscriber, in attach order
    pub async fn notify_ipv4(&self, address: Ipv4Addr) {
        let _guard = self.notify_lock.lock().await;
        let callbacks = read(&self.ipv4);
        if callbacks.is_empty() {
            debug!("Notifier {} has no IPv4 subscribers", self.name);
            return;
        }

        info!("Notifier {} notifying IPv4 address {}", self.name, address);
        for callback in callbacks {
            callback(address).await;
        }
    }

    /// Deliver an IPv6 prefix to every IPv6 subscriber, in attach order
    pub async fn notify_ipv6(&self, prefix: Ipv6Prefix) {
        let _guard = self.notify_lock.lock().await;
        let callbacks = read(&self.ipv6);
        if callbacks.is_empty() {
            debug!("Notifier {} has no IPv6 subscribers", self.name);
            return;
        }

        info!("Notifier {} notifying IPv6 prefix {}", self.name, prefix);
        for callback in callbacks {
            callback(prefix).await;
        }
    }
}
