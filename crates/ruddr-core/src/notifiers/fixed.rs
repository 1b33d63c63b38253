//! Notifier for addresses fixed in the configuration
//!
//! Useful when the public address never changes but the DNS records still
//! need to be (re)published, and for testing updaters.
//!
//! ```json
//! {"type": "static", "ipv4": "203.0.113.7", "ipv6": "2001:db8:1:2::/64"}
//! ```

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::address::Ipv6Prefix;
use crate::config::NotifierConfig;
use crate::error::{CheckError, Error, Result};
use crate::scheduler::Dispatcher;
use crate::traits::{Notifier, NotifierCapabilities, NotifierFactory};

/// Notifies the configured address(es) on every check
#[derive(Debug, Clone)]
pub struct StaticNotifier {
    name: String,
    ipv4: Option<Ipv4Addr>,
    ipv6: Option<Ipv6Prefix>,
}

impl StaticNotifier {
    /// Create a static notifier
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if neither address is given.
    pub fn new(
        name: impl Into<String>,
        ipv4: Option<Ipv4Addr>,
        ipv6: Option<Ipv6Prefix>,
    ) -> Result<Self> {
        let name = name.into();
        if ipv4.is_none() && ipv6.is_none() {
            return Err(Error::config(format!(
                "{} notifier requires either an IPv4 or IPv6 address configured",
                name
            )));
        }
        Ok(Self { name, ipv4, ipv6 })
    }

    /// Build from the `ipv4`/`ipv6` options of `config`
    pub fn from_config(name: &str, config: &NotifierConfig) -> Result<Self> {
        let ipv4 = config
            .option_str("ipv4")?
            .map(|text| {
                text.parse::<Ipv4Addr>().map_err(|_| {
                    Error::config(format!(
                        "{} notifier contains invalid address for 'ipv4' option",
                        name
                    ))
                })
            })
            .transpose()?;

        let ipv6 = config
            .option_str("ipv6")?
            .map(|text| {
                // The prefix length must be spelled out
                if !text.contains('/') {
                    return Err(Error::config(format!(
                        "{} notifier 'ipv6' option needs a prefix length, e.g. 2001:db8::/64",
                        name
                    )));
                }
                text.parse::<Ipv6Prefix>().map_err(|_| {
                    Error::config(format!(
                        "{} notifier contains invalid address or prefix for 'ipv6' option",
                        name
                    ))
                })
            })
            .transpose()?;

        Self::new(name, ipv4, ipv6)
    }
}

#[async_trait]
impl Notifier for StaticNotifier {
    fn capabilities(&self) -> NotifierCapabilities {
        NotifierCapabilities {
            ipv4: self.ipv4.is_some(),
            ipv6: self.ipv6.is_some(),
            on_demand: true,
        }
    }

    async fn check_once(&self, dispatcher: &Dispatcher) -> std::result::Result<(), CheckError> {
        tracing::debug!("Static notifier {} checking", self.name);

        // The dispatcher only accepts subscribers for configured families
        if let Some(address) = self.ipv4
            && dispatcher.want_ipv4()
        {
            dispatcher.notify_ipv4(address).await;
        }
        if let Some(prefix) = self.ipv6
            && dispatcher.want_ipv6()
        {
            dispatcher.notify_ipv6(prefix).await;
        }
        Ok(())
    }
}

/// Factory for `"type": "static"`
pub struct StaticNotifierFactory;

impl NotifierFactory for StaticNotifierFactory {
    fn create(&self, name: &str, config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
        Ok(Arc::new(StaticNotifier::from_config(name, config)?))
    }
}
