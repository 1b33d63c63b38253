// # Updater Trait
//
// An updater publishes addresses to one DNS backend. Each publish method is
// a single network attempt: no retries, no sleeping, no ledger access. The
// `PublishRetryEngine` wrapping the updater owns all of that.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use crate::address::Ipv6Prefix;
use crate::config::UpdaterConfig;
use crate::error::{PublishError, Result};

/// Address families an updater instance publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdaterCapabilities {
    pub ipv4: bool,
    pub ipv6: bool,
}

/// Trait for updater implementations
///
/// # Outcomes
///
/// - `Ok(())`: the backend confirmed the address
/// - [`PublishError::Failed`]: transient (network, server busy); retried
/// - [`PublishError::Fatal`]: permanent (bad credentials, unknown host);
///   the engine halts and never calls this updater again
/// - [`PublishError::Unsupported`]: this family is not handled
#[async_trait]
pub trait Updater: Send + Sync {
    /// Families this instance publishes
    fn capabilities(&self) -> UpdaterCapabilities;

    /// First retry delay after a transient failure
    fn min_retry_interval(&self) -> Duration {
        Duration::from_secs(300)
    }

    /// Publish a new IPv4 address
    async fn publish_ipv4(&self, _address: Ipv4Addr) -> std::result::Result<(), PublishError> {
        Err(PublishError::Unsupported)
    }

    /// Publish a new IPv6 prefix
    async fn publish_ipv6(&self, _prefix: Ipv6Prefix) -> std::result::Result<(), PublishError> {
        Err(PublishError::Unsupported)
    }
}

/// Helper trait for constructing updaters from configuration
pub trait UpdaterFactory: Send + Sync {
    /// Create an updater named `name` from its configuration
    fn create(&self, name: &str, config: &UpdaterConfig) -> Result<Arc<dyn Updater>>;
}
