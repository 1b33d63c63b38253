// # Notifier Trait
//
// A notifier is a source of address information for one or both families:
// a polled web service, a static configuration, an interface watcher.
//
// The notifier itself only knows how to perform *one* check. Scheduling,
// retries and polling are owned by the `NotifyScheduler` wrapping it.
//
// ## Usage
//
// ```rust,ignore
// use ruddr_core::{CheckError, Dispatcher, Notifier, NotifierCapabilities};
//
// struct Fixed(std::net::Ipv4Addr);
//
// #[async_trait::async_trait]
// impl Notifier for Fixed {
//     fn capabilities(&self) -> NotifierCapabilities {
//         NotifierCapabilities { ipv4: true, ipv6: false, on_demand: true }
//     }
//
//     async fn check_once(&self, dispatcher: &Dispatcher) -> Result<(), CheckError> {
//         dispatcher.notify_ipv4(self.0).await;
//         Ok(())
//     }
// }
// ```

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{CheckIntervals, NotifierConfig};
use crate::error::{CheckError, Result};
use crate::scheduler::{CheckTrigger, Dispatcher};

/// What a notifier instance can do
///
/// Queried by the scheduler and the binding layer instead of calling a hook
/// and interpreting failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotifierCapabilities {
    /// Has the configuration needed to provide IPv4 addresses
    pub ipv4: bool,
    /// Has the configuration needed to provide IPv6 prefixes
    pub ipv6: bool,
    /// `check_once` can be called at any time (startup, on demand, on timer)
    pub on_demand: bool,
}

/// Trait for notifier implementations
///
/// Implementations must be thread-safe; the scheduler never runs two
/// `check_once` calls for the same instance concurrently.
///
/// # Responsibilities
///
/// - Probe the current address(es) and hand them to the [`Dispatcher`]
/// - Decide whether a result counts as a failure (see
///   [`Dispatcher::need_ipv4`] / [`Dispatcher::need_ipv6`])
///
/// Notifiers must not sleep or retry internally. Return
/// [`CheckError::Failed`] and the scheduler retries with backoff.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Capability set of this instance
    fn capabilities(&self) -> NotifierCapabilities;

    /// Scheduling intervals used unless overridden by configuration
    fn default_intervals(&self) -> CheckIntervals {
        CheckIntervals::event_driven()
    }

    /// Called once when the scheduler starts
    ///
    /// Event-driven notifiers can keep `trigger` and call
    /// [`CheckTrigger::check`] whenever the address may have changed.
    ///
    /// # Errors
    ///
    /// Any error aborts startup of this notifier.
    async fn setup(&self, _trigger: CheckTrigger) -> Result<()> {
        Ok(())
    }

    /// Called when the scheduler stops
    async fn teardown(&self) {}

    /// Perform one check and notify whatever was found
    ///
    /// # Returns
    ///
    /// - `Ok(())`: check succeeded
    /// - `Err(CheckError::Failed)`: transient failure, retried with backoff
    /// - `Err(CheckError::Unsupported)`: this source cannot be checked on
    ///   demand; nothing is scheduled
    async fn check_once(&self, dispatcher: &Dispatcher) -> std::result::Result<(), CheckError>;
}

/// Helper trait for constructing notifiers from configuration
pub trait NotifierFactory: Send + Sync {
    /// Create a notifier named `name` from its configuration
    ///
    /// # Errors
    ///
    /// [`Error::Config`](crate::Error::Config) for missing or invalid
    /// options.
    fn create(&self, name: &str, config: &NotifierConfig) -> Result<Arc<dyn Notifier>>;
}
