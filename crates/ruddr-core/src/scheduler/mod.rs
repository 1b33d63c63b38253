//! Timer-driven check scheduling for one notifier
//!
//! The [`NotifyScheduler`] owns a [`Notifier`] and drives its
//! [`check_once`](Notifier::check_once): once at start, on demand, after a
//! failure (exponential backoff), and optionally on a fixed polling interval
//! after success.
//!
//! ## Stale timers
//!
//! Every externally triggered check bumps a sequence number. A timer carries
//! the sequence number current when it was armed and, once it fires, only
//! runs if that number is still current. Aborting a pending timer is best
//! effort (it may already be waiting on the lock); the sequence comparison,
//! done under the scheduler lock, is what keeps a superseded timer from
//! running a second check.
//!
//! ```text
//! check() ──► seq += 1, retries = 0 ──► check_once ──┬─ Ok ──────► arm(success_interval)
//!                                                    ├─ Failed ──► arm(backoff), retries += 1
//! timer(seq) ──► seq current? ──no──► no-op          └─ Unsupported ─► nothing
//!                    │yes
//!                    └──► check_once (seq/retries kept)
//! ```

mod dispatch;

pub use dispatch::{callback, AddressCallback, AddressFuture, Dispatcher, FamilyPolicy};

use std::net::Ipv4Addr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::address::Ipv6Prefix;
use crate::config::{CheckIntervals, NotifierConfig};
use crate::error::{CheckError, Error, Result};
use crate::retry::backoff_delay;
use crate::traits::{Notifier, NotifierCapabilities};

/// Drives one notifier's checks
///
/// Cheap to clone; clones share the same scheduler.
#[derive(Clone)]
pub struct NotifyScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    name: String,
    notifier: Arc<dyn Notifier>,
    capabilities: NotifierCapabilities,
    intervals: CheckIntervals,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    started: bool,
    seq: u64,
    retries: u32,
    timer: Option<JoinHandle<()>>,
}

/// Handle given to a notifier at setup to request checks of itself
///
/// Holds no strong reference: once the scheduler is dropped, requests are
/// ignored.
#[derive(Clone)]
pub struct CheckTrigger {
    inner: Weak<SchedulerInner>,
}

impl CheckTrigger {
    /// Request a check in the background
    ///
    /// Same as [`NotifyScheduler::check`], including resetting the retry
    /// backoff. Returns immediately.
    pub fn check(&self) {
        if let Some(inner) = self.inner.upgrade() {
            tokio::spawn(async move { inner.check().await });
        }
    }

    /// The dispatcher of the scheduler, for notifiers that deliver addresses
    /// straight from their own event source instead of through `check_once`
    pub fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        self.inner.upgrade().map(|inner| inner.dispatcher.clone())
    }
}

impl NotifyScheduler {
    /// Create a scheduler for `notifier`
    ///
    /// Nothing runs until [`start`](Self::start).
    pub fn new(
        name: impl Into<String>,
        notifier: Arc<dyn Notifier>,
        policy: FamilyPolicy,
        intervals: CheckIntervals,
    ) -> Self {
        let name = name.into();
        let capabilities = notifier.capabilities();
        let dispatcher = Arc::new(Dispatcher::new(name.clone(), policy, capabilities));

        Self {
            inner: Arc::new(SchedulerInner {
                name,
                notifier,
                capabilities,
                intervals,
                dispatcher,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Create a scheduler using the family policy and interval overrides in
    /// `config` on top of the notifier's defaults
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an invalid policy or invalid intervals.
    pub fn from_config(
        name: impl Into<String>,
        notifier: Arc<dyn Notifier>,
        config: &NotifierConfig,
    ) -> Result<Self> {
        let name = name.into();
        let policy = FamilyPolicy::from_config(&name, config)?;
        let intervals = notifier.default_intervals().with_overrides(&name, config)?;
        Ok(Self::new(name, notifier, policy, intervals))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn intervals(&self) -> CheckIntervals {
        self.inner.intervals
    }

    pub fn capabilities(&self) -> NotifierCapabilities {
        self.inner.capabilities
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    /// Subscribe to IPv4 addresses from this notifier
    ///
    /// See [`Dispatcher::attach_ipv4`].
    pub fn attach_ipv4_callback(&self, callback: AddressCallback<Ipv4Addr>) -> Result<bool> {
        self.inner.dispatcher.attach_ipv4(callback)
    }

    /// Subscribe to IPv6 prefixes from this notifier
    ///
    /// See [`Dispatcher::attach_ipv6`].
    pub fn attach_ipv6_callback(&self, callback: AddressCallback<Ipv6Prefix>) -> Result<bool> {
        self.inner.dispatcher.attach_ipv6(callback)
    }

    pub async fn is_started(&self) -> bool {
        self.inner.state.lock().await.started
    }

    /// Run the notifier's setup hook, then the first check in the background
    ///
    /// Starting an already started scheduler logs a warning and does
    /// nothing.
    ///
    /// # Errors
    ///
    /// [`Error::NotifierSetup`] if the setup hook fails. The scheduler stays
    /// stopped.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.started {
            warn!("Not starting notifier {}: already started", self.inner.name);
            return Ok(());
        }

        let trigger = CheckTrigger {
            inner: Arc::downgrade(&self.inner),
        };
        self.inner
            .notifier
            .setup(trigger)
            .await
            .map_err(|e| Error::notifier_setup(format!("{}: {}", self.inner.name, e)))?;

        state.started = true;
        info!("Notifier {} started", self.inner.name);
        drop(state);

        if self.inner.capabilities.on_demand {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.check().await });
        } else {
            info!(
                "Not doing an immediate check as notifier {} does not support it",
                self.inner.name
            );
        }

        Ok(())
    }

    /// Check now, superseding any pending retry or poll
    ///
    /// Resets the retry backoff. Ignored when not started.
    pub async fn check(&self) {
        self.inner.check().await;
    }

    /// On-demand check
    ///
    /// A silent no-op for notifiers that cannot check on demand.
    ///
    /// # Errors
    ///
    /// [`Error::NotStarted`] if the scheduler is not started.
    pub async fn do_notify(&self) -> Result<()> {
        if !self.is_started().await {
            tracing::error!("Tried to do_notify notifier {} when not started", self.inner.name);
            return Err(Error::NotStarted(self.inner.name.clone()));
        }

        if !self.inner.capabilities.on_demand {
            info!(
                "Notifier {} does not support on-demand notifications",
                self.inner.name
            );
            return Ok(());
        }

        self.inner.check().await;
        Ok(())
    }

    /// Cancel pending timers and run the teardown hook
    ///
    /// Safe to call repeatedly or before [`start`](Self::start).
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        if !state.started {
            debug!("Not stopping notifier {}: not started", self.inner.name);
            return;
        }

        info!("Stopping notifier {}", self.inner.name);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        self.inner.notifier.teardown().await;
        state.started = false;
    }
}

impl SchedulerInner {
    async fn check(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if !state.started {
            debug!("Notifier {} not started; ignoring check", self.name);
            return;
        }

        state.seq += 1;
        state.retries = 0;
        // Holding the lock, so a pending timer is at most waiting on it
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        debug!("Notifier {} check (seq {})", self.name, state.seq);
        self.check_and_schedule(&mut state).await;
    }

    async fn scheduled_check(self: &Arc<Self>, seq: u64) {
        let mut state = self.state.lock().await;
        if !state.started {
            debug!("Notifier {} stopped; dropping scheduled check", self.name);
            return;
        }
        if state.seq != seq {
            debug!(
                "Notifier {} scheduled check is stale (seq {}, current {})",
                self.name, seq, state.seq
            );
            return;
        }

        // The handle in `timer` is this task
        state.timer = None;
        debug!("Notifier {} scheduled check (seq {})", self.name, seq);
        self.check_and_schedule(&mut state).await;
    }

    async fn check_and_schedule(self: &Arc<Self>, state: &mut SchedulerState) {
        match self.notifier.check_once(&self.dispatcher).await {
            Ok(()) => {
                state.retries = 0;
                let success = self.intervals.success();
                if !success.is_zero() {
                    debug!(
                        "Notifier {} next check in {}s",
                        self.name,
                        success.as_secs()
                    );
                    self.arm(state, success);
                }
            }
            Err(CheckError::Unsupported) => {
                debug!("Notifier {} does not support checks", self.name);
            }
            Err(CheckError::Failed(reason)) => {
                let delay = backoff_delay(
                    self.intervals.retry_min(),
                    state.retries,
                    self.intervals.retry_max(),
                );
                state.retries = state.retries.saturating_add(1);
                info!(
                    "Notifier {} check failed: {}. Retrying in {}s",
                    self.name,
                    reason,
                    delay.as_secs()
                );
                self.arm(state, delay);
            }
        }
    }

    /// Schedule a check after `delay` for the current sequence number
    fn arm(self: &Arc<Self>, state: &mut SchedulerState, delay: Duration) {
        let seq = state.seq;
        let inner = self.clone();
        // Never abort the previous handle here: it may be the running task
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.scheduled_check(seq).await;
        }));
    }
}
