//! Publish engine for one updater
//!
//! The [`PublishRetryEngine`] turns a delivered address into a confirmed
//! publish:
//!
//! 1. Consult the [`AddressLedger`]; skip if this exact address is current
//! 2. Invalidate the ledger entry (crash during publish stays pessimistic)
//! 3. Call the updater once
//! 4. On success, commit the address as current
//!
//! ## Outcomes
//!
//! ```text
//!                 ┌─ Ok ────────► ledger (addr, true)
//! update(addr) ───┼─ Failed ────► retry after min * 2^n (cap 1 day)
//!                 ├─ Fatal ─────► halt engine (both families, for good)
//!                 └─ Unsupported ► nothing
//! ```
//!
//! Ledger write failures count as fatal: publishing on while the stored and
//! real state may have diverged could lose an update.
//!
//! ## Coalescing and stale retries
//!
//! Each family keeps its own retry state. A second `update` with the address
//! a retry is already pending for does nothing. A different address bumps
//! the sequence number, so the pending retry finds itself stale when it
//! fires and does nothing either.

use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::address::{FamilyAddress, Ipv6Prefix};
use crate::error::{Error, PublishError, Result};
use crate::ledger::AddressLedger;
use crate::retry::backoff_delay;
use crate::scheduler::{AddressCallback, callback};
use crate::traits::{Updater, UpdaterCapabilities};

/// Upper bound for the retry delay
pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(86400);

/// Retry/publish state machine wrapping one [`Updater`]
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct PublishRetryEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    name: String,
    updater: Arc<dyn Updater>,
    capabilities: UpdaterCapabilities,
    ledger: Arc<AddressLedger>,
    min_retry: Duration,
    halted: AtomicBool,
    ipv4: Mutex<RetryState<Ipv4Addr>>,
    ipv6: Mutex<RetryState<Ipv6Prefix>>,
}

struct RetryState<A> {
    last: Option<A>,
    retrying: bool,
    seq: u64,
    retries: u32,
    timer: Option<JoinHandle<()>>,
}

impl<A> Default for RetryState<A> {
    fn default() -> Self {
        Self {
            last: None,
            retrying: false,
            seq: 0,
            retries: 0,
            timer: None,
        }
    }
}

/// Per-family plumbing so the state machine is written once
trait EngineFamily: FamilyAddress {
    fn state(inner: &EngineInner) -> &Mutex<RetryState<Self>>;

    fn supported(capabilities: &UpdaterCapabilities) -> bool;

    fn publish<'a>(
        self,
        updater: &'a dyn Updater,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), PublishError>> + Send + 'a>>;
}

impl EngineFamily for Ipv4Addr {
    fn state(inner: &EngineInner) -> &Mutex<RetryState<Self>> {
        &inner.ipv4
    }

    fn supported(capabilities: &UpdaterCapabilities) -> bool {
        capabilities.ipv4
    }

    fn publish<'a>(
        self,
        updater: &'a dyn Updater,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), PublishError>> + Send + 'a>> {
        updater.publish_ipv4(self)
    }
}

impl EngineFamily for Ipv6Prefix {
    fn state(inner: &EngineInner) -> &Mutex<RetryState<Self>> {
        &inner.ipv6
    }

    fn supported(capabilities: &UpdaterCapabilities) -> bool {
        capabilities.ipv6
    }

    fn publish<'a>(
        self,
        updater: &'a dyn Updater,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), PublishError>> + Send + 'a>> {
        updater.publish_ipv6(self)
    }
}

impl PublishRetryEngine {
    /// Create an engine publishing through `updater` and recording in
    /// `ledger` under `name`
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the updater's minimum retry interval is zero.
    pub fn new(
        name: impl Into<String>,
        updater: Arc<dyn Updater>,
        ledger: Arc<AddressLedger>,
    ) -> Result<Self> {
        let name = name.into();
        let min_retry = updater.min_retry_interval();
        if min_retry.is_zero() {
            return Err(Error::config(format!(
                "Updater {}: minimum retry interval must be > 0",
                name
            )));
        }

        Ok(Self {
            inner: Arc::new(EngineInner {
                name,
                capabilities: updater.capabilities(),
                updater,
                ledger,
                min_retry,
                halted: AtomicBool::new(false),
                ipv4: Mutex::new(RetryState::default()),
                ipv6: Mutex::new(RetryState::default()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capabilities(&self) -> UpdaterCapabilities {
        self.inner.capabilities
    }

    /// Whether a fatal error stopped this engine for good
    pub fn is_halted(&self) -> bool {
        self.inner.halted.load(Ordering::SeqCst)
    }

    /// Publish `address` unless already current, retrying on failure
    pub async fn update_ipv4(&self, address: Ipv4Addr) {
        self.inner.update(address).await;
    }

    /// Publish `prefix` unless already current, retrying on failure
    pub async fn update_ipv6(&self, prefix: Ipv6Prefix) {
        self.inner.update(prefix).await;
    }

    /// [`update_ipv4`](Self::update_ipv4) as a notifier callback
    pub fn ipv4_callback(&self) -> AddressCallback<Ipv4Addr> {
        let engine = self.clone();
        callback(move |address: Ipv4Addr| {
            let engine = engine.clone();
            async move { engine.update_ipv4(address).await }
        })
    }

    /// [`update_ipv6`](Self::update_ipv6) as a notifier callback
    pub fn ipv6_callback(&self) -> AddressCallback<Ipv6Prefix> {
        let engine = self.clone();
        callback(move |prefix: Ipv6Prefix| {
            let engine = engine.clone();
            async move { engine.update_ipv6(prefix).await }
        })
    }

    /// Retry publishes left unconfirmed by a previous run
    ///
    /// For each family whose ledger entry is not current but names an
    /// address, run [`update`](Self::update_ipv4) with that address.
    pub async fn initial_update(&self) {
        let ipv4 = self.inner.ledger.get::<Ipv4Addr>(&self.inner.name).await;
        if !ipv4.current
            && let Some(address) = ipv4.address
        {
            info!(
                "Updater {} retrying unconfirmed IPv4 address {} from last run",
                self.inner.name, address
            );
            self.update_ipv4(address).await;
        }

        let ipv6 = self.inner.ledger.get::<Ipv6Prefix>(&self.inner.name).await;
        if !ipv6.current
            && let Some(prefix) = ipv6.address
        {
            info!(
                "Updater {} retrying unconfirmed IPv6 prefix {} from last run",
                self.inner.name, prefix
            );
            self.update_ipv6(prefix).await;
        }
    }

    /// Cancel pending retries
    ///
    /// A retry already waiting on the engine lock finds itself stale.
    pub async fn stop(&self) {
        self.inner.cancel::<Ipv4Addr>().await;
        self.inner.cancel::<Ipv6Prefix>().await;
    }
}

impl EngineInner {
    async fn update<A: EngineFamily>(self: &Arc<Self>, address: A) {
        if self.halted.load(Ordering::SeqCst) {
            warn!(
                "Updater {} is halted; ignoring {} update to {}",
                self.name,
                A::FAMILY,
                address
            );
            return;
        }

        let mut state = A::state(self).lock().await;
        if state.retrying && state.last == Some(address) {
            debug!(
                "Updater {} already retrying {} {}; not starting another",
                self.name,
                A::FAMILY,
                address
            );
            return;
        }

        state.seq += 1;
        state.retries = 0;
        state.last = Some(address);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        self.attempt(&mut state, address).await;
    }

    async fn retry<A: EngineFamily>(self: &Arc<Self>, seq: u64) {
        let mut state = A::state(self).lock().await;
        if state.seq != seq {
            debug!(
                "Updater {} {} retry is stale (seq {}, current {})",
                self.name,
                A::FAMILY,
                seq,
                state.seq
            );
            return;
        }

        // The handle in `timer` is this task
        state.timer = None;
        let Some(address) = state.last else {
            return;
        };
        self.attempt(&mut state, address).await;
    }

    async fn attempt<A: EngineFamily>(self: &Arc<Self>, state: &mut RetryState<A>, address: A) {
        match self.publish_once(address).await {
            Ok(()) | Err(PublishError::Unsupported) => {
                state.retrying = false;
                state.retries = 0;
            }
            Err(PublishError::Fatal(reason)) => {
                state.retrying = false;
                self.halted.store(true, Ordering::SeqCst);
                error!(
                    "Updater {} halted after fatal error publishing {} {}: {}. \
                     No further updates will be attempted until restart.",
                    self.name,
                    A::FAMILY,
                    address,
                    reason
                );
            }
            Err(PublishError::Failed(_)) => {
                let delay = backoff_delay(self.min_retry, state.retries, MAX_RETRY_INTERVAL);
                state.retries = state.retries.saturating_add(1);
                state.retrying = true;
                info!(
                    "Updater {} retrying {} {} in {}s",
                    self.name,
                    A::FAMILY,
                    address,
                    delay.as_secs()
                );
                self.schedule_retry(state, delay);
            }
        }
    }

    /// One pass of the ledger protocol around a single publish call
    async fn publish_once<A: EngineFamily>(
        &self,
        address: A,
    ) -> std::result::Result<(), PublishError> {
        if self.halted.load(Ordering::SeqCst) {
            debug!("Updater {} is halted; not publishing", self.name);
            return Ok(());
        }

        if !A::supported(&self.capabilities) {
            debug!("Updater {} does not publish {}", self.name, A::FAMILY);
            return Err(PublishError::Unsupported);
        }

        if !self.ledger.needs_update(&self.name, Some(address)).await {
            info!(
                "Updater {}: {} {} is already current; skipping",
                self.name,
                A::FAMILY,
                address
            );
            return Ok(());
        }

        if let Err(e) = self.ledger.invalidate(&self.name, Some(address)).await {
            error!(
                "Updater {} could not invalidate ledger before publishing: {}",
                self.name, e
            );
            return Err(PublishError::fatal(e.to_string()));
        }

        match address.publish(self.updater.as_ref()).await {
            Ok(()) => {}
            Err(PublishError::Unsupported) => {
                warn!(
                    "Updater {} claims {} support but refused {}",
                    self.name,
                    A::FAMILY,
                    address
                );
                return Err(PublishError::Unsupported);
            }
            Err(e) => {
                error!(
                    "Updater {} failed to publish {} {}: {}",
                    self.name,
                    A::FAMILY,
                    address,
                    e
                );
                return Err(e);
            }
        }

        if let Err(e) = self.ledger.set(&self.name, Some(address)).await {
            error!(
                "Updater {} published {} but could not record it: {}",
                self.name, address, e
            );
            return Err(PublishError::fatal(e.to_string()));
        }

        info!("Updater {} published {} {}", self.name, A::FAMILY, address);
        Ok(())
    }

    /// Schedule a retry after `delay` for the current sequence number
    fn schedule_retry<A: EngineFamily>(self: &Arc<Self>, state: &mut RetryState<A>, delay: Duration) {
        let seq = state.seq;
        let inner = self.clone();
        // Never abort the previous handle here: it may be the running task
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.retry::<A>(seq).await;
        }));
    }

    async fn cancel<A: EngineFamily>(&self) {
        let mut state = A::state(self).lock().await;
        state.seq += 1;
        state.retrying = false;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}
