//! Test doubles and common utilities for contract tests
//!
//! - [`ScriptedNotifier`]: check outcomes played from a script, with the
//!   virtual time of every call recorded
//! - [`RecordingUpdater`]: publish outcomes played from a script, recording
//!   each call and the ledger entry visible while it runs
//! - [`InFlight`]: counts overlapping calls of a slow double

#![allow(dead_code)]

use async_trait::async_trait;
use ruddr_core::config::{NotifierConfig, UpdaterConfig};
use ruddr_core::{
    AddressLedger, CheckError, CheckTrigger, Dispatcher, Ipv6Prefix, LedgerEntry, Notifier,
    NotifierCapabilities, NotifierFactory, PublishError, Result, Updater, UpdaterCapabilities,
    UpdaterFactory,
};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Tracks how many calls run at the same time
#[derive(Default)]
pub struct InFlight {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    /// Highest number of overlapping calls seen
    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// A notifier whose check outcomes come from a script
///
/// Once the script runs out every check succeeds. A successful check
/// notifies the configured IPv4 address, if any.
pub struct ScriptedNotifier {
    capabilities: NotifierCapabilities,
    script: Mutex<VecDeque<std::result::Result<(), CheckError>>>,
    calls: Mutex<Vec<Instant>>,
    ipv4: Mutex<Option<Ipv4Addr>>,
    fail_setup: AtomicBool,
    setup_calls: AtomicUsize,
    teardown_calls: AtomicUsize,
    delay: Duration,
    in_flight: InFlight,
}

impl ScriptedNotifier {
    pub fn new() -> Self {
        Self {
            capabilities: NotifierCapabilities {
                ipv4: true,
                ipv6: true,
                on_demand: true,
            },
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            ipv4: Mutex::new(None),
            fail_setup: AtomicBool::new(false),
            setup_calls: AtomicUsize::new(0),
            teardown_calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            in_flight: InFlight::default(),
        }
    }

    /// Every check takes `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    pub fn without_on_demand(mut self) -> Self {
        self.capabilities.on_demand = false;
        self
    }

    pub fn failing_setup(self) -> Self {
        self.fail_setup.store(true, Ordering::SeqCst);
        self
    }

    /// Queue `n` transient failures
    pub fn fail_times(&self, n: usize) {
        let mut script = self.script.lock().unwrap();
        for _ in 0..n {
            script.push_back(Err(CheckError::failed("scripted failure")));
        }
    }

    /// Queue one outcome
    pub fn push(&self, outcome: std::result::Result<(), CheckError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn set_ipv4(&self, address: Ipv4Addr) {
        *self.ipv4.lock().unwrap() = Some(address);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Times of every check, relative to `start`
    pub fn call_offsets(&self, start: Instant) -> Vec<Duration> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.duration_since(start))
            .collect()
    }

    pub fn setup_calls(&self) -> usize {
        self.setup_calls.load(Ordering::SeqCst)
    }

    pub fn teardown_calls(&self) -> usize {
        self.teardown_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for ScriptedNotifier {
    fn capabilities(&self) -> NotifierCapabilities {
        self.capabilities
    }

    async fn setup(&self, _trigger: CheckTrigger) -> Result<()> {
        self.setup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_setup.load(Ordering::SeqCst) {
            return Err(ruddr_core::Error::Other("socket unavailable".to_string()));
        }
        Ok(())
    }

    async fn teardown(&self) {
        self.teardown_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn check_once(&self, dispatcher: &Dispatcher) -> std::result::Result<(), CheckError> {
        self.calls.lock().unwrap().push(Instant::now());
        self.in_flight.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            let address = *self.ipv4.lock().unwrap();
            if let Some(address) = address {
                dispatcher.notify_ipv4(address).await;
            }
        }
        self.in_flight.leave();
        outcome
    }
}

/// Creates [`ScriptedNotifier`]s and keeps a handle to each
///
/// Clones share the list of created notifiers.
#[derive(Clone, Default)]
pub struct ScriptedNotifierFactory {
    created: Arc<Mutex<Vec<(String, Arc<ScriptedNotifier>)>>>,
    fail_setup_for: Vec<String>,
}

impl ScriptedNotifierFactory {
    /// Notifiers named `name` fail their setup hook
    pub fn failing_setup_for(mut self, name: &str) -> Self {
        self.fail_setup_for.push(name.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<ScriptedNotifier>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, notifier)| notifier.clone())
    }
}

impl NotifierFactory for ScriptedNotifierFactory {
    fn create(&self, name: &str, _config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
        let mut notifier = ScriptedNotifier::new();
        if self.fail_setup_for.iter().any(|n| n == name) {
            notifier = notifier.failing_setup();
        }
        let notifier = Arc::new(notifier);
        self.created
            .lock()
            .unwrap()
            .push((name.to_string(), notifier.clone()));
        Ok(notifier)
    }
}

/// One call to a [`RecordingUpdater`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Published {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Prefix),
}

/// An updater whose publish outcomes come from per-family scripts
///
/// Once a script runs out every publish succeeds.
pub struct RecordingUpdater {
    capabilities: UpdaterCapabilities,
    min_retry: Duration,
    script4: Mutex<VecDeque<std::result::Result<(), PublishError>>>,
    script6: Mutex<VecDeque<std::result::Result<(), PublishError>>>,
    calls: Mutex<Vec<(Instant, Published)>>,
    observe: Mutex<Option<(Arc<AddressLedger>, String)>>,
    seen4: Mutex<Vec<LedgerEntry<Ipv4Addr>>>,
    delay: Duration,
    in_flight: InFlight,
    block_dir: Mutex<Option<PathBuf>>,
}

impl RecordingUpdater {
    pub fn new() -> Self {
        Self {
            capabilities: UpdaterCapabilities {
                ipv4: true,
                ipv6: true,
            },
            min_retry: Duration::from_secs(10),
            script4: Mutex::new(VecDeque::new()),
            script6: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            observe: Mutex::new(None),
            seen4: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            in_flight: InFlight::default(),
            block_dir: Mutex::new(None),
        }
    }

    /// Every publish takes `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Replace directory `dir` with a plain file during the next IPv4
    /// publish, so later ledger writes below it fail
    pub fn block_dir_on_publish(&self, dir: PathBuf) {
        *self.block_dir.lock().unwrap() = Some(dir);
    }

    pub fn ipv4_only(mut self) -> Self {
        self.capabilities.ipv6 = false;
        self
    }

    pub fn with_min_retry(mut self, min_retry: Duration) -> Self {
        self.min_retry = min_retry;
        self
    }

    /// Record the IPv4 ledger entry of `name` at the moment of each publish
    pub fn observe_ledger(&self, ledger: Arc<AddressLedger>, name: &str) {
        *self.observe.lock().unwrap() = Some((ledger, name.to_string()));
    }

    pub fn push_ipv4(&self, outcome: std::result::Result<(), PublishError>) {
        self.script4.lock().unwrap().push_back(outcome);
    }

    pub fn push_ipv6(&self, outcome: std::result::Result<(), PublishError>) {
        self.script6.lock().unwrap().push_back(outcome);
    }

    pub fn fail_ipv4_times(&self, n: usize) {
        for _ in 0..n {
            self.push_ipv4(Err(PublishError::failed("scripted failure")));
        }
    }

    pub fn published(&self) -> Vec<Published> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn publish_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Times of every publish, relative to `start`
    pub fn call_offsets(&self, start: Instant) -> Vec<Duration> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.duration_since(start))
            .collect()
    }

    /// Ledger entries seen during each IPv4 publish
    pub fn seen_ipv4(&self) -> Vec<LedgerEntry<Ipv4Addr>> {
        self.seen4.lock().unwrap().clone()
    }
}

#[async_trait]
impl Updater for RecordingUpdater {
    fn capabilities(&self) -> UpdaterCapabilities {
        self.capabilities
    }

    fn min_retry_interval(&self) -> Duration {
        self.min_retry
    }

    async fn publish_ipv4(&self, address: Ipv4Addr) -> std::result::Result<(), PublishError> {
        self.calls
            .lock()
            .unwrap()
            .push((Instant::now(), Published::Ipv4(address)));
        self.in_flight.enter();

        let observe = self.observe.lock().unwrap().clone();
        if let Some((ledger, name)) = observe {
            let entry = ledger.get::<Ipv4Addr>(&name).await;
            self.seen4.lock().unwrap().push(entry);
        }

        let block_dir = self.block_dir.lock().unwrap().take();
        if let Some(dir) = block_dir {
            std::fs::remove_dir_all(&dir).unwrap();
            std::fs::write(&dir, b"").unwrap();
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = self.script4.lock().unwrap().pop_front().unwrap_or(Ok(()));
        self.in_flight.leave();
        outcome
    }

    async fn publish_ipv6(&self, prefix: Ipv6Prefix) -> std::result::Result<(), PublishError> {
        self.calls
            .lock()
            .unwrap()
            .push((Instant::now(), Published::Ipv6(prefix)));
        self.script6.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// Hands out one shared [`RecordingUpdater`]
pub struct RecordingUpdaterFactory {
    pub updater: Arc<RecordingUpdater>,
}

impl UpdaterFactory for RecordingUpdaterFactory {
    fn create(&self, _name: &str, _config: &UpdaterConfig) -> Result<Arc<dyn Updater>> {
        Ok(self.updater.clone())
    }
}

pub fn v4(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

pub fn v6(s: &str) -> Ipv6Prefix {
    s.parse().unwrap()
}

pub fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Let spawned tasks run without advancing virtual time
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
