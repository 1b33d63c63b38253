// # ruddr-core
//
// Core library of the ruddr dynamic DNS agent.
//
// ## Architecture Overview
//
// - **Notifier**: discovers the current IPv4 address / IPv6 prefix
// - **NotifyScheduler**: drives a notifier's checks (startup, on demand,
//   retry with backoff, polling) and fans results out to subscribers
// - **Updater**: publishes an address to one DNS backend
// - **PublishRetryEngine**: wraps an updater with retry, coalescing, halting
//   and the ledger protocol
// - **AddressLedger**: durable record of what was last published
// - **DdnsManager**: builds and wires all of the above from configuration
// - **Registry**: maps configured type names to factories
//
// ## Data Flow
//
// ```text
// NotifyScheduler ──check──► Notifier ──address──► Dispatcher
//                                                      │ callbacks
//                                                      ▼
//                    AddressLedger ◄──── PublishRetryEngine ──► Updater
// ```
//
// ## Design Principles
//
// 1. **Single attempt below, policy above**: notifiers and updaters make one
//    attempt; scheduling and retries live in the core
// 2. **Sequence numbers over cancellation**: a superseded timer is a no-op
//    when it fires
// 3. **Pessimistic ledger**: invalidate before publishing, commit after

pub mod address;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod notifiers;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod traits;

// Re-export core types for convenience
pub use address::{AddressFamily, FamilyAddress, Ipv6Prefix};
pub use config::{CheckIntervals, NotifierConfig, RuddrConfig, UpdaterConfig};
pub use engine::PublishRetryEngine;
pub use error::{CheckError, Error, PublishError, Result};
pub use ledger::{AddressLedger, BackendRecord, LedgerEntry};
pub use manager::DdnsManager;
pub use notifiers::{StaticNotifier, StaticNotifierFactory};
pub use registry::Registry;
pub use scheduler::{
    AddressCallback, AddressFuture, CheckTrigger, Dispatcher, FamilyPolicy, NotifyScheduler,
    callback,
};
pub use traits::{
    Notifier, NotifierCapabilities, NotifierFactory, Updater, UpdaterCapabilities, UpdaterFactory,
};
