//! Core traits for the ruddr system
//!
//! - [`Notifier`]: discover the current address(es)
//! - [`Updater`]: publish an address to a DNS backend

pub mod notifier;
pub mod updater;

pub use notifier::{Notifier, NotifierCapabilities, NotifierFactory};
pub use updater::{Updater, UpdaterCapabilities, UpdaterFactory};
