//! Notifiers built into the core crate

mod fixed;

pub use fixed::{StaticNotifier, StaticNotifierFactory};
