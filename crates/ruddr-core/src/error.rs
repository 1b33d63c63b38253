//! Error types for the ruddr system
//!
//! [`Error`] is the crate-wide error. The two outcome enums,
//! [`CheckError`] and [`PublishError`], are what notifier and updater
//! implementations hand back to the scheduling core; they are not errors in
//! the propagate-with-`?` sense but signals that drive retry decisions.

use thiserror::Error;

/// Result type alias for ruddr operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the ruddr system
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (raised at construction, before scheduling)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Address ledger could not be persisted
    ///
    /// This is the ledger's persistence-failure signal. Engines treat it as
    /// fatal for the publish in progress.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// A notifier failed to start
    #[error("Notifier setup failed: {0}")]
    NotifierSetup(String),

    /// Operation requires a started notifier
    #[error("Notifier {0} is not started")]
    NotStarted(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a ledger persistence error
    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }

    /// Create a notifier setup error
    pub fn notifier_setup(msg: impl Into<String>) -> Self {
        Self::NotifierSetup(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

/// Outcome of a failed notifier check
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    /// Transient failure; the scheduler retries with backoff
    #[error("check failed: {0}")]
    Failed(String),

    /// This notifier cannot check on demand
    #[error("on-demand check not supported")]
    Unsupported,
}

impl CheckError {
    /// Create a transient check failure
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Outcome of a failed publish attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Transient failure; the engine retries with backoff
    #[error("publish failed: {0}")]
    Failed(String),

    /// Permanent failure; the engine halts for the rest of the process
    #[error("fatal publish error: {0}")]
    Fatal(String),

    /// The updater does not handle this address family
    #[error("address family not supported")]
    Unsupported,
}

impl PublishError {
    /// Create a transient publish failure
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Create a fatal publish failure
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }
}
