//! Application error types for integration-sync
//!
//! Errors are split by layer: request-level failures from the HTTP client,
//! adapter-level failures from integrations, and orchestration failures from
//! the registry and scheduler. All of them use `thiserror`.

use thiserror::Error;

/// Request-level failures surfaced by the resilient HTTP client
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Request exceeded its timeout and was aborted
    #[error("Request timed out")]
    Timeout,

    /// Upstream answered with a non-success status
    #[error("HTTP error: {0}")]
    HttpError(u16),

    /// Connection-level failure (DNS, refused, reset, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// Response body could not be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Failures reported by an integration adapter
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IntegrationError {
    /// Adapter has no usable credentials or configuration
    #[error("Integration not configured: {0}")]
    NotConfigured(String),

    /// Underlying provider request failed
    #[error("Request failed: {0}")]
    Request(#[from] SyncError),

    /// Requested sync kind is not offered by this provider
    #[error("Unsupported sync kind: {0}")]
    UnsupportedKind(String),

    /// Provider answered with a payload we could not interpret
    #[error("Invalid provider data: {0}")]
    InvalidData(String),
}

/// Errors returned by registry and scheduler operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrchestratorError {
    /// An adapter with this name is already registered
    #[error("Adapter already registered: {0}")]
    DuplicateName(String),

    /// No adapter with this name is registered
    #[error("Unknown adapter: {0}")]
    UnknownAdapter(String),

    /// A run for this adapter is in flight
    #[error("Adapter is already running: {0}")]
    AlreadyRunning(String),

    /// Auto-sync interval must be non-zero
    #[error("Invalid interval for adapter: {0}")]
    InvalidInterval(String),

    /// Scheduler has been shut down
    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

/// Adapter construction errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PluginError {
    /// Adapter could not be built from its configuration
    #[error("Invalid integration configuration: {0}")]
    InvalidConfig(String),
}

/// Application-level error type
///
/// Aggregates the domain errors for the composition root.
#[derive(Debug, Error)]
pub enum AppError {
    /// Request error
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Integration error
    #[error("Integration error: {0}")]
    Integration(#[from] IntegrationError),

    /// Orchestrator error
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// Plugin error
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Telemetry error
    #[error("Telemetry error: {0}")]
    Otel(#[from] crate::otel::OtelError),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            SyncError::Timeout => true,
            SyncError::Network(_) => true,
            SyncError::HttpError(code) => *code >= 500,
            SyncError::InvalidData(_) => false,
        }
    }
}

impl RetryableError for IntegrationError {
    fn is_retryable(&self) -> bool {
        match self {
            IntegrationError::Request(err) => err.is_retryable(),
            IntegrationError::NotConfigured(_)
            | IntegrationError::UnsupportedKind(_)
            | IntegrationError::InvalidData(_) => false,
        }
    }
}
