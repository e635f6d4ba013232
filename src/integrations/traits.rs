//! Integration adapter trait definition
//!
//! Every third-party provider the orchestrator syncs against implements this
//! trait. Credentials, endpoints and payload shapes stay inside the adapter;
//! the scheduler only ever sees these methods.

use async_trait::async_trait;

use crate::config::IntegrationKind;
use crate::error::IntegrationError;
use crate::models::{HealthStatus, SyncResult};

/// Trait for integration adapters
///
/// # Example
///
/// ```ignore
/// use integration_sync::integrations::Integration;
///
/// #[async_trait]
/// impl Integration for MyProvider {
///     fn name(&self) -> &str {
///         "my-provider"
///     }
///
///     fn kind(&self) -> IntegrationKind {
///         IntegrationKind::Crm
///     }
///
///     async fn connect(&self) -> bool {
///         self.api_key.is_some()
///     }
///
///     async fn sync<'a>(&self, kind: Option<&'a str>) -> Result<SyncResult, IntegrationError> {
///         Ok(SyncResult::success(10))
///     }
///
///     // ... other methods
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Integration: Send + Sync {
    /// Unique provider key, also used as the registry name
    fn name(&self) -> &str;

    /// Provider category
    fn kind(&self) -> IntegrationKind;

    /// Resolve and cache credentials
    ///
    /// Idempotent. Returns whether the adapter is usable; missing
    /// configuration yields `false`, never an error.
    async fn connect(&self) -> bool;

    /// Perform one unit of synchronization work
    ///
    /// `kind` selects a provider-specific dataset; `None` picks the
    /// provider's default. Calls `connect` first if needed.
    async fn sync<'a>(&self, kind: Option<&'a str>) -> Result<SyncResult, IntegrationError>;

    /// Read-only health check used for status display
    async fn healthcheck(&self) -> HealthStatus;

    /// Whether `connect` has succeeded; no I/O
    fn is_connected(&self) -> bool;
}
