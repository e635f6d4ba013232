//! Sync orchestration
//!
//! # Components
//!
//! - [`retry`]: Bounded retry over a fixed backoff table
//! - [`http_client`]: HTTP client with timeouts, retries and rate limiting
//! - [`registry`]: Registered adapters and their run bookkeeping
//! - [`scheduler`]: Per-adapter timers, the run gate and shutdown
//! - [`status`]: Read-only status projection
//!
//! # Example
//!
//! ```ignore
//! use integration_sync::sync::{RegisterOptions, SchedulerConfig, SyncRegistry, SyncScheduler};
//!
//! let registry = Arc::new(SyncRegistry::new());
//! let scheduler = SyncScheduler::new(registry.clone(), SchedulerConfig::default());
//!
//! scheduler.register_integration(
//!     fireflies,
//!     RegisterOptions::default()
//!         .with_retries(2)
//!         .with_interval(Duration::from_secs(1800)),
//! )?;
//!
//! let outcome = scheduler.trigger_now("fireflies").await?;
//! ```

pub mod http_client;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod status;

// Re-export main types for convenience
pub use http_client::{HttpClient, HttpClientConfig, HttpResponse, RequestOptions};
pub use registry::{sync_fn, RegisterOptions, RegistryEntry, SyncFn, SyncRegistry};
pub use retry::{BackoffSchedule, RetryManager};
pub use scheduler::{SchedulerConfig, SyncScheduler, TickOutcome};
pub use status::StatusReporter;
