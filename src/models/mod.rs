//! Domain models for integration-sync
//!
//! Value types shared by the HTTP client, adapters, and the orchestrator.

pub mod run;
pub mod status;

pub use run::{LastResult, RunOutcome, RunState, SyncResult};
pub use status::{AdapterDescriptor, AdapterStatus, HealthStatus};
