//! integration-sync - Integration sync orchestrator
//!
//! Periodically synchronizes data from third-party providers (meeting
//! transcription, CRM, calendar, file storage). Each provider runs on its own
//! timer, never overlaps with itself, retries transient failures with a
//! bounded backoff, and exposes its last outcome through a status API.

pub mod config;
pub mod error;
pub mod integrations;
pub mod models;
pub mod otel;
pub mod sync;
