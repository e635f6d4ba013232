//! Status reporter
//!
//! Read-only projection over the registry for diagnostics and boot logs.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::models::{AdapterStatus, HealthStatus, LastResult};
use crate::sync::registry::SyncRegistry;

/// Default bound on a single health check
pub const DEFAULT_HEALTHCHECK_TIMEOUT: Duration = Duration::from_secs(20);

/// Status reporter over a registry
#[derive(Clone)]
pub struct StatusReporter {
    registry: Arc<SyncRegistry>,
    healthcheck_timeout: Duration,
}

impl StatusReporter {
    /// Create a reporter
    pub fn new(registry: Arc<SyncRegistry>) -> Self {
        Self {
            registry,
            healthcheck_timeout: DEFAULT_HEALTHCHECK_TIMEOUT,
        }
    }

    /// Override the per-check timeout
    pub fn with_healthcheck_timeout(mut self, timeout: Duration) -> Self {
        self.healthcheck_timeout = timeout;
        self
    }

    /// Status of one adapter
    pub fn get_status(&self, name: &str) -> Option<AdapterStatus> {
        self.registry.get(name).map(AdapterStatus::from)
    }

    /// Status of every adapter, in registration order
    pub fn get_all_statuses(&self) -> Vec<AdapterStatus> {
        self.registry
            .list()
            .into_iter()
            .map(AdapterStatus::from)
            .collect()
    }

    /// Statuses with a health check for each adapter backed by an integration
    ///
    /// Bare sync functions have no health check and keep `health: None`.
    pub async fn healthchecks(&self) -> Vec<AdapterStatus> {
        let mut statuses = Vec::new();

        for descriptor in self.registry.list() {
            let integration = self
                .registry
                .entry(&descriptor.name)
                .and_then(|entry| entry.integration());
            let mut status = AdapterStatus::from(descriptor);

            if let Some(integration) = integration {
                let health =
                    match tokio::time::timeout(self.healthcheck_timeout, integration.healthcheck())
                        .await
                    {
                        Ok(health) => health,
                        Err(_) => HealthStatus::unhealthy("healthcheck timed out"),
                    };
                if !health.ok {
                    warn!(adapter = %status.name, detail = %health.detail, "Healthcheck failed");
                }
                status.health = Some(health);
            }

            statuses.push(status);
        }

        statuses
    }

    /// Write one log line per adapter
    pub fn log_statuses(&self) {
        let statuses = self.get_all_statuses();
        info!(adapters = statuses.len(), "Integration sync status");

        for status in statuses {
            let last_result = match &status.last_result {
                None => "never_run".to_string(),
                Some(LastResult::Success) => "success".to_string(),
                Some(LastResult::Failure { reason }) => format!("failure: {}", reason),
            };
            info!(
                adapter = %status.name,
                state = %status.state,
                scheduled = status.schedule_active,
                interval_ms = status.interval_ms,
                last_run_at = status.last_run_at.map(|t| t.to_rfc3339()),
                last_result = %last_result,
                consecutive_failures = status.consecutive_failures,
                "Adapter status"
            );
        }
    }
}
