//! Read-side adapter models: descriptor snapshots, status and health

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::{LastResult, RunState};

/// Result of a lightweight provider health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the provider looks usable
    pub ok: bool,
    /// Human readable detail
    pub detail: String,
}

impl HealthStatus {
    /// Healthy check
    pub fn healthy(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    /// Unhealthy check
    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Point-in-time copy of a registered adapter's descriptor
///
/// The sync function itself stays inside the registry; this carries the
/// policy and run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterDescriptor {
    /// Unique provider key
    pub name: String,
    /// Extra attempts allowed per run
    pub retry_budget: u32,
    /// Interval between scheduled runs in milliseconds, if auto-scheduled
    pub interval_ms: Option<u64>,
    /// Current run state
    pub state: RunState,
    /// When the last run settled
    pub last_run_at: Option<DateTime<Utc>>,
    /// Settled result of the last run
    pub last_result: Option<LastResult>,
    /// Error of the last failed run
    pub last_error: Option<String>,
    /// Duration of the last run in milliseconds
    pub last_duration_ms: Option<u64>,
    /// Number of runs that have settled
    pub total_runs: u64,
    /// Failed runs since the last success
    pub consecutive_failures: u32,
    /// Ticks dropped because a run was in flight
    pub skipped_ticks: u64,
    /// Whether a recurring timer is active
    pub schedule_active: bool,
}

/// Status projection handed to diagnostics consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub name: String,
    pub state: RunState,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result: Option<LastResult>,
    pub last_error: Option<String>,
    pub schedule_active: bool,
    pub interval_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub skipped_ticks: u64,
    /// Health check, when one was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthStatus>,
}

impl From<AdapterDescriptor> for AdapterStatus {
    fn from(d: AdapterDescriptor) -> Self {
        Self {
            name: d.name,
            state: d.state,
            last_run_at: d.last_run_at,
            last_result: d.last_result,
            last_error: d.last_error,
            schedule_active: d.schedule_active,
            interval_ms: d.interval_ms,
            consecutive_failures: d.consecutive_failures,
            skipped_ticks: d.skipped_ticks,
            health: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_constructors() {
        assert!(HealthStatus::healthy("ok").ok);
        let h = HealthStatus::unhealthy("missing api key");
        assert!(!h.ok);
        assert_eq!(h.detail, "missing api key");
    }

    #[test]
    fn test_status_from_descriptor_omits_health() {
        let descriptor = AdapterDescriptor {
            name: "fireflies".to_string(),
            retry_budget: 2,
            interval_ms: Some(1_800_000),
            state: RunState::Idle,
            last_run_at: None,
            last_result: Some(LastResult::Success),
            last_error: None,
            last_duration_ms: Some(12),
            total_runs: 1,
            consecutive_failures: 0,
            skipped_ticks: 0,
            schedule_active: true,
        };

        let status = AdapterStatus::from(descriptor);
        assert_eq!(status.name, "fireflies");
        assert!(status.schedule_active);

        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("health").is_none());
        assert_eq!(json["state"], "idle");
    }
}
