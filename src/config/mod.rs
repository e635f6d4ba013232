//! Configuration management for integration-sync
//!
//! Configuration is loaded from a YAML file (with `${VAR}` expansion) or from
//! `INTEGRATION_SYNC_*` environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Upper bound for intervals and startup delays (one year, in seconds)
pub const MAX_DELAY_SECS: u64 = 365 * 24 * 60 * 60;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// Outbound HTTP configuration shared by all providers
    #[serde(default)]
    pub http: HttpConfig,

    /// Integrations keyed by adapter name
    #[serde(default)]
    pub integrations: HashMap<String, IntegrationConfig>,

    /// OpenTelemetry configuration
    #[serde(default)]
    pub otel: OtelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with prefix INTEGRATION_SYNC_
    ///
    /// Integrations cannot be declared through the environment; only the
    /// ambient sections are read.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(timeout) = std::env::var("INTEGRATION_SYNC_HTTP_TIMEOUT_MS") {
            config.http.timeout_ms = timeout
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid HTTP timeout".to_string()))?;
        }
        if let Ok(retries) = std::env::var("INTEGRATION_SYNC_HTTP_RETRIES") {
            config.http.retries = retries
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid HTTP retry count".to_string()))?;
        }
        if let Ok(deadline) = std::env::var("INTEGRATION_SYNC_SHUTDOWN_DEADLINE_SECS") {
            config.scheduler.shutdown_deadline_secs = Some(
                deadline
                    .parse()
                    .map_err(|_| ConfigError::Parse("Invalid shutdown deadline".to_string()))?,
            );
        }
        if let Ok(level) = std::env::var("INTEGRATION_SYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("INTEGRATION_SYNC_LOG_FORMAT") {
            config.logging.format = format;
        }
        if let Ok(enabled) = std::env::var("INTEGRATION_SYNC_OTEL_ENABLED") {
            config.otel.enabled = enabled.parse().unwrap_or(false);
        }
        if let Ok(endpoint) = std::env::var("INTEGRATION_SYNC_OTEL_ENDPOINT") {
            config.otel.endpoint = Some(endpoint);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the scheduler misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "http.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.http.rate_limit.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue(
                "http.rate_limit.max_concurrent must be greater than zero".to_string(),
            ));
        }
        for (field, value) in [
            ("scheduler.initial_delay_secs", self.scheduler.initial_delay_secs),
            ("scheduler.jitter_secs", self.scheduler.jitter_secs),
        ] {
            if value > MAX_DELAY_SECS {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be at most {}",
                    field, MAX_DELAY_SECS
                )));
            }
        }
        for (name, integration) in &self.integrations {
            match integration.interval_secs {
                Some(0) => {
                    return Err(ConfigError::InvalidValue(format!(
                        "integrations.{}.interval_secs must be greater than zero",
                        name
                    )))
                }
                Some(secs) if secs > MAX_DELAY_SECS => {
                    return Err(ConfigError::InvalidValue(format!(
                        "integrations.{}.interval_secs must be at most {}",
                        name, MAX_DELAY_SECS
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSection {
    /// Delay before the first tick of every adapter (seconds)
    #[serde(default)]
    pub initial_delay_secs: u64,

    /// Random extra delay added to each adapter's first tick (seconds)
    #[serde(default)]
    pub jitter_secs: u64,

    /// Hard deadline for in-flight runs on shutdown; absent waits for them
    #[serde(default)]
    pub shutdown_deadline_secs: Option<u64>,

    /// Delays between run-level attempts (milliseconds); last value repeats
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            initial_delay_secs: 0,
            jitter_secs: 0,
            shutdown_deadline_secs: None,
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl SchedulerSection {
    /// Shutdown deadline as a duration
    pub fn shutdown_deadline(&self) -> Option<Duration> {
        self.shutdown_deadline_secs.map(Duration::from_secs)
    }
}

fn default_backoff_ms() -> Vec<u64> {
    vec![1000, 3000, 5000]
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Additional attempts on timeout or 5xx
    #[serde(default = "default_http_retries")]
    pub retries: u32,

    /// Delays between request attempts (milliseconds); last value repeats
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retries: default_http_retries(),
            backoff_ms: default_backoff_ms(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_http_retries() -> u32 {
    2
}

/// Rate limiting configuration for HTTP clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Minimum interval between requests to the same host in milliseconds
    #[serde(default)]
    pub min_interval_ms: u64,

    /// Maximum number of concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 0,
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_max_concurrent() -> usize {
    4
}

/// Provider family an integration belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    /// Meeting transcription (Fireflies)
    Transcription,
    /// CRM (HubSpot)
    Crm,
    /// Calendar (Google Calendar)
    Calendar,
    /// File storage (Google Drive)
    Storage,
}

impl std::fmt::Display for IntegrationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrationKind::Transcription => write!(f, "transcription"),
            IntegrationKind::Crm => write!(f, "crm"),
            IntegrationKind::Calendar => write!(f, "calendar"),
            IntegrationKind::Storage => write!(f, "storage"),
        }
    }
}

/// Configuration for one integration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrationConfig {
    /// Provider family
    pub kind: IntegrationKind,

    /// Whether this integration is registered at boot
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Auto-sync interval in seconds; absent means manual trigger only
    #[serde(default)]
    pub interval_secs: Option<u64>,

    /// Run-level retry budget
    #[serde(default = "default_integration_retries")]
    pub retries: u32,

    /// Provider API base URL override
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key credential
    #[serde(default)]
    pub api_key: Option<String>,

    /// OAuth access token credential
    #[serde(default)]
    pub access_token: Option<String>,

    /// Provider-specific options
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl IntegrationConfig {
    /// Auto-sync interval as a duration
    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(Duration::from_secs)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_integration_retries() -> u32 {
    1
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtelConfig {
    /// Whether OpenTelemetry is enabled
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint URL
    pub endpoint: Option<String>,

    /// Whether to use insecure connection
    #[serde(default)]
    pub insecure: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            insecure: false,
            service_name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "integration-sync".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format ("json" or "pretty")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand `${VAR_NAME}` references; unknown variables are left as written
fn expand_env_vars(input: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return input.to_string();
    };

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
