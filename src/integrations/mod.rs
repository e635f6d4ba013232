//! Integration adapters
//!
//! One adapter per third-party provider, all behind the [`Integration`]
//! trait:
//!
//! - [`transcription`]: Fireflies meeting transcripts (GraphQL)
//! - [`crm`]: HubSpot CRM objects
//! - [`calendar`]: Google Calendar events
//! - [`storage`]: Google Drive files
//!
//! Adapters share one [`HttpClient`], so request timeouts, retries and rate
//! limiting apply to every provider call.

pub mod calendar;
pub mod crm;
pub mod storage;
pub mod traits;
pub mod transcription;

pub use calendar::GoogleCalendarIntegration;
pub use crm::HubSpotIntegration;
pub use storage::GoogleDriveIntegration;
pub use traits::Integration;
pub use transcription::FirefliesIntegration;

#[cfg(test)]
pub use traits::MockIntegration;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::config::{IntegrationConfig, IntegrationKind};
use crate::error::{IntegrationError, PluginError};
use crate::models::SyncResult;
use crate::sync::HttpClient;

/// Default number of records fetched per sync
pub const DEFAULT_FETCH_LIMIT: u32 = 10;

/// Provider settings resolved from an [`IntegrationConfig`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderConfig {
    /// API base URL (or endpoint, for GraphQL providers)
    pub base_url: String,
    /// API key credential
    pub api_key: Option<String>,
    /// OAuth access token credential
    pub access_token: Option<String>,
    /// Provider-specific options
    pub options: HashMap<String, String>,
}

impl ProviderConfig {
    /// Settings with only a base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set the API key
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the access token
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Set a provider option
    pub fn with_option(mut self, key: &str, value: impl Into<String>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    /// Base URL without a trailing slash
    pub(crate) fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Numeric option, falling back to `default` when absent or malformed
    pub(crate) fn u32_option(&self, key: &str, default: u32) -> u32 {
        match self.options.get(key) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(option = key, value = %raw, "Ignoring malformed numeric option");
                default
            }),
            None => default,
        }
    }

    /// String option with a default
    pub(crate) fn str_option<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.options.get(key).map(String::as_str).unwrap_or(default)
    }

    /// Fetch limit (`limit` option)
    pub(crate) fn limit(&self) -> u32 {
        self.u32_option("limit", DEFAULT_FETCH_LIMIT)
    }
}

/// Cached credential and last-sync bookkeeping shared by all providers
#[derive(Debug, Default)]
pub(crate) struct Session {
    token: RwLock<Option<String>>,
    last_records: AtomicU64,
}

impl Session {
    /// Cache the first non-blank candidate; returns whether one was found
    pub(crate) fn connect(&self, name: &str, candidates: &[Option<&String>]) -> bool {
        if self.is_connected() {
            return true;
        }

        let credential = candidates
            .iter()
            .flatten()
            .map(|c| c.trim())
            .find(|c| !c.is_empty());

        match credential {
            Some(credential) => {
                *self.token.write().unwrap_or_else(PoisonError::into_inner) =
                    Some(credential.to_string());
                debug!(adapter = name, "Integration connected");
                true
            }
            None => {
                warn!(adapter = name, "Integration has no credentials configured");
                false
            }
        }
    }

    pub(crate) fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Remember how many records the last sync fetched
    pub(crate) fn record(&self, count: u64) -> SyncResult {
        self.last_records.store(count, Ordering::SeqCst);
        if count == 0 {
            SyncResult::skipped().with_message("no new records")
        } else {
            SyncResult::success(count)
        }
    }

    pub(crate) fn last_records(&self) -> u64 {
        self.last_records.load(Ordering::SeqCst)
    }
}

/// Array at a JSON pointer, or `InvalidData`
pub(crate) fn array_at<'a>(value: &'a Value, pointer: &str) -> Result<&'a Vec<Value>, IntegrationError> {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .ok_or_else(|| IntegrationError::InvalidData(format!("missing array at {}", pointer)))
}

/// Build a URL with query parameters
pub(crate) fn url_with_query(
    url: &str,
    params: &[(&str, String)],
) -> Result<reqwest::Url, IntegrationError> {
    reqwest::Url::parse_with_params(url, params)
        .map_err(|e| IntegrationError::NotConfigured(format!("invalid URL {}: {}", url, e)))
}

/// Build the adapter for a configured integration
pub fn build_integration(
    name: &str,
    config: &IntegrationConfig,
    http: Arc<HttpClient>,
) -> Result<Arc<dyn Integration>, PluginError> {
    let default_base = match config.kind {
        IntegrationKind::Transcription => transcription::DEFAULT_ENDPOINT,
        IntegrationKind::Crm => crm::DEFAULT_BASE_URL,
        IntegrationKind::Calendar => calendar::DEFAULT_BASE_URL,
        IntegrationKind::Storage => storage::DEFAULT_BASE_URL,
    };
    let base_url = config
        .base_url
        .clone()
        .unwrap_or_else(|| default_base.to_string());

    reqwest::Url::parse(&base_url).map_err(|e| {
        PluginError::InvalidConfig(format!("{}: invalid base_url {}: {}", name, base_url, e))
    })?;

    let provider = ProviderConfig {
        base_url,
        api_key: config.api_key.clone(),
        access_token: config.access_token.clone(),
        options: config.options.clone(),
    };

    let integration: Arc<dyn Integration> = match config.kind {
        IntegrationKind::Transcription => {
            Arc::new(FirefliesIntegration::new(name, provider, http))
        }
        IntegrationKind::Crm => Arc::new(HubSpotIntegration::new(name, provider, http)),
        IntegrationKind::Calendar => {
            Arc::new(GoogleCalendarIntegration::new(name, provider, http))
        }
        IntegrationKind::Storage => Arc::new(GoogleDriveIntegration::new(name, provider, http)),
    };

    Ok(integration)
}
