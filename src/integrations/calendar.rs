//! Google Calendar integration
//!
//! Fetches upcoming events from one calendar (`calendar_id` option, default
//! `primary`) with an OAuth access token.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::{array_at, url_with_query, Integration, ProviderConfig, Session};
use crate::config::IntegrationKind;
use crate::error::IntegrationError;
use crate::models::{HealthStatus, SyncResult};
use crate::sync::{HttpClient, RequestOptions};

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

/// Google Calendar adapter
pub struct GoogleCalendarIntegration {
    name: String,
    config: ProviderConfig,
    http: Arc<HttpClient>,
    session: Session,
}

impl GoogleCalendarIntegration {
    /// Create a new adapter
    pub fn new(name: &str, config: ProviderConfig, http: Arc<HttpClient>) -> Self {
        Self {
            name: name.to_string(),
            config,
            http,
            session: Session::default(),
        }
    }

    /// Events fetched by the last sync
    pub fn last_sync_count(&self) -> u64 {
        self.session.last_records()
    }

    fn calendar_url(&self) -> String {
        format!(
            "{}/calendar/v3/calendars/{}",
            self.config.base(),
            self.config.str_option("calendar_id", "primary")
        )
    }

    async fn get_json(&self, url: &str) -> Result<Value, IntegrationError> {
        if !self.connect().await {
            return Err(IntegrationError::NotConfigured(format!(
                "{}: missing access_token",
                self.name
            )));
        }
        let token = self
            .session
            .token()
            .ok_or_else(|| IntegrationError::NotConfigured(self.name.clone()))?;

        Ok(self
            .http
            .request(url, RequestOptions::get().bearer(&token))
            .await
            .into_result()?)
    }
}

#[async_trait]
impl Integration for GoogleCalendarIntegration {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Calendar
    }

    async fn connect(&self) -> bool {
        self.session
            .connect(&self.name, &[self.config.access_token.as_ref()])
    }

    async fn sync<'a>(&self, kind: Option<&'a str>) -> Result<SyncResult, IntegrationError> {
        match kind.unwrap_or("events") {
            "events" => {}
            other => return Err(IntegrationError::UnsupportedKind(other.to_string())),
        }

        let url = url_with_query(
            &format!("{}/events", self.calendar_url()),
            &[
                ("maxResults", self.config.limit().to_string()),
                (
                    "timeMin",
                    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                ),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ],
        )?;

        debug!(adapter = %self.name, "Fetching upcoming events");
        let body = self.get_json(url.as_str()).await?;
        let events = array_at(&body, "/items")?;

        info!(adapter = %self.name, count = events.len(), "Fetched calendar events");
        Ok(self.session.record(events.len() as u64))
    }

    async fn healthcheck(&self) -> HealthStatus {
        match self.get_json(&self.calendar_url()).await {
            Ok(body) => {
                let summary = body
                    .get("summary")
                    .and_then(Value::as_str)
                    .unwrap_or("calendar");
                HealthStatus::healthy(format!("{} reachable", summary))
            }
            Err(e) => HealthStatus::unhealthy(e.to_string()),
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_connected()
    }
}
