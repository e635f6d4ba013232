//! Fireflies meeting transcription integration
//!
//! Talks to the Fireflies GraphQL API with a bearer API key.
//!
//! # Sync kinds
//!
//! - `transcripts` (default): latest transcripts, `limit` option (default 10)

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::{array_at, Integration, ProviderConfig, Session};
use crate::config::IntegrationKind;
use crate::error::IntegrationError;
use crate::models::{HealthStatus, SyncResult};
use crate::sync::{HttpClient, RequestOptions};

/// Default GraphQL endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.fireflies.ai/graphql";

const TRANSCRIPTS_QUERY: &str =
    "query Transcripts($limit: Int) { transcripts(limit: $limit) { id title date duration } }";

const USER_QUERY: &str = "query { user { email } }";

/// Fireflies adapter
pub struct FirefliesIntegration {
    name: String,
    config: ProviderConfig,
    http: Arc<HttpClient>,
    session: Session,
}

impl FirefliesIntegration {
    /// Create a new adapter
    pub fn new(name: &str, config: ProviderConfig, http: Arc<HttpClient>) -> Self {
        Self {
            name: name.to_string(),
            config,
            http,
            session: Session::default(),
        }
    }

    /// Transcripts fetched by the last sync
    pub fn last_sync_count(&self) -> u64 {
        self.session.last_records()
    }

    async fn graphql(
        &self,
        token: &str,
        query: &str,
        variables: Value,
    ) -> Result<Value, IntegrationError> {
        let response = self
            .http
            .request(
                self.config.base(),
                RequestOptions::post_json(json!({ "query": query, "variables": variables }))
                    .bearer(token),
            )
            .await;
        let body = response.into_result()?;

        // GraphQL reports errors with a 200 status
        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            let message = errors
                .first()
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown GraphQL error");
            return Err(IntegrationError::InvalidData(message.to_string()));
        }

        Ok(body)
    }

    async fn ensure_connected(&self) -> Result<String, IntegrationError> {
        if !self.connect().await {
            return Err(IntegrationError::NotConfigured(format!(
                "{}: missing api_key",
                self.name
            )));
        }
        self.session
            .token()
            .ok_or_else(|| IntegrationError::NotConfigured(self.name.clone()))
    }
}

#[async_trait]
impl Integration for FirefliesIntegration {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Transcription
    }

    async fn connect(&self) -> bool {
        self.session.connect(&self.name, &[self.config.api_key.as_ref()])
    }

    async fn sync<'a>(&self, kind: Option<&'a str>) -> Result<SyncResult, IntegrationError> {
        match kind.unwrap_or("transcripts") {
            "transcripts" => {}
            other => return Err(IntegrationError::UnsupportedKind(other.to_string())),
        }
        let token = self.ensure_connected().await?;
        let limit = self.config.limit();

        debug!(adapter = %self.name, limit, "Fetching transcripts");
        let body = self
            .graphql(&token, TRANSCRIPTS_QUERY, json!({ "limit": limit }))
            .await?;
        let transcripts = array_at(&body, "/data/transcripts")?;

        info!(adapter = %self.name, count = transcripts.len(), "Fetched transcripts");
        Ok(self.session.record(transcripts.len() as u64))
    }

    async fn healthcheck(&self) -> HealthStatus {
        let token = match self.ensure_connected().await {
            Ok(token) => token,
            Err(e) => return HealthStatus::unhealthy(e.to_string()),
        };

        match self.graphql(&token, USER_QUERY, json!({})).await {
            Ok(body) => {
                let email = body
                    .pointer("/data/user/email")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown user");
                HealthStatus::healthy(format!("authenticated as {}", email))
            }
            Err(e) => HealthStatus::unhealthy(e.to_string()),
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_connected()
    }
}
