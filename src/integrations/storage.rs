//! Google Drive storage integration
//!
//! Lists the most recently modified files visible to an OAuth access token.

use async_trait::async_trait;
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

const FILE_FIELDS: &str = "files(id,name,mimeType,modifiedTime)";

/// Google Drive adapter
pub struct GoogleDriveIntegration {
    name: String,
    config: ProviderConfig,
    http: Arc<HttpClient>,
    session: Session,
}

impl GoogleDriveIntegration {
    /// Create a new adapter
    pub fn new(name: &str, config: ProviderConfig, http: Arc<HttpClient>) -> Self {
        Self {
            name: name.to_string(),
            config,
            http,
            session: Session::default(),
        }
    }

    /// Files listed by the last sync
    pub fn last_sync_count(&self) -> u64 {
        self.session.last_records()
    }

    async fn get_json(&self, url: reqwest::Url) -> Result<Value, IntegrationError> {
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
            .request(url.as_str(), RequestOptions::get().bearer(&token))
            .await
            .into_result()?)
    }
}

#[async_trait]
impl Integration for GoogleDriveIntegration {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Storage
    }

    async fn connect(&self) -> bool {
        self.session
            .connect(&self.name, &[self.config.access_token.as_ref()])
    }

    async fn sync<'a>(&self, kind: Option<&'a str>) -> Result<SyncResult, IntegrationError> {
        match kind.unwrap_or("files") {
            "files" => {}
            other => return Err(IntegrationError::UnsupportedKind(other.to_string())),
        }

        let url = url_with_query(
            &format!("{}/drive/v3/files", self.config.base()),
            &[
                ("pageSize", self.config.limit().to_string()),
                ("orderBy", "modifiedTime desc".to_string()),
                ("fields", FILE_FIELDS.to_string()),
            ],
        )?;

        debug!(adapter = %self.name, "Listing recent files");
        let body = self.get_json(url).await?;
        let files = array_at(&body, "/files")?;

        info!(adapter = %self.name, count = files.len(), "Listed drive files");
        Ok(self.session.record(files.len() as u64))
    }

    async fn healthcheck(&self) -> HealthStatus {
        let url = match url_with_query(
            &format!("{}/drive/v3/about", self.config.base()),
            &[("fields", "user".to_string())],
        ) {
            Ok(url) => url,
            Err(e) => return HealthStatus::unhealthy(e.to_string()),
        };

        match self.get_json(url).await {
            Ok(body) => {
                let user = body
                    .pointer("/user/emailAddress")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown user");
                HealthStatus::healthy(format!("authenticated as {}", user))
            }
            Err(e) => HealthStatus::unhealthy(e.to_string()),
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_connected()
    }
}
