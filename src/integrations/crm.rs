//! HubSpot CRM integration
//!
//! Reads CRM objects through the v3 objects API with a private-app access
//! token (or an API key passed as bearer token).

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{array_at, url_with_query, Integration, ProviderConfig, Session};
use crate::config::IntegrationKind;
use crate::error::IntegrationError;
use crate::models::{HealthStatus, SyncResult};
use crate::sync::{HttpClient, RequestOptions};

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.hubapi.com";

/// Object types a sync can fetch
pub const OBJECT_KINDS: [&str; 3] = ["contacts", "companies", "deals"];

/// HubSpot adapter
pub struct HubSpotIntegration {
    name: String,
    config: ProviderConfig,
    http: Arc<HttpClient>,
    session: Session,
}

impl HubSpotIntegration {
    /// Create a new adapter
    pub fn new(name: &str, config: ProviderConfig, http: Arc<HttpClient>) -> Self {
        Self {
            name: name.to_string(),
            config,
            http,
            session: Session::default(),
        }
    }

    /// Records fetched by the last sync
    pub fn last_sync_count(&self) -> u64 {
        self.session.last_records()
    }

    async fn fetch_objects(&self, object: &str, limit: u32) -> Result<usize, IntegrationError> {
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

        let url = url_with_query(
            &format!("{}/crm/v3/objects/{}", self.config.base(), object),
            &[("limit", limit.to_string())],
        )?;

        let body = self
            .http
            .request(url.as_str(), RequestOptions::get().bearer(&token))
            .await
            .into_result()?;

        Ok(array_at(&body, "/results")?.len())
    }
}

#[async_trait]
impl Integration for HubSpotIntegration {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Crm
    }

    async fn connect(&self) -> bool {
        self.session.connect(
            &self.name,
            &[self.config.access_token.as_ref(), self.config.api_key.as_ref()],
        )
    }

    async fn sync<'a>(&self, kind: Option<&'a str>) -> Result<SyncResult, IntegrationError> {
        let object: &str = match kind {
            Some(kind) => kind,
            None => self.config.str_option("object", "contacts"),
        };
        if !OBJECT_KINDS.contains(&object) {
            return Err(IntegrationError::UnsupportedKind(object.to_string()));
        }

        debug!(adapter = %self.name, object, "Fetching CRM objects");
        let count = self.fetch_objects(object, self.config.limit()).await?;

        info!(adapter = %self.name, object, count, "Fetched CRM objects");
        Ok(self.session.record(count as u64))
    }

    async fn healthcheck(&self) -> HealthStatus {
        match self.fetch_objects("contacts", 1).await {
            Ok(_) => HealthStatus::healthy("CRM API reachable"),
            Err(e) => HealthStatus::unhealthy(e.to_string()),
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::sync::{BackoffSchedule, HttpClientConfig};
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> HubSpotIntegration {
        let http = HttpClient::new(HttpClientConfig {
            retries: 1,
            backoff: BackoffSchedule::from_millis(&[0]),
            ..HttpClientConfig::default()
        })
        .unwrap();
        HubSpotIntegration::new(
            "hubspot",
            ProviderConfig::new(server.uri()).with_access_token("pat-123"),
            Arc::new(http),
        )
    }

    #[tokio::test]
    async fn test_sync_contacts_by_default() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crm/v3/objects/contacts"))
            .and(query_param("limit", "10"))
            .and(header("Authorization", "Bearer pat-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": "1"}, {"id": "2"}, {"id": "3"}]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let hubspot = adapter(&mock_server);
        let result = hubspot.sync(None).await.unwrap();

        assert_eq!(result.records_updated, 3);
        assert_eq!(hubspot.last_sync_count(), 3);
    }

    #[tokio::test]
    async fn test_sync_deals() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crm/v3/objects/deals"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let hubspot = adapter(&mock_server);
        assert!(hubspot.sync(Some("deals")).await.unwrap().skipped);
    }

    #[tokio::test]
    async fn test_unsupported_object_kind() {
        let mock_server = MockServer::start().await;
        let hubspot = adapter(&mock_server);

        let err = hubspot.sync(Some("tickets")).await.unwrap_err();
        assert_eq!(err, IntegrationError::UnsupportedKind("tickets".to_string()));
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crm/v3/objects/contacts"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&mock_server)
            .await;

        let hubspot = adapter(&mock_server);
        let err = hubspot.sync(None).await.unwrap_err();
        assert_eq!(err, IntegrationError::Request(SyncError::HttpError(401)));

        let health = hubspot.healthcheck().await;
        assert!(!health.ok);
        assert!(health.detail.contains("401"));
    }

    #[tokio::test]
    async fn test_missing_results_is_invalid_data() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crm/v3/objects/contacts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&mock_server)
            .await;

        let hubspot = adapter(&mock_server);
        assert!(matches!(
            hubspot.sync(None).await,
            Err(IntegrationError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn test_healthcheck_reads_one_contact() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crm/v3/objects/contacts"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let hubspot = adapter(&mock_server);
        assert!(hubspot.healthcheck().await.ok);
    }

    #[tokio::test]
    async fn test_api_key_fallback_connects() {
        let http = Arc::new(HttpClient::new(HttpClientConfig::default()).unwrap());
        let hubspot = HubSpotIntegration::new(
            "hubspot",
            ProviderConfig::new(DEFAULT_BASE_URL).with_api_key("legacy"),
            http.clone(),
        );
        assert!(hubspot.connect().await);

        let unconfigured =
            HubSpotIntegration::new("hubspot", ProviderConfig::new(DEFAULT_BASE_URL), http);
        assert!(!unconfigured.connect().await);
        assert!(!unconfigured.is_connected());
    }
}
