//! Resilient HTTP client for provider API calls
//!
//! Every request carries a timeout. Timeouts, connection failures and 5xx
//! responses are retried on the fixed backoff table; 4xx responses fail
//! immediately. Failures come back as data in [`HttpResponse`] so callers
//! branch on `ok` instead of handling errors.
//!
//! The client also enforces a global concurrency limit and an optional
//! minimum interval between requests to the same host.

use crate::config::{HttpConfig, RateLimitConfig};
use crate::error::SyncError;
use crate::sync::retry::{BackoffSchedule, RetryManager};
use reqwest::{Client, Method};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

/// Client-wide defaults
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Default per-request timeout
    pub timeout: Duration,
    /// Default extra attempts on retryable failures
    pub retries: u32,
    /// Delays between attempts
    pub backoff: BackoffSchedule,
    /// Concurrency and per-host pacing
    pub rate_limit: RateLimitConfig,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self::from(&HttpConfig::default())
    }
}

impl From<&HttpConfig> for HttpClientConfig {
    fn from(config: &HttpConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            retries: config.retries,
            backoff: BackoffSchedule::from_millis(&config.backoff_ms),
            rate_limit: config.rate_limit.clone(),
        }
    }
}

/// Per-request options; unset values fall back to the client defaults
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub parse_json: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            body: None,
            timeout_ms: None,
            retries: None,
            parse_json: true,
        }
    }
}

impl RequestOptions {
    /// GET request
    pub fn get() -> Self {
        Self::default()
    }

    /// POST request with a JSON body
    pub fn post_json(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::default()
        }
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add an `Authorization: Bearer` header
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    /// Override the timeout
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Override the retry count
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Return the body as a raw string instead of parsing JSON
    pub fn raw(mut self) -> Self {
        self.parse_json = false;
        self
    }
}

/// Outcome of a request after all attempts
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Whether a 2xx response was received and decoded
    pub ok: bool,
    /// Status of the last response, if one was received
    pub status: Option<u16>,
    /// Decoded body of a successful response
    pub data: Option<Value>,
    /// Error of the last attempt
    pub error: Option<SyncError>,
    /// Number of attempts made
    pub attempts: u32,
}

impl HttpResponse {
    /// Convert into a `Result`, treating an empty body as `null`
    pub fn into_result(self) -> Result<Value, SyncError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.data.unwrap_or(Value::Null)),
        }
    }
}

/// HTTP client with timeouts, bounded retries and rate limiting
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    semaphore: Arc<Semaphore>,
    last_request: Arc<Mutex<HashMap<String, Instant>>>,
    config: HttpClientConfig,
}

impl HttpClient {
    /// Create a new client
    pub fn new(config: HttpClientConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .user_agent(concat!("integration-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, config))
    }

    /// Create a client around an existing reqwest `Client`
    pub fn with_client(client: Client, config: HttpClientConfig) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.rate_limit.max_concurrent.max(1))),
            last_request: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Issue a request, retrying transient failures
    pub async fn request(&self, url: &str, options: RequestOptions) -> HttpResponse {
        let retries = options.retries.unwrap_or(self.config.retries);
        let timeout = options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.timeout);
        let retry = RetryManager::new(retries, self.config.backoff.clone());

        // The timeout covers queueing for a slot and the rate-limit wait too
        let options = &options;
        let outcome = retry
            .execute(|| async move {
                tokio::time::timeout(timeout, self.send_once(url, options, timeout))
                    .await
                    .unwrap_or(Err(SyncError::Timeout))
            })
            .await;

        match outcome.result {
            Ok((status, data)) => HttpResponse {
                ok: true,
                status: Some(status),
                data,
                error: None,
                attempts: outcome.attempts,
            },
            Err(err) => {
                warn!(
                    url = url,
                    attempts = outcome.attempts,
                    error = %err,
                    "Request failed"
                );
                let status = match &err {
                    SyncError::HttpError(code) => Some(*code),
                    _ => None,
                };
                HttpResponse {
                    ok: false,
                    status,
                    data: None,
                    error: Some(err),
                    attempts: outcome.attempts,
                }
            }
        }
    }

    /// GET with default options
    pub async fn get(&self, url: &str) -> HttpResponse {
        self.request(url, RequestOptions::get()).await
    }

    /// POST a JSON body with default options
    pub async fn post_json(&self, url: &str, body: Value) -> HttpResponse {
        self.request(url, RequestOptions::post_json(body)).await
    }

    /// One attempt: returns the status and decoded body of a 2xx response
    async fn send_once(
        &self,
        url: &str,
        options: &RequestOptions,
        timeout: Duration,
    ) -> Result<(u16, Option<Value>), SyncError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SyncError::Network("HTTP client closed".to_string()))?;

        self.wait_for_rate_limit(url).await;

        let mut request = self
            .client
            .request(options.method.clone(), url)
            .timeout(timeout);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        debug!(url = url, method = %options.method, "Sending HTTP request");

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();

        if !status.is_success() {
            if status.is_server_error() {
                warn!(url = url, status = status.as_u16(), "Server error");
            } else {
                debug!(url = url, status = status.as_u16(), "Request rejected");
            }
            return Err(SyncError::HttpError(status.as_u16()));
        }

        let text = response.text().await.map_err(map_reqwest_error)?;
        debug!(url = url, status = status.as_u16(), body_size = text.len(), "Received response");

        let data = if !options.parse_json {
            Some(Value::String(text))
        } else if text.trim().is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(&text)
                    .map_err(|e| SyncError::InvalidData(format!("Malformed JSON: {}", e)))?,
            )
        };

        Ok((status.as_u16(), data))
    }

    /// Wait for the minimum interval to pass for the URL's host
    async fn wait_for_rate_limit(&self, url: &str) {
        if self.config.rate_limit.min_interval_ms == 0 {
            return;
        }

        let domain = extract_domain(url);
        let min_interval = Duration::from_millis(self.config.rate_limit.min_interval_ms);

        // Reserve the next free slot for this host before sleeping
        let now = Instant::now();
        let slot = {
            let mut last_requests = self.last_request.lock().await;
            let slot = match last_requests.get(&domain) {
                Some(last) => (*last + min_interval).max(now),
                None => now,
            };
            last_requests.insert(domain.clone(), slot);
            slot
        };

        if slot > now {
            let wait_time = slot - now;
            debug!(
                domain = domain,
                wait_ms = wait_time.as_millis() as u64,
                "Waiting for rate limit"
            );
            tokio::time::sleep(wait_time).await;
        }
    }

    /// Client defaults
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Number of free concurrent request slots
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

fn map_reqwest_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout
    } else {
        SyncError::Network(e.to_string())
    }
}

/// Host (with port) portion of a URL, used as the rate-limit key
fn extract_domain(url: &str) -> String {
    url.split("://")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or(url)
        .to_string()
}
