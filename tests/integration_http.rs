//! Resilient HTTP client integration tests

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use integration_sync::config::{Config, RateLimitConfig};
use integration_sync::error::SyncError;
use integration_sync::sync::{BackoffSchedule, HttpClient, HttpClientConfig, RequestOptions};

fn client(retries: u32) -> HttpClient {
    HttpClient::new(HttpClientConfig {
        retries,
        backoff: BackoffSchedule::from_millis(&[20]),
        ..HttpClientConfig::default()
    })
    .unwrap()
}

/// Test 1: Two 503s then 200 succeeds on the third attempt
#[tokio::test]
async fn test_retries_server_errors_until_success() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&mock_server)
        .await;

    let response = client(2)
        .get(&format!("{}/flaky", mock_server.uri()))
        .await;

    assert!(response.ok);
    assert_eq!(response.status, Some(200));
    assert_eq!(response.attempts, 3);
    assert_eq!(response.data, Some(json!({"ok": true})));
}

/// Test 2: Client errors are returned after a single attempt
#[tokio::test]
async fn test_client_error_not_retried() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = client(2)
        .get(&format!("{}/missing", mock_server.uri()))
        .await;

    assert!(!response.ok);
    assert_eq!(response.attempts, 1);
    assert_eq!(response.error, Some(SyncError::HttpError(404)));
}

/// Test 3: Per-request timeout overrides the client default
#[tokio::test]
async fn test_request_timeout_override() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = client(2)
        .request(
            &format!("{}/slow", mock_server.uri()),
            RequestOptions::get().timeout_ms(50).retries(0),
        )
        .await;

    assert_eq!(response.error, Some(SyncError::Timeout));
    assert_eq!(response.attempts, 1);
    assert_eq!(response.status, None);
}

/// Test 4: Client built from config spaces requests to the same host
#[tokio::test]
async fn test_client_from_config_rate_limits_per_host() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(3)
        .mount(&mock_server)
        .await;

    let config = Config::from_yaml(
        r#"
http:
  timeout_ms: 2000
  retries: 0
  rate_limit:
    min_interval_ms: 100
    max_concurrent: 2
"#,
    )
    .unwrap();
    assert_eq!(
        config.http.rate_limit,
        RateLimitConfig {
            min_interval_ms: 100,
            max_concurrent: 2
        }
    );

    let http = Arc::new(HttpClient::new(HttpClientConfig::from(&config.http)).unwrap());
    assert_eq!(http.available_permits(), 2);

    let started = Instant::now();
    let mut handles = Vec::new();
    for i in 0..3 {
        let http = http.clone();
        let url = format!("{}/item/{}", mock_server.uri(), i);
        handles.push(tokio::spawn(async move { http.get(&url).await }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().ok);
    }

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(http.available_permits(), 2);
}
