//! Tests for the HTTP client module

use super::*;
use crate::error::Error;
use crate::quota::{Governors, QuotaPolicy};
use crate::types::BackoffType;
use reqwest::Method;
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(max_attempts: u32) -> HttpClient {
    let config = HttpClientConfig::builder()
        .timeout(Duration::from_millis(200))
        .max_attempts(max_attempts)
        .backoff(
            BackoffType::Exponential,
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
        .no_rate_limit()
        .build();
    HttpClient::with_config(config).unwrap()
}

#[test]
fn test_http_client_config_default() {
    let config = HttpClientConfig::default();
    assert_eq!(config.timeout, Duration::from_secs(300));
    assert_eq!(config.max_attempts, 10);
    assert_eq!(config.backoff_type, BackoffType::Exponential);
    assert!(config.rate_limit.is_some());
}

#[test]
fn test_http_client_config_builder() {
    let config = HttpClientConfig::builder()
        .timeout(Duration::from_secs(60))
        .max_attempts(0)
        .backoff(
            BackoffType::Linear,
            Duration::from_millis(200),
            Duration::from_secs(30),
        )
        .header("X-Custom", "value")
        .build();

    assert_eq!(config.timeout, Duration::from_secs(60));
    assert_eq!(config.max_attempts, 1);
    assert_eq!(config.backoff_type, BackoffType::Linear);
    assert_eq!(config.initial_backoff, Duration::from_millis(200));
    assert_eq!(
        config.default_headers.get("X-Custom"),
        Some(&"value".to_string())
    );
}

#[test]
fn test_request_config_builder() {
    let config = RequestConfig::new()
        .query("q", "SELECT Id FROM Account")
        .header("X-Request-Id", "abc123")
        .text("text/csv", "SELECT Id FROM Account")
        .timeout(Duration::from_secs(10));

    assert_eq!(
        config.query,
        vec![("q".to_string(), "SELECT Id FROM Account".to_string())]
    );
    assert_eq!(
        config.headers.get("Content-Type"),
        Some(&"text/csv".to_string())
    );
    assert!(matches!(config.body, Some(RequestBody::Text(_))));
    assert_eq!(config.timeout, Some(Duration::from_secs(10)));
}

#[test]
fn test_calculate_backoff_exponential() {
    let config = HttpClientConfig::builder()
        .backoff(
            BackoffType::Exponential,
            Duration::from_millis(100),
            Duration::from_secs(1),
        )
        .build();
    let client = HttpClient::with_config(config).unwrap();

    assert_eq!(client.calculate_backoff(0), Duration::from_millis(100));
    assert_eq!(client.calculate_backoff(1), Duration::from_millis(200));
    assert_eq!(client.calculate_backoff(3), Duration::from_millis(800));
    assert_eq!(client.calculate_backoff(4), Duration::from_secs(1));
    assert_eq!(client.calculate_backoff(40), Duration::from_secs(1));
}

#[tokio::test]
async fn test_send_json_with_query_and_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/services/async/41.0/job"))
        .and(header("X-SFDC-Session", "token"))
        .and(query_param("flag", "1"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "750x"})))
        .mount(&mock_server)
        .await;

    let client = test_client(3);
    let config = RequestConfig::new()
        .header("X-SFDC-Session", "token")
        .query("flag", "1")
        .json(serde_json::json!({"operation": "queryAll"}));
    let body: serde_json::Value = client
        .post_json(&format!("{}/services/async/41.0/job", mock_server.uri()), &config)
        .await
        .unwrap();

    assert_eq!(body["id"], "750x");
}

#[tokio::test]
async fn test_send_text_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/batch"))
        .and(header("Content-Type", "text/csv"))
        .and(body_string("SELECT Id FROM Account"))
        .respond_with(ResponseTemplate::new(201).set_body_string("<batchInfo/>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(3);
    let config = RequestConfig::new().text("text/csv", "SELECT Id FROM Account");
    let text = client
        .send_text(Method::POST, &format!("{}/batch", mock_server.uri()), &config)
        .await
        .unwrap();

    assert_eq!(text, "<batchInfo/>");
}

#[tokio::test]
async fn test_error_status_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(503).set_body_string(r#"[{"errorCode":"SERVER_UNAVAILABLE"}]"#),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(5);
    let err = client
        .send(Method::GET, &mock_server.uri(), &RequestConfig::new())
        .await
        .unwrap_err();

    match err {
        Error::HttpStatus { status, ref body } => {
            assert_eq!(status, 503);
            assert!(body.contains("SERVER_UNAVAILABLE"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_timeout_is_retried_until_exhausted() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = test_client(3);
    let err = client
        .send(Method::GET, &mock_server.uri(), &RequestConfig::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TransientNetwork { attempts: 3, .. }));
}

#[tokio::test]
async fn test_connect_failure_is_retried() {
    let client = test_client(2);
    let err = client
        .send(Method::GET, "http://127.0.0.1:1/", &RequestConfig::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TransientNetwork { attempts: 2, .. }));
}

#[tokio::test]
async fn test_malformed_json_is_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"records\": [tru"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"done": true})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(3);
    let body: serde_json::Value = client
        .get_json(&mock_server.uri(), &RequestConfig::new())
        .await
        .unwrap();

    assert_eq!(body["done"], true);
}

#[tokio::test]
async fn test_malformed_json_exhausts_attempts() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = test_client(2);
    let err = client
        .get_json::<serde_json::Value>(&mock_server.uri(), &RequestConfig::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TransientNetwork { attempts: 2, .. }));
}

#[tokio::test]
async fn test_limit_info_header_is_accounted() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Sforce-Limit-Info", "api-usage=10/1000")
                .set_body_json(serde_json::json!({})),
        )
        .mount(&mock_server)
        .await;

    let governors = Governors::new(QuotaPolicy::default());
    let client = test_client(1).with_governors(governors.clone());

    for _ in 0..3 {
        client
            .get_json::<serde_json::Value>(&mock_server.uri(), &RequestConfig::new())
            .await
            .unwrap();
    }

    assert_eq!(governors.rest.attempted(), 3);
    assert_eq!(governors.bulk.attempted(), 0);
}

#[tokio::test]
async fn test_response_without_limit_info_is_not_counted() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/bulk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .mount(&mock_server)
        .await;

    let governors = Governors::new(QuotaPolicy::default());
    let client = test_client(1).with_governors(governors.clone());

    for _ in 0..5 {
        client
            .get_json::<serde_json::Value>(
                &format!("{}/bulk", mock_server.uri()),
                &RequestConfig::new(),
            )
            .await
            .unwrap();
    }
    client
        .send(
            Method::GET,
            &format!("{}/missing", mock_server.uri()),
            &RequestConfig::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(governors.rest.attempted(), 0);
    assert!(!governors.rest.is_tripped());
}

#[tokio::test]
async fn test_tripped_quota_blocks_further_requests() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Sforce-Limit-Info", "api-usage=81/100")
                .set_body_json(serde_json::json!({})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let governors = Governors::new(QuotaPolicy::new(25.0, 80.0));
    let client = test_client(3).with_governors(governors.clone());

    let err = client
        .get_json::<serde_json::Value>(&mock_server.uri(), &RequestConfig::new())
        .await
        .unwrap_err();
    assert!(err.is_run_fatal());

    // The next call fails before any request is issued
    let err = client
        .send(Method::GET, &mock_server.uri(), &RequestConfig::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::QuotaExceeded { .. }));
}

#[tokio::test]
async fn test_tripped_bulk_governor_blocks_rest_calls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let governors = Governors::new(QuotaPolicy::new(25.0, 80.0));
    governors
        .bulk
        .check_before_run(Some(&crate::quota::QuotaSnapshot::new(0, 100)))
        .unwrap_err();

    let client = test_client(3).with_governors(governors);
    let err = client
        .send(Method::GET, &mock_server.uri(), &RequestConfig::new())
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Bulk API quota exceeded"));
}
