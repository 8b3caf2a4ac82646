//! Tests for the auth module

use super::*;
use crate::config::Config;
use crate::error::Error;
use crate::http::{HttpClient, HttpClientConfig};
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> HttpClient {
    HttpClient::with_config(HttpClientConfig::builder().no_rate_limit().build()).unwrap()
}

#[test]
fn test_credentials_prefer_access_token() {
    let mut config = Config::new("2024-01-01").with_session("https://x.my.salesforce.com", "tok");
    config.client_id = Some("id".to_string());

    assert_eq!(
        Credentials::from_config(&config).unwrap(),
        Credentials::AccessToken {
            instance_url: "https://x.my.salesforce.com".to_string(),
            access_token: "tok".to_string(),
        }
    );
}

#[test]
fn test_credentials_refresh_token() {
    let mut config = Config::new("2024-01-01");
    config.client_id = Some("id".to_string());
    config.client_secret = Some("secret".to_string());
    config.refresh_token = Some("refresh".to_string());
    config.is_sandbox = true;

    let creds = Credentials::from_config(&config).unwrap();
    assert!(matches!(creds, Credentials::RefreshToken { is_sandbox: true, .. }));
}

#[test]
fn test_credentials_missing_field() {
    let mut config = Config::new("2024-01-01");
    config.client_id = Some("id".to_string());
    config.client_secret = Some("  ".to_string());

    let err = Credentials::from_config(&config).unwrap_err();
    assert!(matches!(err, Error::MissingConfigField { ref field } if field == "client_secret"));
}

#[test]
fn test_session_urls_and_headers() {
    let session = Session::new("https://x.my.salesforce.com/", "tok", "41.0");

    assert_eq!(
        session.data_url("/queryAll"),
        "https://x.my.salesforce.com/services/data/v41.0/queryAll"
    );
    assert_eq!(
        session.bulk_url("job/750x"),
        "https://x.my.salesforce.com/services/async/41.0/job/750x"
    );
    assert_eq!(
        session.rest_request().headers.get("Authorization"),
        Some(&"Bearer tok".to_string())
    );
    assert_eq!(
        session.bulk_request().headers.get("X-SFDC-Session"),
        Some(&"tok".to_string())
    );
    assert!(!format!("{session:?}").contains("tok\""));
}

#[tokio::test]
async fn test_login_with_access_token_makes_no_request() {
    let creds = Credentials::AccessToken {
        instance_url: "https://x".to_string(),
        access_token: "tok".to_string(),
    };
    let session = Authenticator::new(client()).login(&creds, "41.0").await.unwrap();
    assert_eq!(session.instance_url(), "https://x");
}

#[tokio::test]
async fn test_login_with_refresh_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .and(header("Content-Type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=r%2Ft"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "00Dxx!abc",
            "instance_url": "https://na1.salesforce.com",
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let creds = Credentials::RefreshToken {
        client_id: "id".to_string(),
        client_secret: "secret".to_string(),
        refresh_token: "r/t".to_string(),
        is_sandbox: false,
    };
    let session = Authenticator::new(client())
        .with_login_url(mock_server.uri())
        .login(&creds, "52.0")
        .await
        .unwrap();

    assert_eq!(session.instance_url(), "https://na1.salesforce.com");
    assert_eq!(session.api_version(), "52.0");
}

#[tokio::test]
async fn test_login_rejected() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "expired access/refresh token"
        })))
        .mount(&mock_server)
        .await;

    let creds = Credentials::RefreshToken {
        client_id: "id".to_string(),
        client_secret: "secret".to_string(),
        refresh_token: "old".to_string(),
        is_sandbox: true,
    };
    let err = Authenticator::new(client())
        .with_login_url(mock_server.uri())
        .login(&creds, "41.0")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Auth { .. }));
    assert!(err.to_string().contains("invalid_grant"));
}
