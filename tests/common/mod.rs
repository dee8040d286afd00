//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kasabot::checkbox::{CheckboxClient, ClientConfig, Credentials};
use kasabot::core::retry::RetryPolicy;
use kasabot::storage::{create_pool, DbPool};

/// Fresh database in a temp directory. Keep the `TempDir` alive for the test.
pub fn temp_pool() -> (TempDir, DbPool) {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("kasabot.db");
    let pool = create_pool(db_path.to_str().expect("utf-8 path")).expect("pool");
    (dir, pool)
}

/// Fiscal client pointed at a mock server, with fast retries.
pub fn checkbox_client(server: &MockServer) -> CheckboxClient {
    let mut config = ClientConfig::new(&server.uri(), Credentials::Pin("1234".to_string())).expect("config");
    config.license = Some("test-license".to_string());
    config.retry = RetryPolicy::new()
        .max_attempts(3)
        .initial_timeout(Duration::from_secs(2))
        .pause(Duration::ZERO);
    CheckboxClient::new(config).expect("client")
}

/// PIN sign-in and the cashier profile.
pub async fn mount_sign_in(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/cashier/signinPinCode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token_type": "bearer",
            "access_token": "test-token"
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/cashier/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "full_name": "Тест Касир",
            "signature_type": "AGENT"
        })))
        .mount(server)
        .await;
}

pub async fn mount_signature(server: &MockServer, online: bool) {
    Mock::given(method("GET"))
        .and(path("/api/v1/cashier/check-signature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "online": online })))
        .mount(server)
        .await;
}

pub fn opened_shift(balance: i64) -> serde_json::Value {
    serde_json::json!({
        "id": "shift-1",
        "status": "OPENED",
        "balance": { "balance": balance, "cash_sales": balance }
    })
}
