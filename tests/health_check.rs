//! Integration tests for the health endpoint

use std::net::TcpListener;
use std::sync::Arc;

use expense_auth::auth::{AuthService, BcryptHasher};
use expense_auth::configuration::JwtSettings;
use expense_auth::ledger::InMemoryLedger;
use expense_auth::startup::run;
use expense_auth::users::InMemoryUserDirectory;

fn spawn_app() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let auth_service = AuthService::new(
        Arc::new(InMemoryLedger::new()),
        Arc::new(InMemoryUserDirectory::new()),
        Arc::new(BcryptHasher::new(4)),
        JwtSettings {
            access_secret: "access".to_string(),
            refresh_secret: "refresh".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 604_800,
            issuer: "test".to_string(),
        },
    )
    .expect("Invalid test settings");

    let server = run(listener, auth_service).expect("Failed to create server");
    let _ = tokio::spawn(server);

    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn health_check_works() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/health_check", addr))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn unknown_route_is_404() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/expenses", addr))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(404, response.status().as_u16());
}
