mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use citizen_registry_api::api;
use citizen_registry_api::config::Config;
use citizen_registry_api::db::{ConnectionManager, DatabaseSettings};
use citizen_registry_api::handlers::AppState;
use common::{settings, targets, FakeConnector, FakeResolver};

fn config(database: DatabaseSettings, debug_endpoints: bool) -> Config {
    let mut config = Config::from_lookup(|key: &str| match key {
        "MYSQLUSER" => Some("registry".to_string()),
        _ => None,
    })
    .unwrap();
    config.database = database;
    config.debug_endpoints = debug_endpoints;
    config
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn connected_app(debug_endpoints: bool) -> Router {
    let database = settings(targets(None, Some("a.db"), None), 2, Some(1));
    let db = ConnectionManager::new(
        database.clone(),
        FakeConnector::with_reachable(&["a.db"]),
        FakeResolver::default(),
    );
    db.establish().await.unwrap();
    api::status_app(Arc::new(AppState::new(db, config(database, debug_endpoints))))
}

#[tokio::test(start_paused = true)]
async fn health_is_ok_when_the_liveness_query_answers() {
    let (status, body) = get(connected_app(false).await, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");
    assert_eq!(body["state"], "connected");
}

#[tokio::test(start_paused = true)]
async fn health_is_503_once_the_manager_is_fatal() {
    let database = settings(targets(None, Some("a.db"), None), 2, Some(1));
    let db = ConnectionManager::new(
        database.clone(),
        FakeConnector::default(),
        FakeResolver::default(),
    );
    assert!(db.establish().await.is_err());
    let app = api::status_app(Arc::new(AppState::new(db, config(database, false))));

    let (status, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "error");
    assert_eq!(body["state"], "fatal");
}

#[tokio::test(start_paused = true)]
async fn root_reports_service_and_active_host() {
    let (status, body) = get(connected_app(false).await, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "citizen-registry-api");
    assert_eq!(body["status"], "running");
    assert_eq!(body["active_host"], "a.db:3306");
    assert_eq!(body["database_name"], "railway");
}

#[tokio::test(start_paused = true)]
async fn debug_endpoint_never_exposes_credentials() {
    let app = connected_app(true).await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/debug/connection")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(!text.contains("s3cret-password"));

    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["state"], "connected");
    let candidate = &body["candidates"][0];
    assert_eq!(candidate["source"], "last_known_good");
    assert_eq!(candidate["has_user"], true);
    assert_eq!(candidate["has_password"], true);
    assert!(candidate.get("password").is_none());
    assert!(candidate.get("user").is_none());
}

#[tokio::test(start_paused = true)]
async fn debug_endpoint_is_absent_unless_enabled() {
    let (status, _) = get(connected_app(false).await, "/debug/connection").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
