use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use stallplass_storage::Database;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::auth::{AccessClaims, Role};
use crate::router::AppState;
use crate::telemetry;

pub const TEST_SECRET: &[u8] = b"test-secret";

/// Migrated state on a throwaway database with the clock fixed at 2024-06-01.
pub async fn setup_state() -> (AppState, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("app.db").display());
    let storage = Database::connect(&url).await.expect("connect");
    storage.run_migrations().await.expect("migrations");

    let metrics = telemetry::init_metrics().expect("metrics init");
    let state = AppState::new(metrics, storage, TEST_SECRET, 60).with_clock(Arc::new(|| {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }));
    (state, dir)
}

/// `Authorization` header value for a token signed with [`TEST_SECRET`].
pub fn bearer(user_id: &str, admin: bool) -> String {
    let claims = AccessClaims {
        sub: user_id.to_string(),
        exp: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap().timestamp(),
        nbf: None,
        role: if admin { Role::Admin } else { Role::User },
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET),
    )
    .expect("encode token");
    format!("Bearer {token}")
}

pub fn request(
    method: Method,
    uri: &str,
    authorization: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

/// Sends the request and decodes the body as JSON; empty bodies become `null`.
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("handler should respond");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should read")
        .to_bytes();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}
