#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use jsonwebtoken::{EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

use devkit_relay::{build_router, config::Config, handlers::AppState};

pub const SECRET: &str = "integration-test-secret";

/// Config for tests: the mock origins listen on loopback, so SSRF blocking is off.
pub fn test_config() -> Config {
    let mut config = Config::from_env();
    config.allow_private_ips = true;
    config.default_timeout = 10;
    config.max_redirects = 5;
    config.jwt_secret = Some(SECRET.to_string());
    config.require_auth = false;
    config.history_limit = 100;
    config
}

pub fn state(config: Config) -> AppState {
    AppState::new(config).unwrap()
}

pub fn session_cookie(user_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = json!({
        "user": { "_id": user_id, "username": "tester", "history": [] },
        "iat": now,
        "exp": now + 3600,
    });
    let token = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    format!("authToken={}", token)
}

/// Send a request to the app and return (status, JSON body).
pub async fn send(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<String>,
    cookie: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if body.is_some() {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
    }
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let request = builder
        .body(body.map(Body::from).unwrap_or_else(Body::empty))
        .unwrap();

    let resp = app.oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

pub async fn relay(state: &AppState, payload: Value) -> (StatusCode, Value) {
    send(
        build_router(state.clone()),
        "POST",
        "/api/proxy",
        Some(payload.to_string()),
        None,
    )
    .await
}
