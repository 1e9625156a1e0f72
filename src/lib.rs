//! devkit-relay - backend for the developer tools dashboard
//!
//! Relays arbitrary HTTP requests for the browser's API Tester tool, wrapping
//! every outcome in a uniform envelope, and keeps a per-user history of tool
//! invocations behind a session-token gate.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod history;
pub mod models;
pub mod relay;
pub mod validation;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::handlers::{
    delete_history_handler, health_handler, list_history_handler, proxy_handler,
    save_history_handler, AppState,
};

/// Create the timeout layer (separate function to allow #[allow(deprecated)])
#[allow(deprecated)]
fn create_timeout_layer(timeout_secs: u64) -> tower_http::timeout::TimeoutLayer {
    tower_http::timeout::TimeoutLayer::new(Duration::from_secs(timeout_secs))
}

/// Credentialed CORS for the dashboard origin. An unparseable origin
/// disables cross-origin access instead of opening it up.
fn create_cors_layer(origin: &str) -> CorsLayer {
    match HeaderValue::from_str(origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        Err(_) => {
            warn!(origin = %origin, "Invalid CORS_ORIGIN, cross-origin requests disabled");
            CorsLayer::new()
        }
    }
}

/// Build the application router with all layers applied.
///
/// Layers are applied bottom-up, so the last layer added is the outermost.
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/proxy", post(proxy_handler))
        .route(
            "/history",
            get(list_history_handler).post(save_history_handler),
        )
        .route("/history/{history_id}", delete(delete_history_handler))
        .with_state(state)
        // Limit request body size (protects against large payload attacks)
        .layer(DefaultBodyLimit::max(config.max_request_body_size))
        .layer(create_cors_layer(&config.cors_origin))
        // Request tracing
        .layer(TraceLayer::new_for_http())
        // Server-side request timeout (protects against slow clients)
        .layer(create_timeout_layer(config.server_timeout))
}
