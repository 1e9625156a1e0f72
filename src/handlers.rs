//! HTTP route handlers for the dashboard API

use axum::{
    extract::{rejection::JsonRejection, FromRef, Path, State},
    Json,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::{
    auth::{AuthGate, AuthState, AuthUser, MaybeAuthUser},
    config::Config,
    error::ApiError,
    history::{record_in_background, HistoryError, HistoryStore, InMemoryHistoryStore},
    models::{
        HealthResponse, HistoryDeleteResponse, HistoryEntry, HistoryListResponse,
        MessageResponse, ProxyRequest, ProxyResult, SaveHistoryRequest,
    },
    relay::{Relay, RelayCall},
};

/// Tool name recorded for relayed calls
pub const API_TESTER_TOOL: &str = "API Tester";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub relay: Arc<Relay>,
    pub semaphore: Arc<Semaphore>,
    pub history: Arc<dyn HistoryStore>,
    pub auth: AuthState,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, String> {
        let history = Arc::new(InMemoryHistoryStore::new(config.history_limit));
        Self::with_history(config, history)
    }

    /// Build state around a caller-provided history store
    pub fn with_history(config: Config, history: Arc<dyn HistoryStore>) -> Result<Self, String> {
        let relay = Arc::new(Relay::new(config.clone())?);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        let auth = AuthState(
            config
                .jwt_secret
                .as_deref()
                .map(|secret| Arc::new(AuthGate::new(secret.as_bytes()))),
        );
        Ok(Self {
            config,
            relay,
            semaphore,
            history,
            auth,
        })
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| {
            ApiError::invalid_request(format!("Invalid request body: {}", rejection.body_text()))
        })
}

impl From<HistoryError> for ApiError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::NotFound(_) => ApiError::not_found("History entry not found"),
            HistoryError::Backend(msg) => {
                error!(error = %msg, "History store failure");
                ApiError::internal("Internal server error")
            }
        }
    }
}

/// GET /health - Health check endpoint
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::new(state.auth.0.is_some()))
}

/// POST /api/proxy - Relay an HTTP request on behalf of the API Tester.
///
/// The wrapper status reflects only problems with this request itself. Whatever
/// happens to the outbound call is reported inside the returned envelope.
pub async fn proxy_handler(
    State(state): State<AppState>,
    MaybeAuthUser(user): MaybeAuthUser,
    payload: Result<Json<ProxyRequest>, JsonRejection>,
) -> Result<Json<ProxyResult>, ApiError> {
    if state.config.require_auth && user.is_none() {
        return Err(ApiError::unauthorized("Unauthorized user"));
    }

    let call = RelayCall::from_request(json_body(payload)?)?;

    // Acquire semaphore permit for concurrency limiting
    let _permit = state
        .semaphore
        .acquire()
        .await
        .map_err(|_| ApiError::unavailable("Service unavailable"))?;

    let result = state.relay.execute(&call).await;

    if let (Some(user), true) = (user, result.is_success()) {
        record_in_background(
            state.history.clone(),
            user.user_id,
            HistoryEntry::new(API_TESTER_TOOL, call.history_input()),
        );
    }

    Ok(Json(result))
}

/// POST /history - Save a tool invocation
pub async fn save_history_handler(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<SaveHistoryRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let req = json_body(payload)?;
    let tool_name = req
        .tool_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ApiError::invalid_request("toolName is required"))?;

    info!(user = %user.user_id, tool = %tool_name, "Saving history entry");
    state
        .history
        .append(&user.user_id, HistoryEntry::new(tool_name, req.input))
        .await?;

    Ok(Json(MessageResponse::ok("Saved to history")))
}

/// GET /history - List the caller's history
pub async fn list_history_handler(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<HistoryListResponse>, ApiError> {
    let history = state.history.list(&user.user_id).await?;
    Ok(Json(HistoryListResponse {
        success: true,
        message: "Successfully retrieved",
        history,
    }))
}

/// DELETE /history/{historyId} - Remove one entry
pub async fn delete_history_handler(
    State(state): State<AppState>,
    user: AuthUser,
    Path(history_id): Path<String>,
) -> Result<Json<HistoryDeleteResponse>, ApiError> {
    let updated_history = state
        .history
        .delete(&user.user_id, &history_id)
        .await
        .inspect_err(|e| warn!(user = %user.user_id, error = %e, "History delete failed"))?;

    Ok(Json(HistoryDeleteResponse {
        success: true,
        message: "History entry deleted successfully!",
        updated_history,
    }))
}
