mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{send, session_cookie, state, test_config};
use devkit_relay::build_router;

#[tokio::test]
async fn history_requires_a_session() {
    let state = state(test_config());
    let (status, body) = send(build_router(state), "GET", "/history", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], json!("UNAUTHORIZED"));
}

#[tokio::test]
async fn history_rejects_forged_tokens() {
    let state = state(test_config());
    let (status, _) = send(
        build_router(state),
        "GET",
        "/history",
        None,
        Some("authToken=not.a.jwt"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn history_unavailable_without_secret() {
    let mut config = test_config();
    config.jwt_secret = None;
    let state = state(config);
    let cookie = session_cookie("user-1");
    let (status, _) = send(build_router(state), "GET", "/history", None, Some(&cookie)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn save_list_and_delete() {
    let state = state(test_config());
    let cookie = session_cookie("user-1");

    let (status, body) = send(
        build_router(state.clone()),
        "POST",
        "/history",
        Some(json!({ "toolName": "URL Encoder", "input": "a b&c" }).to_string()),
        Some(&cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], json!("Saved to history"));

    let (status, body) = send(
        build_router(state.clone()),
        "GET",
        "/history",
        None,
        Some(&cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["toolName"], json!("URL Encoder"));
    assert_eq!(history[0]["input"], json!("a b&c"));
    let id = history[0]["_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        build_router(state.clone()),
        "DELETE",
        &format!("/history/{}", id),
        None,
        Some(&cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updatedHistory"], json!([]));

    let (status, _) = send(
        build_router(state),
        "DELETE",
        &format!("/history/{}", id),
        None,
        Some(&cookie),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn history_is_scoped_per_user() {
    let state = state(test_config());

    send(
        build_router(state.clone()),
        "POST",
        "/history",
        Some(json!({ "toolName": "Regex Tester", "input": { "pattern": "a+" } }).to_string()),
        Some(&session_cookie("alice")),
    )
    .await;

    let (_, body) = send(
        build_router(state),
        "GET",
        "/history",
        None,
        Some(&session_cookie("bob")),
    )
    .await;
    assert_eq!(body["history"], json!([]));
}

#[tokio::test]
async fn save_requires_tool_name() {
    let state = state(test_config());
    let (status, body) = send(
        build_router(state),
        "POST",
        "/history",
        Some(json!({ "input": {} }).to_string()),
        Some(&session_cookie("user-1")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("toolName is required"));
}
