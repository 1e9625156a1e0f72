//! Request and Response models for the relay API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::error::ErrorCode;

/// Incoming relay request from the API Tester tool.
///
/// `url` and `method` are optional at the wire level so a missing field can be
/// answered with a proper error envelope instead of a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequest {
    /// Target URL to request
    #[serde(default)]
    pub url: Option<String>,

    /// HTTP method (GET, POST, PUT, DELETE)
    #[serde(default)]
    pub method: Option<String>,

    /// Custom HTTP headers to send; null values are ignored
    #[serde(default)]
    pub headers: Option<HashMap<String, Option<String>>>,

    /// Request body; strings are sent raw, anything else as JSON
    #[serde(default)]
    pub body: Option<Value>,

    /// Request timeout in seconds for this call
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Response body after content sniffing
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

/// Content classification reported as `contentType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Json,
    Text,
}

impl ResponseBody {
    /// Classify a raw body: anything that parses as JSON is JSON, the rest is text.
    /// The declared content type of the response plays no part.
    pub fn sniff(raw: String) -> Self {
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Text(raw),
        }
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            ResponseBody::Json(_) => ContentKind::Json,
            ResponseBody::Text(_) => ContentKind::Text,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            ResponseBody::Json(value) => value,
            ResponseBody::Text(text) => Value::String(text),
        }
    }
}

/// Envelope for a call that got an HTTP response, whatever its status
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedResponse {
    success: bool,

    /// HTTP status code from the target
    pub status: u16,

    /// Reason phrase for the status
    pub status_text: String,

    /// Elapsed time of the outbound call, e.g. "123 ms"
    pub time: String,

    pub content_type: ContentKind,

    /// Response headers; repeated headers are joined with ", "
    pub headers: BTreeMap<String, String>,

    pub data: Value,
}

impl RelayedResponse {
    pub fn new(
        status: u16,
        status_text: impl Into<String>,
        elapsed_ms: u128,
        headers: BTreeMap<String, String>,
        body: ResponseBody,
    ) -> Self {
        Self {
            success: true,
            status,
            status_text: status_text.into(),
            time: format!("{} ms", elapsed_ms),
            content_type: body.kind(),
            headers,
            data: body.into_value(),
        }
    }
}

/// Envelope for a call that never produced a usable response
#[derive(Debug, Serialize)]
pub struct RelayFailure {
    success: bool,
    pub error: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

impl RelayFailure {
    pub fn new(error: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Result of one relay invocation
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ProxyResult {
    Relayed(RelayedResponse),
    Failed(RelayFailure),
}

impl ProxyResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ProxyResult::Relayed(_))
    }
}

impl From<RelayFailure> for ProxyResult {
    fn from(failure: RelayFailure) -> Self {
        ProxyResult::Failed(failure)
    }
}

/// One tool invocation stored for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(rename = "_id")]
    pub id: String,
    pub tool_name: String,
    pub input: Value,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(tool_name: impl Into<String>, input: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            input,
            timestamp: Utc::now(),
        }
    }
}

/// Body of `POST /history`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveHistoryRequest {
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: &'static str,
}

impl MessageResponse {
    pub fn ok(message: &'static str) -> Self {
        Self {
            success: true,
            message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryListResponse {
    pub success: bool,
    pub message: &'static str,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryDeleteResponse {
    pub success: bool,
    pub message: &'static str,
    pub updated_history: Vec<HistoryEntry>,
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,

    /// Service version
    pub version: &'static str,

    /// Whether session tokens can be verified
    pub auth_enabled: bool,
}

impl HealthResponse {
    pub fn new(auth_enabled: bool) -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            auth_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sniff_json_object() {
        let body = ResponseBody::sniff(r#"{"error":"x"}"#.to_string());
        assert_eq!(body, ResponseBody::Json(json!({"error": "x"})));
        assert_eq!(body.kind(), ContentKind::Json);
    }

    #[test]
    fn test_sniff_plain_text() {
        let body = ResponseBody::sniff("plain text".to_string());
        assert_eq!(body, ResponseBody::Text("plain text".to_string()));
    }

    #[test]
    fn test_sniff_scalars_count_as_json() {
        assert_eq!(ResponseBody::sniff("42".into()), ResponseBody::Json(json!(42)));
        assert_eq!(ResponseBody::sniff("null".into()), ResponseBody::Json(Value::Null));
    }

    #[test]
    fn test_sniff_empty_body_is_text() {
        assert_eq!(ResponseBody::sniff(String::new()), ResponseBody::Text(String::new()));
    }

    #[test]
    fn test_relayed_envelope_shape() {
        let result = ProxyResult::Relayed(RelayedResponse::new(
            500,
            "Internal Server Error",
            12,
            BTreeMap::from([("content-type".to_string(), "application/json".to_string())]),
            ResponseBody::Json(json!({"error": "x"})),
        ));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["status"], json!(500));
        assert_eq!(value["statusText"], json!("Internal Server Error"));
        assert_eq!(value["time"], json!("12 ms"));
        assert_eq!(value["contentType"], json!("json"));
        assert_eq!(value["data"], json!({"error": "x"}));
    }

    #[test]
    fn test_failure_envelope_has_null_details() {
        let result: ProxyResult =
            RelayFailure::new(ErrorCode::ConnectionRefused, "Connection refused").into();
        assert!(!result.is_success());
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "success": false,
                "error": "CONNECTION_REFUSED",
                "message": "Connection refused",
                "details": null
            })
        );
    }

    #[test]
    fn test_proxy_request_tolerates_missing_fields() {
        let req: ProxyRequest = serde_json::from_value(json!({"method": "GET"})).unwrap();
        assert!(req.url.is_none());
        assert_eq!(req.method.as_deref(), Some("GET"));

        let req: ProxyRequest = serde_json::from_value(json!({
            "url": "https://example.com",
            "method": "POST",
            "headers": {"Content-Type": null, "X-Trace": "1"},
        }))
        .unwrap();
        let headers = req.headers.unwrap();
        assert_eq!(headers.get("Content-Type"), Some(&None));
        assert_eq!(headers.get("X-Trace"), Some(&Some("1".to_string())));
    }

    #[test]
    fn test_history_entry_uses_mongo_style_id() {
        let entry = HistoryEntry::new("API Tester", json!({"url": "https://example.com"}));
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value["_id"].is_string());
        assert_eq!(value["toolName"], json!("API Tester"));
    }
}
