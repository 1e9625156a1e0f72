//! Error types and error codes for the relay service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Machine codes carried by error bodies and failed relay envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Outbound call timed out
    Timeout,
    /// DNS resolution failed
    DnsError,
    /// SSL/TLS error
    TlsError,
    /// Target actively refused the connection
    ConnectionRefused,
    /// Any other connect-phase failure
    ConnectionError,
    /// Redirect limit exceeded
    TooManyRedirects,
    /// Failed while reading the response body
    BodyError,
    /// Response body exceeded the configured limit
    ResponseTooLarge,
    /// Target URL could not be parsed or uses an unsupported scheme
    InvalidUrl,
    /// Target resolves to a blocked (internal) address
    BlockedDestination,
    /// Caller header name or value is not valid HTTP
    InvalidHeader,
    /// Unclassified transport failure
    NetworkError,
    /// Invalid request parameters
    InvalidRequest,
    /// Missing or invalid session
    Unauthorized,
    /// Referenced resource does not exist
    NotFound,
    /// Service is shutting down or saturated
    Unavailable,
    /// Unknown/internal error
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::DnsError => "DNS_ERROR",
            ErrorCode::TlsError => "TLS_ERROR",
            ErrorCode::ConnectionRefused => "CONNECTION_REFUSED",
            ErrorCode::ConnectionError => "CONNECTION_ERROR",
            ErrorCode::TooManyRedirects => "TOO_MANY_REDIRECTS",
            ErrorCode::BodyError => "BODY_ERROR",
            ErrorCode::ResponseTooLarge => "RESPONSE_TOO_LARGE",
            ErrorCode::InvalidUrl => "INVALID_URL",
            ErrorCode::BlockedDestination => "BLOCKED_DESTINATION",
            ErrorCode::InvalidHeader => "INVALID_HEADER",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Unavailable => "UNAVAILABLE",
            ErrorCode::Internal => "INTERNAL",
        };
        f.write_str(code)
    }
}

/// Error body returned with a non-2xx wrapper status
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: ErrorCode,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            success: false,
            error: error.into(),
            code,
        }
    }
}

/// Service-level error with HTTP status code.
///
/// Only problems with the relay's own input or state surface this way; failures of
/// the outbound call are reported inside a [`crate::models::ProxyResult`] instead.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub response: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            status,
            response: ErrorResponse::new(error, code),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, ErrorCode::InvalidRequest)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message, ErrorCode::Unauthorized)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message, ErrorCode::NotFound)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message,
            ErrorCode::Unavailable,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            ErrorCode::Internal,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.response.code, self.response.error)
    }
}

impl std::error::Error for ApiError {}

/// Raised by the redirect policy and DNS resolver when a hop or resolved
/// address falls in a blocked range
#[derive(Debug)]
pub struct DestinationBlocked(pub String);

impl fmt::Display for DestinationBlocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "destination blocked: {}", self.0)
    }
}

impl std::error::Error for DestinationBlocked {}

/// Classify reqwest errors into envelope error codes
pub fn classify_reqwest_error(err: &reqwest::Error) -> (ErrorCode, String) {
    if let Some(blocked) = find_blocked_destination(err) {
        return (ErrorCode::BlockedDestination, blocked);
    }

    let message = error_chain_message(err);
    let lower = message.to_lowercase();

    if err.is_timeout() {
        (ErrorCode::Timeout, format!("Request timed out: {}", message))
    } else if err.is_redirect() {
        (
            ErrorCode::TooManyRedirects,
            format!("Redirect limit exceeded: {}", message),
        )
    } else if err.is_connect() {
        // The connector folds several failure classes into one kind
        if lower.contains("dns") || lower.contains("resolve") || lower.contains("getaddrinfo") {
            (
                ErrorCode::DnsError,
                format!("DNS resolution failed: {}", message),
            )
        } else if lower.contains("ssl") || lower.contains("tls") || lower.contains("certificate") {
            (ErrorCode::TlsError, format!("TLS error: {}", message))
        } else if lower.contains("refused") {
            (
                ErrorCode::ConnectionRefused,
                format!("Connection refused: {}", message),
            )
        } else {
            (
                ErrorCode::ConnectionError,
                format!("Connection error: {}", message),
            )
        }
    } else if err.is_body() || err.is_decode() {
        (
            ErrorCode::BodyError,
            format!("Failed to read response body: {}", message),
        )
    } else if err.is_builder() {
        (ErrorCode::InvalidUrl, format!("Invalid request: {}", message))
    } else {
        (ErrorCode::NetworkError, message)
    }
}

/// Reason text of a [`DestinationBlocked`] anywhere in the source chain.
/// Layers that re-box the error can hide the type, so the rendered text is
/// checked as well.
fn find_blocked_destination(err: &(dyn std::error::Error + 'static)) -> Option<String> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(blocked) = e.downcast_ref::<DestinationBlocked>() {
            return Some(blocked.0.clone());
        }
        current = e.source();
    }

    let message = error_chain_message(err);
    message
        .find("destination blocked: ")
        .map(|at| message[at + "destination blocked: ".len()..].to_string())
}

/// Flatten an error and its sources into one line, so the root cause
/// (e.g. "Connection refused (os error 111)") reaches the caller.
fn error_chain_message(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
