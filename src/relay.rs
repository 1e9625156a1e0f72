//! Outbound call execution for the API Tester relay

use hyper::ext::ReasonPhrase;
use reqwest::{header::HeaderMap, redirect, Client, Method, StatusCode};
use serde_json::{json, Value};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    error::{classify_reqwest_error, ApiError, DestinationBlocked, ErrorCode},
    models::{ProxyRequest, ProxyResult, RelayFailure, RelayedResponse, ResponseBody},
    validation::{
        build_headers, check_destination, encode_body, parse_method, sanitize_url_for_logging,
        should_attach_body, validate_url, GuardedResolver,
    },
};

/// Upper bound for a caller-supplied timeout
const MAX_TIMEOUT_SECS: u64 = 300;

/// Headroom left under the server timeout so the relay answers with its own
/// TIMEOUT envelope before the server layer gives up on the request
const SERVER_TIMEOUT_MARGIN: Duration = Duration::from_millis(500);

/// A relay request that passed input validation
#[derive(Debug, Clone)]
pub struct RelayCall {
    pub url: String,
    pub method: Method,
    pub headers: Option<HashMap<String, Option<String>>>,
    pub body: Option<Value>,
    pub timeout: Option<u64>,
}

impl RelayCall {
    /// Check the required fields. Nothing here touches the network.
    pub fn from_request(req: ProxyRequest) -> Result<Self, ApiError> {
        let url = req.url.filter(|u| !u.is_empty());
        let method = req.method.filter(|m| !m.is_empty());
        let (Some(url), Some(method_name)) = (url, method) else {
            return Err(ApiError::invalid_request("URL and method are required"));
        };

        let method = parse_method(&method_name).ok_or_else(|| {
            ApiError::invalid_request(format!(
                "Unsupported method '{}'. Use GET, POST, PUT or DELETE.",
                method_name
            ))
        })?;

        Ok(Self {
            url,
            method,
            headers: req.headers,
            body: req.body,
            timeout: req.timeout,
        })
    }

    /// What the history store keeps for this call
    pub fn history_input(&self) -> Value {
        json!({
            "method": self.method.as_str(),
            "url": self.url,
            "body": self.body.clone().unwrap_or(Value::Null),
        })
    }
}

/// Executes relay calls over one shared client.
///
/// The client is built once and never reconfigured; everything that varies per
/// call (headers, body, timeout) is set on the request builder.
pub struct Relay {
    client: Client,
    config: Config,
}

impl Relay {
    pub fn new(config: Config) -> Result<Self, String> {
        let mut builder = Client::builder()
            .redirect(redirect_policy(&config))
            .no_proxy();
        if !config.allow_private_ips {
            builder = builder.dns_resolver(Arc::new(GuardedResolver::new(config.clone())));
        }
        let client = builder
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

        Ok(Self { client, config })
    }

    /// Timeout for one call: the caller's value capped at five minutes,
    /// else the configured default, and always kept under the server
    /// timeout. Zero means no relay-imposed timeout beyond that ceiling.
    fn timeout_for(&self, requested: Option<u64>) -> Option<Duration> {
        let secs = match requested {
            Some(t) if t > 0 => t.min(MAX_TIMEOUT_SECS),
            _ => self.config.default_timeout,
        };
        let requested = (secs > 0).then(|| Duration::from_secs(secs));

        let ceiling = (self.config.server_timeout > 0).then(|| {
            Duration::from_secs(self.config.server_timeout)
                .saturating_sub(SERVER_TIMEOUT_MARGIN)
                .max(SERVER_TIMEOUT_MARGIN)
        });

        match (requested, ceiling) {
            (Some(requested), Some(ceiling)) => Some(requested.min(ceiling)),
            (requested, ceiling) => requested.or(ceiling),
        }
    }

    /// Run one relay call. Every outcome, including transport failures,
    /// comes back as an envelope; this never returns an error.
    pub async fn execute(&self, call: &RelayCall) -> ProxyResult {
        let safe_url = sanitize_url_for_logging(&call.url);

        debug!(url = %safe_url, method = %call.method, "Processing relay request");

        let url = match validate_url(&call.url, &self.config) {
            Ok(url) => url,
            Err(failure) => {
                warn!(url = %safe_url, code = %failure.error, "Rejected relay target");
                return failure.into();
            }
        };

        let mut headers = match build_headers(&self.config.default_user_agent, call.headers.as_ref())
        {
            Ok(headers) => headers,
            Err(failure) => return failure.into(),
        };

        let body = match &call.body {
            Some(body) if should_attach_body(&call.method, Some(body)) => {
                Some(encode_body(body, &mut headers))
            }
            _ => None,
        };

        let mut request_builder = self
            .client
            .request(call.method.clone(), url.as_str())
            .headers(headers);
        if let Some(body) = body {
            request_builder = request_builder.body(body);
        }
        if let Some(timeout) = self.timeout_for(call.timeout) {
            request_builder = request_builder.timeout(timeout);
        }

        let start = Instant::now();
        let response = match request_builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let (code, message) = classify_reqwest_error(&e);
                error!(url = %safe_url, error = %e, code = %code, "Relay request failed");
                return RelayFailure::new(code, message).into();
            }
        };

        let status = response.status();
        let status_text = reason_phrase(status, response.extensions().get::<ReasonPhrase>());
        let response_headers = collect_headers(response.headers());

        let body_bytes =
            match read_response_body_with_limit(response, self.config.max_response_body_size)
                .await
            {
                Ok(bytes) => bytes,
                Err(failure) => {
                    warn!(
                        url = %safe_url,
                        status = status.as_u16(),
                        code = %failure.error,
                        "Failed to buffer response body"
                    );
                    return failure
                        .with_details(json!({ "status": status.as_u16() }))
                        .into();
                }
            };
        let elapsed = start.elapsed().as_millis();

        let body = ResponseBody::sniff(String::from_utf8_lossy(&body_bytes).into_owned());

        info!(
            url = %safe_url,
            status = status.as_u16(),
            elapsed_ms = elapsed as u64,
            body_size = body_bytes.len(),
            content = ?body.kind(),
            "Relay request completed"
        );

        ProxyResult::Relayed(RelayedResponse::new(
            status.as_u16(),
            status_text,
            elapsed,
            response_headers,
            body,
        ))
    }
}

/// Redirects are capped at `max_redirects`, and every hop gets the same
/// scheme, hostname and literal-IP checks as the initial target. Hostnames
/// are checked again after resolution by [`GuardedResolver`].
fn redirect_policy(config: &Config) -> redirect::Policy {
    let config = config.clone();
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > config.max_redirects {
            return attempt.error(format!(
                "too many redirects (max: {})",
                config.max_redirects
            ));
        }
        match check_destination(attempt.url(), &config) {
            Ok(()) => attempt.follow(),
            Err(failure) if failure.error == ErrorCode::BlockedDestination => {
                warn!(
                    url = %sanitize_url_for_logging(attempt.url().as_str()),
                    "Refused redirect to blocked destination"
                );
                attempt.error(DestinationBlocked(failure.message))
            }
            // Non-http(s) hop: hand the 3xx back as the response
            Err(_) => attempt.stop(),
        }
    })
}

/// The phrase the target sent on the status line, or the canonical one.
/// HTTP/2 has no wire phrase.
fn reason_phrase(status: StatusCode, wire: Option<&ReasonPhrase>) -> String {
    match wire {
        Some(phrase) => String::from_utf8_lossy(phrase.as_bytes()).into_owned(),
        None => status.canonical_reason().unwrap_or_default().to_string(),
    }
}

/// Flatten response headers; repeated values are joined with ", "
fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut collected: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        collected
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    collected
}

/// Read response body with size limit to prevent OOM
async fn read_response_body_with_limit(
    response: reqwest::Response,
    max_size: usize,
) -> Result<Vec<u8>, RelayFailure> {
    if let Some(content_length) = response.content_length() {
        if content_length > max_size as u64 {
            return Err(too_large(content_length, max_size));
        }
    }

    let body_bytes = response.bytes().await.map_err(|e| {
        let (code, message) = classify_reqwest_error(&e);
        RelayFailure::new(code, message)
    })?;

    if body_bytes.len() > max_size {
        return Err(too_large(body_bytes.len() as u64, max_size));
    }

    Ok(body_bytes.to_vec())
}

fn too_large(size: u64, max_size: usize) -> RelayFailure {
    RelayFailure::new(
        ErrorCode::ResponseTooLarge,
        format!(
            "Response body too large: {} bytes (max: {} bytes)",
            size, max_size
        ),
    )
}
