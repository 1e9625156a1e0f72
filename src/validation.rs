//! Input validation, URL checks and SSRF protection

use reqwest::{
    dns::{Addrs, Name, Resolve, Resolving},
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT},
    Method,
};
use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use url::{Host, Url};

use crate::config::Config;
use crate::error::{DestinationBlocked, ErrorCode};
use crate::models::RelayFailure;

/// Allowed URL schemes for outgoing requests
const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// Methods the API Tester may relay
const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE"];

/// Caller headers the transport computes itself
const SKIPPED_HEADERS: &[&str] = &["host", "content-length", "transfer-encoding"];

/// Blocked hostnames (case-insensitive)
const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
    "metadata.google.internal", // GCP metadata
    "metadata.google.com",      // GCP metadata alt
    "instance-data",            // AWS metadata hostname
];

/// Parse a relay method. Matching is case-sensitive: `get` is rejected.
pub fn parse_method(method: &str) -> Option<Method> {
    if !ALLOWED_METHODS.contains(&method) {
        return None;
    }
    method.parse().ok()
}

/// Validate a target URL for the relay
///
/// Checks:
/// 1. URL parses and the scheme is http or https
/// 2. Hostname is not on blocklist
/// 3. A literal IP host is not in private/internal ranges (unless allowed)
///
/// Hostnames are checked again after resolution by [`GuardedResolver`], on
/// the first request and on every redirect hop.
pub fn validate_url(url_str: &str, config: &Config) -> Result<Url, RelayFailure> {
    let url = Url::parse(url_str)
        .map_err(|e| RelayFailure::new(ErrorCode::InvalidUrl, format!("Invalid URL: {}", e)))?;
    check_destination(&url, config)?;
    Ok(url)
}

/// Synchronous destination check shared by [`validate_url`] and the redirect
/// policy: scheme, blocked hostnames and literal IP ranges.
pub fn check_destination(url: &Url, config: &Config) -> Result<(), RelayFailure> {
    let scheme = url.scheme().to_lowercase();
    if !ALLOWED_SCHEMES.contains(&scheme.as_str()) {
        return Err(RelayFailure::new(
            ErrorCode::InvalidUrl,
            format!(
                "URL scheme '{}' not allowed. Only http and https are permitted.",
                scheme
            ),
        ));
    }

    let Some(host) = url.host() else {
        return Err(RelayFailure::new(
            ErrorCode::InvalidUrl,
            "URL must have a valid hostname.",
        ));
    };

    if config.allow_private_ips {
        return Ok(());
    }

    let ip = match host {
        Host::Domain(name) => {
            if is_hostname_blocked(name) {
                return Err(RelayFailure::new(
                    ErrorCode::BlockedDestination,
                    format!("Hostname '{}' is blocked for security reasons.", name),
                ));
            }
            return Ok(());
        }
        Host::Ipv4(ip) => IpAddr::V4(ip),
        Host::Ipv6(ip) => IpAddr::V6(ip),
    };

    if is_ip_blocked(&ip, config) {
        return Err(RelayFailure::new(
            ErrorCode::BlockedDestination,
            format!(
                "IP address '{}' is blocked. Private/internal IPs are not allowed.",
                ip
            ),
        ));
    }
    Ok(())
}

fn is_hostname_blocked(host: &str) -> bool {
    let host_lower = host.trim_end_matches('.').to_lowercase();
    BLOCKED_HOSTNAMES.iter().any(|&blocked| host_lower == blocked)
}

/// DNS resolver for the relay client that refuses names resolving into a
/// blocked range. Installed only when private targets are disallowed.
///
/// Lookups go through tokio's resolver so a slow nameserver only stalls
/// the request being resolved.
pub struct GuardedResolver {
    config: Arc<Config>,
}

impl GuardedResolver {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_guarded(name, Arc::clone(&self.config)))
    }
}

async fn resolve_guarded(
    name: Name,
    config: Arc<Config>,
) -> Result<Addrs, Box<dyn std::error::Error + Send + Sync>> {
    let host = name.as_str();
    if is_hostname_blocked(host) {
        return Err(Box::new(DestinationBlocked(format!(
            "Hostname '{}' is blocked for security reasons.",
            host
        ))));
    }

    // The connector overwrites the port
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, 0)).await?.collect();
    if let Some(ip) = addrs
        .iter()
        .map(SocketAddr::ip)
        .find(|ip| is_ip_blocked(ip, &config))
    {
        return Err(Box::new(DestinationBlocked(format!(
            "Hostname '{}' resolves to blocked IP '{}'. Private/internal IPs are not allowed.",
            host, ip
        ))));
    }

    Ok(Box::new(addrs.into_iter()))
}

/// Build the outbound header set: the default User-Agent first, then the
/// caller's headers on top so any caller value replaces the default.
pub fn build_headers(
    default_user_agent: &str,
    caller: Option<&HashMap<String, Option<String>>>,
) -> Result<HeaderMap, RelayFailure> {
    let mut headers = HeaderMap::new();
    let default_ua = HeaderValue::from_str(default_user_agent).map_err(|e| {
        RelayFailure::new(
            ErrorCode::InvalidHeader,
            format!("Invalid default User-Agent: {}", e),
        )
    })?;
    headers.insert(USER_AGENT, default_ua);

    for (name, value) in caller.into_iter().flatten() {
        let Some(value) = value else { continue };
        if SKIPPED_HEADERS.contains(&name.to_lowercase().as_str()) {
            continue;
        }
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            RelayFailure::new(
                ErrorCode::InvalidHeader,
                format!("Invalid header name: {}", name),
            )
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            RelayFailure::new(
                ErrorCode::InvalidHeader,
                format!("Invalid value for header '{}'", name),
            )
        })?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

/// Whether a body should go out with this call. GET never carries one,
/// and falsy values (`null`, `""`, `0`, `false`) count as no body.
pub fn should_attach_body(method: &Method, body: Option<&serde_json::Value>) -> bool {
    if *method == Method::GET {
        return false;
    }
    match body {
        None | Some(serde_json::Value::Null) | Some(serde_json::Value::Bool(false)) => false,
        Some(serde_json::Value::String(s)) => !s.is_empty(),
        Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(_) => true,
    }
}

/// Encode a body for transport. Strings go out verbatim; structured values are
/// serialized as JSON and labelled as such unless the caller chose a type.
pub fn encode_body(body: &serde_json::Value, headers: &mut HeaderMap) -> Vec<u8> {
    match body {
        serde_json::Value::String(raw) => raw.clone().into_bytes(),
        structured => {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            structured.to_string().into_bytes()
        }
    }
}

/// Check if an IP address is in the blocked ranges
fn is_ip_blocked(ip: &IpAddr, config: &Config) -> bool {
    if config
        .blocked_ip_ranges
        .iter()
        .any(|range| is_ip_in_range(ip, &range.start, &range.end))
    {
        return true;
    }

    // Additional checks for special addresses
    match ip {
        IpAddr::V4(ipv4) => {
            let first = ipv4.octets()[0];
            // 0.0.0.0/8 - Current network
            // 224.0.0.0/4 - Multicast
            // 240.0.0.0/4 - Reserved
            first == 0 || first >= 224
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_unspecified() {
                return true;
            }
            // IPv4-mapped addresses get the IPv4 rules
            if let Some(mapped) = ipv6.to_ipv4_mapped() {
                return is_ip_blocked(&IpAddr::V4(mapped), config);
            }
            let segments = ipv6.segments();
            // fe80::/10 - Link-local
            // fc00::/7 - Unique local
            (segments[0] & 0xffc0) == 0xfe80 || (segments[0] & 0xfe00) == 0xfc00
        }
    }
}

/// Check if an IP is within a range (simple comparison)
fn is_ip_in_range(ip: &IpAddr, start: &IpAddr, end: &IpAddr) -> bool {
    match (ip, start, end) {
        (IpAddr::V4(ip), IpAddr::V4(s), IpAddr::V4(e)) => {
            let ip_num = u32::from(*ip);
            ip_num >= u32::from(*s) && ip_num <= u32::from(*e)
        }
        (IpAddr::V6(ip), IpAddr::V6(s), IpAddr::V6(e)) => {
            let ip_num = u128::from(*ip);
            ip_num >= u128::from(*s) && ip_num <= u128::from(*e)
        }
        _ => false, // Mismatched IP versions
    }
}

/// Sanitize a URL for logging by removing credentials
pub fn sanitize_url_for_logging(url_str: &str) -> String {
    match Url::parse(url_str) {
        Ok(mut url) => {
            if !url.username().is_empty() || url.password().is_some() {
                let _ = url.set_username("***");
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "[invalid URL]".to_string(),
    }
}
