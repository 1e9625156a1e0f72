//! Configuration module for environment variables

use std::{
    env,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

/// Default outbound User-Agent, a current desktop Chrome on Windows
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 3000)
    pub port: u16,
    /// Log level (default: info)
    pub log_level: String,
    /// Maximum concurrent relay calls (default: 100)
    pub max_concurrent: usize,
    /// Default outbound timeout in seconds, 0 means only the server timeout bounds it (default: 30)
    pub default_timeout: u64,
    /// Redirects followed per relay call (default: 5)
    pub max_redirects: usize,
    /// Maximum request body size in bytes (default: 10MB)
    pub max_request_body_size: usize,
    /// Maximum response body size in bytes (default: 50MB)
    pub max_response_body_size: usize,
    /// Server request timeout in seconds; outbound calls stay under it (default: 120)
    pub server_timeout: u64,
    /// Blocked IP ranges for SSRF protection (internal networks)
    pub blocked_ip_ranges: Vec<IpRange>,
    /// Allow requests to private/internal IPs (default: false)
    pub allow_private_ips: bool,
    /// User-Agent sent when the caller supplies none
    pub default_user_agent: String,
    /// HS256 secret for session tokens; the auth gate is disabled without it
    pub jwt_secret: Option<String>,
    /// Require an authenticated session on the relay endpoint (default: false)
    pub require_auth: bool,
    /// History entries kept per user (default: 100)
    pub history_limit: usize,
    /// Origin allowed to call the API with credentials
    pub cors_origin: String,
}

/// Represents an IP range for blocking
#[derive(Debug, Clone)]
pub struct IpRange {
    pub start: IpAddr,
    pub end: IpAddr,
}

impl IpRange {
    fn v4(start: [u8; 4], end: [u8; 4]) -> Self {
        Self {
            start: IpAddr::V4(Ipv4Addr::from(start)),
            end: IpAddr::V4(Ipv4Addr::from(end)),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .ok()
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", 3000),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            max_concurrent: env_parse("MAX_CONCURRENT", 100),
            default_timeout: env_parse("DEFAULT_TIMEOUT", 30),
            max_redirects: env_parse("MAX_REDIRECTS", 5),
            max_request_body_size: env_parse("MAX_REQUEST_BODY_SIZE", 10 * 1024 * 1024), // 10MB
            max_response_body_size: env_parse("MAX_RESPONSE_BODY_SIZE", 50 * 1024 * 1024), // 50MB
            server_timeout: env_parse("SERVER_TIMEOUT", 120),
            blocked_ip_ranges: Self::default_blocked_ranges(),
            allow_private_ips: env_flag("ALLOW_PRIVATE_IPS"),
            default_user_agent: env_non_empty("DEFAULT_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            jwt_secret: env_non_empty("JWT_SECRET"),
            require_auth: env_flag("REQUIRE_AUTH"),
            history_limit: env_parse("HISTORY_LIMIT", 100),
            cors_origin: env::var("CORS_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
        }
    }

    /// Default blocked IP ranges (RFC 1918, loopback, link-local, etc.)
    fn default_blocked_ranges() -> Vec<IpRange> {
        vec![
            // Loopback
            IpRange::v4([127, 0, 0, 0], [127, 255, 255, 255]),
            // Private Class A
            IpRange::v4([10, 0, 0, 0], [10, 255, 255, 255]),
            // Private Class B
            IpRange::v4([172, 16, 0, 0], [172, 31, 255, 255]),
            // Private Class C
            IpRange::v4([192, 168, 0, 0], [192, 168, 255, 255]),
            // Link-local, includes cloud metadata at 169.254.169.254
            IpRange::v4([169, 254, 0, 0], [169, 254, 255, 255]),
            // Carrier-grade NAT
            IpRange::v4([100, 64, 0, 0], [100, 127, 255, 255]),
            // IPv6 loopback
            IpRange {
                start: IpAddr::V6(Ipv6Addr::LOCALHOST),
                end: IpAddr::V6(Ipv6Addr::LOCALHOST),
            },
        ]
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
