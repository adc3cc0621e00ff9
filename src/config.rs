//! Configuration module for environment variables

use std::{collections::HashSet, env};

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 8080)
    pub port: u16,
    /// Log level (default: info)
    pub log_level: String,
    /// Path the proxy endpoint is mounted on, also used in rewritten links (default: /proxy)
    pub proxy_path: String,
    /// Query parameter carrying the target URL (default: url)
    pub target_param: String,
    /// Allowed upstream hosts, lowercased. Empty means open proxy.
    pub whitelist: HashSet<String>,
    /// Operator opt-in for running with an empty whitelist (default: false)
    pub allow_open_proxy: bool,
    /// User-Agent sent upstream when the caller supplied none
    pub default_user_agent: String,
    /// Total upstream timeout in seconds, redirects and body read included (default: 30)
    pub upstream_timeout: u64,
    /// Maximum number of redirects followed (default: 10)
    pub max_redirects: usize,
    /// Maximum request body size in bytes (default: 10MB)
    pub max_request_body_size: usize,
    /// Maximum response body size in bytes (default: 50MB)
    pub max_response_body_size: usize,
    /// Server request timeout in seconds (default: 120)
    pub server_timeout: u64,
    /// Skip upstream certificate verification. Development only. (default: false)
    pub insecure_skip_tls_verify: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("PORT").unwrap_or(defaults.port),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            proxy_path: env::var("PROXY_PATH").unwrap_or(defaults.proxy_path),
            target_param: env::var("TARGET_PARAM").unwrap_or(defaults.target_param),
            whitelist: env::var("PROXY_WHITELIST")
                .map(|v| parse_whitelist(&v))
                .unwrap_or(defaults.whitelist),
            allow_open_proxy: env_flag("ALLOW_OPEN_PROXY").unwrap_or(defaults.allow_open_proxy),
            default_user_agent: env::var("DEFAULT_USER_AGENT")
                .unwrap_or(defaults.default_user_agent),
            upstream_timeout: env_parse("UPSTREAM_TIMEOUT").unwrap_or(defaults.upstream_timeout),
            max_redirects: env_parse("MAX_REDIRECTS").unwrap_or(defaults.max_redirects),
            max_request_body_size: env_parse("MAX_REQUEST_BODY_SIZE")
                .unwrap_or(defaults.max_request_body_size),
            max_response_body_size: env_parse("MAX_RESPONSE_BODY_SIZE")
                .unwrap_or(defaults.max_response_body_size),
            server_timeout: env_parse("SERVER_TIMEOUT").unwrap_or(defaults.server_timeout),
            insecure_skip_tls_verify: env_flag("INSECURE_SKIP_TLS_VERIFY")
                .unwrap_or(defaults.insecure_skip_tls_verify),
        }
    }

    /// Reject configurations the server must not start with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.whitelist.is_empty() && !self.allow_open_proxy {
            anyhow::bail!(
                "PROXY_WHITELIST is empty. Set ALLOW_OPEN_PROXY=true to run as an open proxy \
                 (anyone can relay traffic to any host through this server)"
            );
        }
        if self.target_param.is_empty() {
            anyhow::bail!("TARGET_PARAM must not be empty");
        }
        if !self.proxy_path.starts_with('/') || self.proxy_path.len() < 2 {
            anyhow::bail!("PROXY_PATH must start with '/' and name a path, got '{}'", self.proxy_path);
        }
        if self.proxy_path == HEALTH_PATH {
            anyhow::bail!("PROXY_PATH must not be {}, the health endpoint lives there", HEALTH_PATH);
        }
        // The router would read these as captures or wildcards
        let has_route_syntax = self.proxy_path.contains(['{', '}'])
            || self
                .proxy_path
                .split('/')
                .any(|segment| segment.starts_with(':') || segment.starts_with('*'));
        if has_route_syntax {
            anyhow::bail!(
                "PROXY_PATH must be a literal path without '{{', '}}', ':' or '*' segments, got '{}'",
                self.proxy_path
            );
        }
        Ok(())
    }

    /// True when any host may be proxied
    pub fn is_open_proxy(&self) -> bool {
        self.whitelist.is_empty()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            log_level: "info".to_string(),
            proxy_path: "/proxy".to_string(),
            target_param: "url".to_string(),
            whitelist: HashSet::new(),
            allow_open_proxy: false,
            default_user_agent: concat!("rewrite-proxy/", env!("CARGO_PKG_VERSION")).to_string(),
            upstream_timeout: 30,
            max_redirects: 10,
            max_request_body_size: 10 * 1024 * 1024, // 10MB
            max_response_body_size: 50 * 1024 * 1024, // 50MB
            server_timeout: 120,
            insecure_skip_tls_verify: false,
        }
    }
}

/// Path of the health endpoint
pub const HEALTH_PATH: &str = "/health";

/// Split a comma-separated host list, lowercasing and dropping blanks
pub fn parse_whitelist(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|h| h.trim().to_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key).ok().map(|v| v == "true" || v == "1")
}
