//! Error types and error codes for the proxy service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Error codes returned by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No target URL parameter supplied
    MissingTarget,
    /// Target URL is not an absolute http(s) URL
    InvalidUrl,
    /// Inbound request cannot be forwarded as given
    InvalidRequest,
    /// Target host is not on the whitelist
    ForbiddenDomain,
    /// Redirect chain exceeded the configured bound
    TooManyRedirects,
    /// DNS, connection or TLS failure reaching the target
    UpstreamUnreachable,
    /// Upstream did not answer within the total timeout
    UpstreamTimeout,
    /// Upstream body exceeded the configured limit
    ResponseTooLarge,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::MissingTarget => write!(f, "MISSING_TARGET"),
            ErrorCode::InvalidUrl => write!(f, "INVALID_URL"),
            ErrorCode::InvalidRequest => write!(f, "INVALID_REQUEST"),
            ErrorCode::ForbiddenDomain => write!(f, "FORBIDDEN_DOMAIN"),
            ErrorCode::TooManyRedirects => write!(f, "TOO_MANY_REDIRECTS"),
            ErrorCode::UpstreamUnreachable => write!(f, "UPSTREAM_UNREACHABLE"),
            ErrorCode::UpstreamTimeout => write!(f, "UPSTREAM_TIMEOUT"),
            ErrorCode::ResponseTooLarge => write!(f, "RESPONSE_TOO_LARGE"),
        }
    }
}

/// Standard error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: ErrorCode,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

/// Proxy error with HTTP status code
#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub response: ErrorResponse,
}

impl ProxyError {
    pub fn new(status: StatusCode, error: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            status,
            response: ErrorResponse::new(error, code),
        }
    }

    pub fn missing_target(param: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            format!("Target URL required: the \"{}\" parameter is missing", param),
            ErrorCode::MissingTarget,
        )
    }

    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, ErrorCode::InvalidUrl)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, ErrorCode::InvalidRequest)
    }

    pub fn forbidden_domain(host: &str) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            format!("Domain not permitted: {}", host),
            ErrorCode::ForbiddenDomain,
        )
    }

    pub fn too_many_redirects(max: usize) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Too many redirects (max: {})", max),
            ErrorCode::TooManyRedirects,
        )
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            ErrorCode::UpstreamUnreachable,
        )
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, message, ErrorCode::UpstreamTimeout)
    }

    pub fn too_large(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            ErrorCode::ResponseTooLarge,
        )
    }

    pub fn code(&self) -> ErrorCode {
        self.response.code
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.response.code, self.response.error)
    }
}

impl std::error::Error for ProxyError {}

/// Classify reqwest errors into proxy errors
pub fn classify_reqwest_error(err: &reqwest::Error) -> ProxyError {
    let message = err.to_string();

    if err.is_timeout() {
        return ProxyError::timeout(format!("Upstream timed out: {}", message));
    }

    let lower = message.to_lowercase();
    let detail = if err.is_connect() {
        if lower.contains("dns") || lower.contains("resolve") || lower.contains("getaddrinfo") {
            format!("DNS resolution failed: {}", message)
        } else if lower.contains("ssl") || lower.contains("tls") || lower.contains("certificate") {
            format!("TLS error: {}", message)
        } else {
            format!("Connection error: {}", message)
        }
    } else if err.is_request() {
        format!("Request error: {}", message)
    } else {
        message
    };
    ProxyError::unreachable(detail)
}
