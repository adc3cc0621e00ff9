//! HTTP route handlers for the proxy service

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, RawQuery, State},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, Method, StatusCode},
    response::Response,
    routing::{any, get},
    Json, Router,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    assembler::assemble,
    config::{Config, HEALTH_PATH},
    error::ProxyError,
    fetcher::Fetcher,
    models::{HealthResponse, UpstreamResponse},
    resolver::sanitize_url_for_logging,
    rewriter::{rewrite_body, ProxyLink},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub fetcher: Fetcher,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, reqwest::Error> {
        let fetcher = Fetcher::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            fetcher,
        })
    }
}

/// Build the router: the proxy endpoint plus /health
pub fn router(state: AppState) -> Router {
    let proxy_path = state.config.proxy_path.clone();
    let body_limit = state.config.max_request_body_size;

    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .route(&proxy_path, any(proxy_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
}

/// GET /health - Health check endpoint
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::new(
        state.config.is_open_proxy(),
        state.config.whitelist.iter().cloned().collect(),
    ))
}

/// ANY /proxy?url=... - Fetch the target and relay it, rewriting HTML links
pub async fn proxy_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let req = assemble(&state.config, query.as_deref(), &method, &headers, &body).map_err(|e| {
        warn!(code = %e.code(), error = %e.response.error, "Rejected proxy request");
        e
    })?;

    debug!(
        url = %sanitize_url_for_logging(req.target_url.as_str()),
        method = %req.method,
        extra_params = req.extra_params.len(),
        "Processing proxy request"
    );

    let upstream = state.fetcher.fetch(&req).await?;

    let link = ProxyLink {
        proxy_path: &state.config.proxy_path,
        target_param: &state.config.target_param,
    };
    let UpstreamResponse {
        status_code,
        effective_url,
        content_type,
        body,
    } = upstream;

    // Relative references resolve against the post-redirect URL
    let body = rewrite_body(body, content_type.as_deref(), effective_url.as_str(), &link);

    Ok(emit(status_code, content_type.as_deref(), body))
}

/// Relay the upstream status, content type and body
fn emit(status_code: u16, content_type: Option<&str>, body: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::from_u16(status_code).unwrap_or(StatusCode::BAD_GATEWAY);

    if let Some(value) = content_type.and_then(|ct| HeaderValue::from_str(ct).ok()) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}
