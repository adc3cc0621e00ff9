//! Upstream fetcher: sends the assembled request and walks the redirect chain

use reqwest::{
    header::{CONTENT_TYPE, LOCATION, USER_AGENT},
    redirect::Policy,
    Client, Method, StatusCode,
};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::{
    config::Config,
    error::{classify_reqwest_error, ProxyError},
    models::{ProxyRequest, UpstreamResponse},
    resolver::sanitize_url_for_logging,
};

/// Content type used for forwarded bodies when the caller did not declare one
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// HTTP client plus the limits every fetch runs under
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    default_user_agent: String,
    max_redirects: usize,
    total_timeout: Duration,
    max_response_body_size: usize,
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let total_timeout = Duration::from_secs(config.upstream_timeout);

        // Redirects are followed by hand so every hop's Content-Type is seen
        let client = Client::builder()
            .redirect(Policy::none())
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .timeout(total_timeout)
            .build()?;

        Ok(Self {
            client,
            default_user_agent: config.default_user_agent.clone(),
            max_redirects: config.max_redirects,
            total_timeout,
            max_response_body_size: config.max_response_body_size,
        })
    }

    /// Fetch the target, following redirects, within the total timeout
    pub async fn fetch(&self, req: &ProxyRequest) -> Result<UpstreamResponse, ProxyError> {
        let start = Instant::now();
        let upstream = tokio::time::timeout(self.total_timeout, self.follow(req))
            .await
            .map_err(|_| {
                ProxyError::timeout(format!(
                    "Upstream timed out after {}s",
                    self.total_timeout.as_secs()
                ))
            })??;

        info!(
            url = %sanitize_url_for_logging(upstream.effective_url.as_str()),
            status = upstream.status_code,
            content_type = ?upstream.content_type,
            elapsed_ms = start.elapsed().as_millis() as u64,
            body_size = upstream.body.len(),
            "Upstream fetch completed"
        );

        Ok(upstream)
    }

    async fn follow(&self, req: &ProxyRequest) -> Result<UpstreamResponse, ProxyError> {
        let user_agent = req
            .caller_user_agent
            .as_deref()
            .unwrap_or(&self.default_user_agent);

        let mut method: Method = req
            .method
            .parse()
            .map_err(|_| ProxyError::invalid_request(format!("Invalid HTTP method: {}", req.method)))?;
        let mut body = req.body.clone();
        let mut url = req.target_url.clone();
        let mut content_type: Option<String> = None;
        let mut redirects = 0;

        loop {
            let mut request_builder = self
                .client
                .request(method.clone(), url.as_str())
                .header(USER_AGENT, user_agent);

            if let Some(body) = &body {
                request_builder = request_builder
                    .header(
                        CONTENT_TYPE,
                        req.body_content_type.as_deref().unwrap_or(FORM_CONTENT_TYPE),
                    )
                    .body(body.clone());
            }

            let response = request_builder.send().await.map_err(|e| {
                error!(
                    url = %sanitize_url_for_logging(url.as_str()),
                    error = %e,
                    "Upstream request failed"
                );
                classify_reqwest_error(&e)
            })?;

            // A later Content-Type overrides any seen earlier in the chain
            if let Some(ct) = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
            {
                content_type = Some(ct.trim().to_string());
            }

            let status = response.status();
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            match location {
                Some(location) if status.is_redirection() => {
                    if redirects >= self.max_redirects {
                        return Err(ProxyError::too_many_redirects(self.max_redirects));
                    }
                    redirects += 1;

                    let next = url.join(&location).map_err(|e| {
                        ProxyError::unreachable(format!(
                            "Invalid redirect location '{}': {}",
                            location, e
                        ))
                    })?;

                    if switches_to_get(status, &method) {
                        method = Method::GET;
                        body = None;
                    }

                    debug!(
                        from = %sanitize_url_for_logging(url.as_str()),
                        to = %sanitize_url_for_logging(next.as_str()),
                        status = status.as_u16(),
                        hop = redirects,
                        "Following redirect"
                    );
                    url = next;
                }
                _ => {
                    let body =
                        read_response_body_with_limit(response, self.max_response_body_size)
                            .await?;
                    return Ok(UpstreamResponse {
                        status_code: status.as_u16(),
                        effective_url: url,
                        content_type,
                        body,
                    });
                }
            }
        }
    }
}

/// 303 always becomes GET; 301/302 do so for POST, as browsers do
fn switches_to_get(status: StatusCode, method: &Method) -> bool {
    status == StatusCode::SEE_OTHER
        || ((status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND)
            && *method == Method::POST)
}

/// Read response body with size limit to prevent OOM
async fn read_response_body_with_limit(
    response: reqwest::Response,
    max_size: usize,
) -> Result<Vec<u8>, ProxyError> {
    // Check Content-Length header first if available
    if let Some(content_length) = response.content_length() {
        if content_length as usize > max_size {
            return Err(ProxyError::too_large(format!(
                "Response body too large: {} bytes (max: {} bytes)",
                content_length, max_size
            )));
        }
    }

    let body_bytes = response.bytes().await.map_err(|e| {
        error!(error = %e, "Failed to read response body");
        classify_reqwest_error(&e)
    })?;

    // Final size check
    if body_bytes.len() > max_size {
        return Err(ProxyError::too_large(format!(
            "Response body too large: {} bytes (max: {} bytes)",
            body_bytes.len(),
            max_size
        )));
    }

    Ok(body_bytes.to_vec())
}
