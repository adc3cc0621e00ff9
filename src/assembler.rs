//! Builds a validated `ProxyRequest` from an inbound call

use axum::http::{header, HeaderMap, Method};
use url::{form_urlencoded, Url};

use crate::{
    config::Config,
    error::ProxyError,
    models::ProxyRequest,
    resolver::is_allowed,
};

/// Allowed URL schemes for outgoing requests
const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// Assemble the upstream request from the inbound query string, method,
/// headers and body.
///
/// Checks run in order: target present, target absolute, whitelist. Nothing
/// here touches the network.
pub fn assemble(
    config: &Config,
    query: Option<&str>,
    method: &Method,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<ProxyRequest, ProxyError> {
    let (target, extra_params) = split_query(query.unwrap_or_default(), &config.target_param);

    let target = target
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ProxyError::missing_target(&config.target_param))?;

    validate_absolute(&target)?;

    let full = append_params(&target, &extra_params);
    let target_url = Url::parse(&full)
        .map_err(|e| ProxyError::invalid_url(format!("Invalid URL: {}", e)))?;

    if !is_allowed(target_url.as_str(), &config.whitelist) {
        return Err(ProxyError::forbidden_domain(
            target_url.host_str().unwrap_or_default(),
        ));
    }

    let body = if *method == Method::GET || *method == Method::HEAD {
        None
    } else {
        Some(body.to_vec())
    };

    Ok(ProxyRequest {
        target_url,
        extra_params,
        method: method.as_str().to_string(),
        body,
        body_content_type: header_string(headers, header::CONTENT_TYPE),
        caller_user_agent: header_string(headers, header::USER_AGENT),
    })
}

/// Separate the target parameter from the passthrough parameters.
///
/// Passthrough parameters keep the position of their first occurrence; a
/// repeated key takes its last value. Array keys (`tag[]`) keep every pair.
fn split_query(query: &str, target_param: &str) -> (Option<String>, Vec<(String, String)>) {
    let mut target = None;
    let mut extra: Vec<(String, String)> = Vec::new();

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if key == target_param {
            target = Some(value.into_owned());
            continue;
        }
        if key.ends_with("[]") {
            extra.push((key.into_owned(), value.into_owned()));
            continue;
        }
        match extra.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value.into_owned(),
            None => extra.push((key.into_owned(), value.into_owned())),
        }
    }

    (target, extra)
}

fn validate_absolute(target: &str) -> Result<(), ProxyError> {
    let url = Url::parse(target)
        .map_err(|e| ProxyError::invalid_url(format!("Invalid URL: {}", e)))?;

    let scheme = url.scheme().to_lowercase();
    if !ALLOWED_SCHEMES.contains(&scheme.as_str()) {
        return Err(ProxyError::invalid_url(format!(
            "Invalid URL: scheme '{}' not allowed. Only http and https are permitted.",
            scheme
        )));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(ProxyError::invalid_url("Invalid URL: a hostname is required")),
    }
}

/// Append form-encoded parameters to the target's query, ahead of any fragment
fn append_params(target: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return target.to_string();
    }

    let (head, fragment) = match target.find('#') {
        Some(i) => target.split_at(i),
        None => (target, ""),
    };

    let separator = if head.ends_with('?') || head.ends_with('&') {
        ""
    } else if head.contains('?') {
        "&"
    } else {
        "?"
    };

    let encoded = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish();

    format!("{}{}{}{}", head, separator, encoded, fragment)
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}
