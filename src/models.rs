//! Request, response and rewrite models shared by the pipeline stages

use serde::Serialize;
use url::Url;

/// One inbound call to the proxy, validated and ready to send upstream
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// Target URL with the passthrough parameters already appended
    pub target_url: Url,

    /// Inbound query parameters other than the target, in first-seen order
    pub extra_params: Vec<(String, String)>,

    /// HTTP method of the inbound call
    pub method: String,

    /// Body to forward. Always `None` for GET and HEAD.
    pub body: Option<Vec<u8>>,

    /// Content-Type of the inbound body, if the caller sent one
    pub body_content_type: Option<String>,

    /// User-Agent of the inbound call, if any
    pub caller_user_agent: Option<String>,
}

/// Result of fetching a `ProxyRequest`
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// Status of the final, non-redirect response
    pub status_code: u16,

    /// URL reached after following all redirects
    pub effective_url: Url,

    /// Last Content-Type header seen across the redirect chain
    pub content_type: Option<String>,

    /// Raw body bytes
    pub body: Vec<u8>,
}

/// Case-insensitive `text/html` check on a Content-Type value
pub fn is_html_content_type(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
        .unwrap_or(false)
}

/// Element/attribute pair whose value references another resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteRule {
    pub element_tag: &'static str,
    pub attribute_name: &'static str,
}

impl RewriteRule {
    /// CSS selector matching elements that carry the attribute
    pub fn selector(&self) -> String {
        format!("{}[{}]", self.element_tag, self.attribute_name)
    }
}

/// Every element/attribute pair touched by a rewrite pass
pub const REWRITE_RULES: [RewriteRule; 5] = [
    RewriteRule { element_tag: "a", attribute_name: "href" },
    RewriteRule { element_tag: "img", attribute_name: "src" },
    RewriteRule { element_tag: "script", attribute_name: "src" },
    RewriteRule { element_tag: "link", attribute_name: "href" },
    RewriteRule { element_tag: "form", attribute_name: "action" },
];

/// One attribute on one element, as found in the source markup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteTarget {
    pub rule: RewriteRule,
    pub original_value: String,
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,

    /// Service version
    pub version: &'static str,

    /// True when no whitelist is configured
    pub open_proxy: bool,

    /// Allowed upstream hosts, sorted
    pub whitelist: Vec<String>,
}

impl HealthResponse {
    pub fn new(open_proxy: bool, mut whitelist: Vec<String>) -> Self {
        whitelist.sort();
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            open_proxy,
            whitelist,
        }
    }
}
