//! HTML rewriting: points resource references back through the proxy

use std::cell::Cell;

use html_escape::decode_html_entities;
use lol_html::{
    element, errors::RewritingError, html_content::Element, AsciiCompatibleEncoding, HtmlRewriter,
    MemorySettings, Settings,
};
use tracing::{debug, trace, warn};
use url::form_urlencoded;

use crate::{
    models::{is_html_content_type, RewriteRule, RewriteTarget, REWRITE_RULES},
    resolver::resolve,
};

/// Schemes whose references must never be routed through the proxy
const EXCLUDED_SCHEMES: &[&str] = &["javascript:", "mailto:", "tel:", "data:"];

/// Builds self-referencing proxy URLs
#[derive(Debug, Clone, Copy)]
pub struct ProxyLink<'a> {
    pub proxy_path: &'a str,
    pub target_param: &'a str,
}

impl ProxyLink<'_> {
    /// `<proxy path>?<param>=<urlencoded absolute URL>`
    pub fn to(&self, absolute: &str) -> String {
        format!(
            "{}?{}={}",
            self.proxy_path,
            encode(self.target_param),
            encode(absolute)
        )
    }
}

/// Rewrite `body` when its content type is HTML, otherwise hand it back
/// untouched.
///
/// A failed rewrite is logged and the original body is returned.
pub fn rewrite_body(
    body: Vec<u8>,
    content_type: Option<&str>,
    base: &str,
    link: &ProxyLink<'_>,
) -> Vec<u8> {
    rewrite_body_with(body, content_type, base, link, MemorySettings::default())
}

fn rewrite_body_with(
    body: Vec<u8>,
    content_type: Option<&str>,
    base: &str,
    link: &ProxyLink<'_>,
    memory: MemorySettings,
) -> Vec<u8> {
    if !is_html_content_type(content_type) || body.is_empty() {
        return body;
    }
    match rewrite_html(&body, base, link, content_type, memory) {
        Ok(rewritten) => rewritten,
        Err(e) => {
            warn!(error = %e, "HTML rewrite failed, passing body through");
            body
        }
    }
}

/// Run one rewrite pass over an HTML document.
///
/// Only the attributes listed in `REWRITE_RULES` change; everything else
/// streams through as-is and no document structure is added. The document
/// is decoded with the charset named in `content_type`, UTF-8 otherwise.
pub fn rewrite_html(
    html: &[u8],
    base: &str,
    link: &ProxyLink<'_>,
    content_type: Option<&str>,
    memory_settings: MemorySettings,
) -> Result<Vec<u8>, RewritingError> {
    let rewritten = Cell::new(0usize);
    let mut output = Vec::with_capacity(html.len());

    let element_content_handlers = REWRITE_RULES
        .iter()
        .map(|&rule| {
            let rewritten = &rewritten;
            element!(rule.selector(), move |el| {
                if rewrite_element(el, rule, base, link)? {
                    rewritten.set(rewritten.get() + 1);
                }
                Ok(())
            })
        })
        .collect();

    // Charsets lol_html cannot stream (UTF-16 and friends) fall back to UTF-8
    let encoding = content_type
        .and_then(AsciiCompatibleEncoding::from_mimetype)
        .unwrap_or_else(AsciiCompatibleEncoding::utf_8);

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers,
            encoding,
            memory_settings,
            ..Settings::default()
        },
        |c: &[u8]| output.extend_from_slice(c),
    );
    rewriter.write(html)?;
    rewriter.end()?;

    debug!(rewritten = rewritten.get(), base = %base, "HTML rewrite pass complete");
    Ok(output)
}

/// Compute the replacement for one attribute, or `None` to leave it alone
pub fn rewritten_value(target: &RewriteTarget, base: &str, link: &ProxyLink<'_>) -> Option<String> {
    let value = target.original_value.trim();
    if value.is_empty() || has_excluded_scheme(value) {
        return None;
    }
    Some(link.to(&resolve(value, base)))
}

fn rewrite_element(
    el: &mut Element<'_, '_>,
    rule: RewriteRule,
    base: &str,
    link: &ProxyLink<'_>,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let Some(raw) = el.get_attribute(rule.attribute_name) else {
        return Ok(false);
    };
    let target = RewriteTarget {
        rule,
        original_value: decode_html_entities(&raw).into_owned(),
    };

    match rewritten_value(&target, base, link) {
        Some(value) => {
            trace!(
                tag = target.rule.element_tag,
                attribute = target.rule.attribute_name,
                from = %target.original_value,
                to = %value,
                "Rewrote attribute"
            );
            el.set_attribute(rule.attribute_name, &value)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn has_excluded_scheme(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    EXCLUDED_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}

fn encode(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINK: ProxyLink<'static> = ProxyLink {
        proxy_path: "/proxy",
        target_param: "url",
    };

    fn rewrite(html: &str, base: &str) -> String {
        String::from_utf8(rewrite_html(html.as_bytes(), base, &LINK, None, MemorySettings::default()).unwrap()).unwrap()
    }

    #[test]
    fn test_proxy_link_encoding() {
        assert_eq!(
            LINK.to("https://example.com/about"),
            "/proxy?url=https%3A%2F%2Fexample.com%2Fabout"
        );
        assert_eq!(
            LINK.to("https://example.com/s?q=a b&x=1"),
            "/proxy?url=https%3A%2F%2Fexample.com%2Fs%3Fq%3Da+b%26x%3D1"
        );
    }

    #[test]
    fn test_rewrites_anchor() {
        let out = rewrite(
            r#"<html><body><a href="/about">About</a></body></html>"#,
            "https://example.com/",
        );
        assert_eq!(
            out,
            r#"<html><body><a href="/proxy?url=https%3A%2F%2Fexample.com%2Fabout">About</a></body></html>"#
        );
    }

    #[test]
    fn test_rewrites_all_five_targets() {
        let html = concat!(
            r#"<link rel="stylesheet" href="css/site.css">"#,
            r#"<script src="/js/app.js"></script>"#,
            r#"<img src="../img/logo.png" alt="Logo">"#,
            r#"<form method="post" action="login"></form>"#,
            r#"<a href="https://other.org/">x</a>"#,
        );
        let out = rewrite(html, "https://example.com/docs/guide/index.html");

        assert!(out.contains(
            r#"<link rel="stylesheet" href="/proxy?url=https%3A%2F%2Fexample.com%2Fdocs%2Fguide%2Fcss%2Fsite.css">"#
        ));
        assert!(out.contains(
            r#"<script src="/proxy?url=https%3A%2F%2Fexample.com%2Fjs%2Fapp.js"></script>"#
        ));
        assert!(out.contains(
            r#"<img src="/proxy?url=https%3A%2F%2Fexample.com%2Fdocs%2Fimg%2Flogo.png" alt="Logo">"#
        ));
        assert!(out.contains(
            r#"<form method="post" action="/proxy?url=https%3A%2F%2Fexample.com%2Fdocs%2Fguide%2Flogin"></form>"#
        ));
        assert!(out.contains(r#"<a href="/proxy?url=https%3A%2F%2Fother.org%2F">x</a>"#));
    }

    #[test]
    fn test_excluded_schemes_untouched() {
        let html = concat!(
            r#"<a href="javascript:void(0)">a</a>"#,
            r#"<a href="MAILTO:someone@example.com">b</a>"#,
            r#"<a href="tel:+15550100">c</a>"#,
            r#"<img src="data:image/gif;base64,R0lGODlhAQABAAAAACw=">"#,
        );
        assert_eq!(rewrite(html, "https://example.com/"), html);
    }

    #[test]
    fn test_blank_and_missing_attributes_untouched() {
        let html = r#"<a href="">a</a><a href="   ">b</a><a name="top">c</a><div href="/x">d</div>"#;
        assert_eq!(rewrite(html, "https://example.com/"), html);
    }

    #[test]
    fn test_other_elements_and_attributes_preserved() {
        let html = r#"<p class="intro">Hi <iframe src="/frame"></iframe><video src="v.mp4"></video></p>"#;
        assert_eq!(rewrite(html, "https://example.com/"), html);
    }

    #[test]
    fn test_no_structure_injected() {
        let out = rewrite(r#"<a href="next">more</a>"#, "https://example.com/a/b");
        assert_eq!(
            out,
            r#"<a href="/proxy?url=https%3A%2F%2Fexample.com%2Fa%2Fnext">more</a>"#
        );
    }

    #[test]
    fn test_malformed_html_is_tolerated() {
        let out = rewrite(r#"<div><a href="/x">unclosed <img src=y.png"#, "https://example.com/");
        assert!(out.contains(r#"<a href="/proxy?url=https%3A%2F%2Fexample.com%2Fx">"#));
    }

    #[test]
    fn test_entities_decoded_before_resolution() {
        let out = rewrite(r#"<a href="/s?a=1&amp;b=2">s</a>"#, "https://example.com/");
        assert_eq!(
            out,
            r#"<a href="/proxy?url=https%3A%2F%2Fexample.com%2Fs%3Fa%3D1%26b%3D2">s</a>"#
        );
    }

    #[test]
    fn test_second_pass_wraps_once() {
        let first = rewrite(r#"<a href="/about">About</a>"#, "https://example.com/");
        let second = rewrite(&first, "https://other.com/");
        assert_eq!(
            second,
            r#"<a href="/proxy?url=https%3A%2F%2Fother.com%2Fproxy%3Furl%3Dhttps%253A%252F%252Fexample.com%252Fabout">About</a>"#
        );
    }

    #[test]
    fn test_rewritten_value() {
        let target = RewriteTarget {
            rule: REWRITE_RULES[0],
            original_value: "#sec1".to_string(),
        };
        assert_eq!(
            rewritten_value(&target, "https://x.com/p", &LINK).as_deref(),
            Some("/proxy?url=https%3A%2F%2Fx.com%2Fp%23sec1")
        );

        let skipped = RewriteTarget {
            rule: REWRITE_RULES[0],
            original_value: " javascript:alert(1)".to_string(),
        };
        assert_eq!(rewritten_value(&skipped, "https://x.com/p", &LINK), None);
    }

    #[test]
    fn test_non_html_passthrough() {
        let json = br#"{"links":["<a href=\"/x\">"]}"#.to_vec();
        let out = rewrite_body(
            json.clone(),
            Some("application/json"),
            "https://example.com/",
            &LINK,
        );
        assert_eq!(out, json);
    }

    #[test]
    fn test_html_body_rewritten() {
        let out = rewrite_body(
            br#"<a href="/x">x</a>"#.to_vec(),
            Some("text/html"),
            "https://example.com/",
            &LINK,
        );
        assert_eq!(out, br#"<a href="/proxy?url=https%3A%2F%2Fexample.com%2Fx">x</a>"#);
    }

    #[test]
    fn test_charset_from_content_type() {
        let latin1 = b"<a href=\"caf\xe9.html\">menu</a>".to_vec();
        let out = rewrite_body(
            latin1,
            Some("text/html; charset=windows-1252"),
            "https://example.com/",
            &LINK,
        );
        assert_eq!(
            out,
            br#"<a href="/proxy?url=https%3A%2F%2Fexample.com%2Fcaf%C3%A9.html">menu</a>"#
        );
    }

    #[test]
    fn test_failed_rewrite_returns_original_body() {
        let mut memory = MemorySettings::default();
        memory.preallocated_parsing_buffer_size = 0;
        memory.max_allowed_memory_usage = 64;

        // The unterminated tag has to be buffered whole, which overruns the limit
        let html = format!(r#"<a href="/x">ok</a><img src="{}"#, "x".repeat(4096)).into_bytes();
        let out = rewrite_body_with(
            html.clone(),
            Some("text/html"),
            "https://example.com/",
            &LINK,
            memory,
        );
        assert_eq!(out, html);
    }
}
