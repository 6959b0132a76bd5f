//! Per-request context the matcher and custom rules read from

use std::net::SocketAddr;

use axum::http::{header, HeaderMap, HeaderValue};
use axum_extra::extract::cookie::CookieJar;
use ipnetwork::IpNetwork;

use super::url::{host_without_port, RequestUrl};
use crate::config::SiteConfig;
use crate::models::SessionClaims;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub url: RequestUrl,
    pub method: String,
    pub scheme: String,
    /// Requested host name without port
    pub host: String,
    pub headers: HeaderMap,
    pub cookies: CookieJar,
    pub client_ip: String,
    pub locale: String,
    /// Decoded session, `None` for anonymous visitors
    pub visitor: Option<SessionClaims>,
}

impl RequestContext {
    /// Anonymous GET context for a path, everything else empty
    pub fn new(url: &str) -> Self {
        Self {
            url: RequestUrl::parse(url),
            method: "GET".to_string(),
            scheme: "http".to_string(),
            host: String::new(),
            headers: HeaderMap::new(),
            cookies: CookieJar::new(),
            client_ip: String::new(),
            locale: String::new(),
            visitor: None,
        }
    }

    pub fn from_request(
        method: &str,
        path_and_query: &str,
        headers: &HeaderMap,
        client_ip: String,
        site: &SiteConfig,
        visitor: Option<SessionClaims>,
    ) -> Self {
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(|h| host_without_port(h).to_lowercase())
            .unwrap_or_default();

        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim().to_lowercase())
            .unwrap_or_else(|| "http".to_string());

        let locale = headers
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_accept_language)
            .unwrap_or_else(|| site.default_locale.clone());

        Self {
            url: RequestUrl::parse(path_and_query),
            method: method.to_string(),
            scheme,
            host,
            headers: headers.clone(),
            cookies: CookieJar::from_headers(headers),
            client_ip,
            locale,
            visitor,
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(v) = HeaderValue::from_str(value) {
            self.headers.insert(name, v);
            if name.eq_ignore_ascii_case("cookie") {
                self.cookies = CookieJar::from_headers(&self.headers);
            }
        }
        self
    }

    pub fn with_visitor(mut self, visitor: SessionClaims) -> Self {
        self.visitor = Some(visitor);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|c| c.value())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header(header::USER_AGENT.as_str())
    }

    pub fn referrer(&self) -> Option<&str> {
        self.header(header::REFERER.as_str())
    }

    pub fn is_logged_in(&self) -> bool {
        self.visitor.is_some()
    }

    /// Request headers as a JSON object, for log entries
    pub fn headers_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .headers
            .iter()
            .filter(|(k, _)| *k != header::COOKIE && *k != header::AUTHORIZATION)
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|s| (k.as_str().to_string(), serde_json::Value::String(s.to_string())))
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

/// Parse the trusted proxy list, skipping entries that are not CIDRs or addresses
pub fn parse_trusted_proxies(entries: &[String]) -> Vec<IpNetwork> {
    entries
        .iter()
        .filter_map(|entry| match entry.trim().parse::<IpNetwork>() {
            Ok(network) => Some(network),
            Err(e) => {
                tracing::warn!("Ignoring trusted proxy {:?}: {}", entry, e);
                None
            }
        })
        .collect()
}

/// Extract client IP from forwarding headers when the peer is a trusted proxy,
/// otherwise from the connection
pub fn extract_client_ip(headers: &HeaderMap, addr: SocketAddr, trusted: &[IpNetwork]) -> String {
    if !trusted.iter().any(|network| network.contains(addr.ip())) {
        return addr.ip().to_string();
    }

    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(s) = xff.to_str() {
            if let Some(ip) = s.split(',').next() {
                return ip.trim().to_string();
            }
        }
    }

    if let Some(xri) = headers.get("x-real-ip") {
        if let Ok(s) = xri.to_str() {
            return s.to_string();
        }
    }

    addr.ip().to_string()
}

/// First language tag, in `ll_CC` form
fn parse_accept_language(value: &str) -> Option<String> {
    let first = value.split(',').next()?.split(';').next()?.trim();
    if first.is_empty() || first == "*" {
        return None;
    }

    let mut parts = first.split(['-', '_']);
    let lang = parts.next()?.to_lowercase();
    match parts.next() {
        Some(region) => Some(format!("{}_{}", lang, region.to_uppercase())),
        None => Some(lang),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accept_language() {
        assert_eq!(parse_accept_language("en-US,en;q=0.9").as_deref(), Some("en_US"));
        assert_eq!(parse_accept_language("de").as_deref(), Some("de"));
        assert_eq!(parse_accept_language("*"), None);
    }

    #[test]
    fn test_from_request() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("Example.com:8443"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        headers.insert(header::COOKIE, HeaderValue::from_static("ab=b; other=1"));

        let ctx = RequestContext::from_request(
            "GET",
            "/old?x=1",
            &headers,
            "203.0.113.9".to_string(),
            &SiteConfig::default(),
            None,
        );

        assert_eq!(ctx.host, "example.com");
        assert_eq!(ctx.scheme, "https");
        assert_eq!(ctx.locale, "en_US");
        assert_eq!(ctx.cookie("ab"), Some("b"));
        assert_eq!(ctx.url.path, "/old");
        assert!(!ctx.is_logged_in());
    }

    #[test]
    fn test_extract_client_ip() {
        let trusted = parse_trusted_proxies(&["10.0.0.0/8".to_string()]);
        let addr: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers, addr, &trusted), "10.0.0.1");

        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 10.0.0.1"));
        assert_eq!(extract_client_ip(&headers, addr, &trusted), "1.2.3.4");
    }

    #[test]
    fn test_forwarded_headers_ignored_from_untrusted_peer() {
        let trusted = parse_trusted_proxies(&["127.0.0.1/32".to_string(), "not-an-ip".to_string()]);
        assert_eq!(trusted.len(), 1);

        let addr: SocketAddr = "198.51.100.7:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        headers.insert("x-real-ip", HeaderValue::from_static("5.6.7.8"));
        assert_eq!(extract_client_ip(&headers, addr, &trusted), "198.51.100.7");
    }

    #[test]
    fn test_headers_json_skips_credentials() {
        let ctx = RequestContext::new("/")
            .with_header("cookie", "session=secret")
            .with_header("user-agent", "curl/8.0");
        let json = ctx.headers_json();
        assert_eq!(json["user-agent"], "curl/8.0");
        assert!(json.get("cookie").is_none());
    }
}
