//! Response headers for redirects and hop-by-hop filtering

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use chrono::{DateTime, Utc};

use crate::config::HttpCacheOptions;

/// Expiry date sent with no-cache headers
const EXPIRED: &str = "Wed, 11 Jan 1984 05:00:00 GMT";

/// Location, X-Redirect-By and cache headers for a redirect
pub fn redirect_headers(
    status: u16,
    location: &str,
    agent: &str,
    cache: &HttpCacheOptions,
    now: DateTime<Utc>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    match HeaderValue::from_str(location) {
        Ok(v) => {
            headers.insert(header::LOCATION, v);
        }
        Err(e) => tracing::warn!("Unusable redirect location {:?}: {}", location, e),
    }
    if let Ok(v) = HeaderValue::from_str(agent) {
        headers.insert(HeaderName::from_static("x-redirect-by"), v);
    }

    for (name, value) in cache_headers(status, cache, now) {
        headers.insert(name, value);
    }

    headers
}

/// 307s and disabled caching forbid caching; cached 301s expire after the configured length
pub fn cache_headers(
    status: u16,
    cache: &HttpCacheOptions,
    now: DateTime<Utc>,
) -> Vec<(HeaderName, HeaderValue)> {
    if status == 307 || !cache.enabled {
        return vec![
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache, must-revalidate, max-age=0"),
            ),
            (header::EXPIRES, HeaderValue::from_static(EXPIRED)),
        ];
    }

    if status != 301 {
        return Vec::new();
    }

    let Some(length) = cache.length.duration() else {
        return Vec::new();
    };

    let expires = (now + length).format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    let mut headers = Vec::with_capacity(2);
    if let Ok(v) = HeaderValue::from_str(&expires) {
        headers.push((header::EXPIRES, v));
    }
    if let Ok(v) = HeaderValue::from_str(&format!("max-age={}", length.num_seconds())) {
        headers.push((header::CACHE_CONTROL, v));
    }
    headers
}

/// Check if a header is hop-by-hop
pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Retention;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn cache(enabled: bool, length: Retention) -> HttpCacheOptions {
        HttpCacheOptions { enabled, length }
    }

    #[test]
    fn test_redirect_headers() {
        let headers = redirect_headers(
            302,
            "/new",
            "redirect-gateway",
            &HttpCacheOptions::default(),
            now(),
        );
        assert_eq!(headers[header::LOCATION], "/new");
        assert_eq!(headers["x-redirect-by"], "redirect-gateway");
        assert_eq!(headers[header::EXPIRES], EXPIRED);
    }

    #[test]
    fn test_307_is_never_cached() {
        let headers = cache_headers(307, &cache(true, Retention::Week), now());
        assert_eq!(headers[1].1, EXPIRED);
    }

    #[test]
    fn test_cached_301_lengths() {
        let headers = cache_headers(301, &cache(true, Retention::Hour), now());
        assert_eq!(headers[0].1, "Fri, 01 Mar 2024 13:00:00 GMT");
        assert_eq!(headers[1].1, "max-age=3600");

        let headers = cache_headers(301, &cache(true, Retention::Day), now());
        assert_eq!(headers[1].1, "max-age=86400");

        let headers = cache_headers(301, &cache(true, Retention::Week), now());
        assert_eq!(headers[1].1, "max-age=604800");

        assert!(cache_headers(301, &cache(true, Retention::Forever), now()).is_empty());
    }

    #[test]
    fn test_other_redirects_without_cache_headers() {
        assert!(cache_headers(302, &cache(true, Retention::Hour), now()).is_empty());
    }

    #[test]
    fn test_hop_by_hop() {
        assert!(is_hop_by_hop_header("Transfer-Encoding"));
        assert!(!is_hop_by_hop_header("content-type"));
    }
}
