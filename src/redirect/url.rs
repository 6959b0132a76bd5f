//! URL helpers shared by the matcher, the full-site redirects and the admin API

use std::collections::BTreeMap;
use std::net::IpAddr;

use sha1::{Digest, Sha1};
use url::{form_urlencoded, Url};

/// Stored in `source_url_match` for regex rules
pub const REGEX_MATCH: &str = "regex";

/// Inbound request URL, split once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUrl {
    /// Path plus query exactly as requested, the cache key
    pub full: String,
    pub path: String,
    pub query: Option<String>,
}

impl RequestUrl {
    pub fn parse(raw: &str) -> Self {
        let without_fragment = raw.split('#').next().unwrap_or_default();
        let (path, query) = match without_fragment.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (without_fragment, None),
        };

        let path = if path.is_empty() { "/" } else { path };
        let query = query.filter(|q| !q.is_empty()).map(str::to_string);

        let full = match &query {
            Some(q) => format!("{}?{}", path, q),
            None => path.to_string(),
        };

        Self {
            full,
            path: path.to_string(),
            query,
        }
    }
}

/// Parse the configured site URL, falling back to localhost
pub fn parse_site_url(raw: &str) -> Url {
    Url::parse(raw).unwrap_or_else(|e| {
        tracing::warn!("Invalid site url {:?} ({}), using http://localhost", raw, e);
        Url::parse("http://localhost").expect("static url")
    })
}

pub fn untrailingslash(s: &str) -> &str {
    s.trim_end_matches(['/', '\\'])
}

pub fn has_trailing_slash(s: &str) -> bool {
    s.ends_with('/') || s.ends_with('\\')
}

/// Path and query of a stored URL, absolute or relative
pub fn split_url(raw: &str) -> (String, Option<String>) {
    let raw = raw.trim();
    if let Ok(parsed) = Url::parse(raw) {
        if parsed.has_host() {
            return (
                parsed.path().to_string(),
                parsed.query().filter(|q| !q.is_empty()).map(str::to_string),
            );
        }
    }

    let without_fragment = raw.split('#').next().unwrap_or_default();
    match without_fragment.split_once('?') {
        Some((p, q)) => (
            p.to_string(),
            Some(q.to_string()).filter(|q| !q.is_empty()),
        ),
        None => (without_fragment.to_string(), None),
    }
}

/// Normalized lookup form of a literal source: lowercase, no trailing slash
pub fn matched_url(source: &str) -> String {
    let (path, _) = split_url(source);
    let trimmed = untrailingslash(&path).to_lowercase();
    if trimmed.starts_with('/') {
        trimmed
    } else {
        format!("/{}", trimmed)
    }
}

pub fn match_hash(matched: &str) -> String {
    hex::encode(Sha1::digest(matched.as_bytes()))
}

/// Sentinel hash shared by every regex rule
pub fn regex_hash() -> String {
    match_hash(REGEX_MATCH)
}

fn is_absolute(raw: &str) -> bool {
    raw.starts_with("//") || Url::parse(raw).map(|u| u.has_host()).unwrap_or(false)
}

/// Trimmed target, relative targets always start with a slash
pub fn format_target_url(target: &str) -> String {
    let target = target.trim();
    if target.is_empty() || is_absolute(target) || target.starts_with('/') {
        return target.to_string();
    }
    format!("/{}", target)
}

/// Source resolved against the site, as the self-test requests it
pub fn format_source_url(source: &str, site: &Url) -> String {
    let source = source.trim();
    if is_absolute(source) {
        return source.to_string();
    }
    let relative = if source.starts_with('/') {
        source.to_string()
    } else {
        format!("/{}", source)
    };
    site.join(&relative)
        .map(|u| u.to_string())
        .unwrap_or(relative)
}

/// scheme://host[:port]/path of a URL resolved against the site
pub fn comparable_url(raw: &str, site: &Url) -> Option<String> {
    let resolved = site.join(raw.trim()).ok()?;
    let host = resolved.host_str()?;
    let port = resolved.port().map(|p| format!(":{}", p)).unwrap_or_default();
    Some(format!(
        "{}://{}{}{}",
        resolved.scheme(),
        host,
        port,
        resolved.path()
    ))
}

/// Decoded query pairs; later keys win
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Add (or replace) query arguments on a URL, encoding every value
pub fn add_query_args(target: &str, args: &[(String, String)]) -> String {
    if args.is_empty() {
        return target.to_string();
    }

    let (without_fragment, fragment) = match target.split_once('#') {
        Some((t, f)) => (t, Some(f)),
        None => (target, None),
    };
    let (base, existing) = match without_fragment.split_once('?') {
        Some((b, q)) => (b, q),
        None => (without_fragment, ""),
    };

    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(existing.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    for (key, value) in args {
        match pairs.iter_mut().find(|(k, _)| k == key) {
            Some(pair) => pair.1 = value.clone(),
            None => pairs.push((key.clone(), value.clone())),
        }
    }

    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter())
        .finish();

    let mut url = format!("{}?{}", base, query);
    if let Some(fragment) = fragment {
        url.push('#');
        url.push_str(fragment);
    }
    url
}

/// Spaces become %20 in the path and + in the query
pub fn encode_spaces(target: &str) -> String {
    match target.split_once('?') {
        Some((path, query)) => format!("{}?{}", path.replace(' ', "%20"), query.replace(' ', "+")),
        None => target.replace(' ', "%20"),
    }
}

/// Absolute URL pointing at a host other than the site's
pub fn is_external(target: &str, site: &Url) -> bool {
    if !is_absolute(target) {
        return false;
    }
    match site.join(target) {
        Ok(resolved) => resolved.host_str() != site.host_str(),
        Err(_) => false,
    }
}

pub fn host_without_port(host: &str) -> &str {
    if host.starts_with('[') {
        // [v6]:port
        return host.split(']').next().map(|h| h.trim_start_matches('[')).unwrap_or(host);
    }
    host.split(':').next().unwrap_or(host)
}

/// Zero the last IPv4 octet, or everything after the first 48 bits of an IPv6 address
pub fn mask_ip(ip: &str) -> String {
    match ip.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let [a, b, c, _] = v4.octets();
            format!("{}.{}.{}.0", a, b, c)
        }
        Ok(IpAddr::V6(v6)) => {
            let mut segments = v6.segments();
            for segment in segments.iter_mut().skip(3) {
                *segment = 0;
            }
            std::net::Ipv6Addr::from(segments).to_string()
        }
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> Url {
        Url::parse("https://example.com").unwrap()
    }

    #[test]
    fn test_request_url_parse() {
        let url = RequestUrl::parse("/old?x=1#frag");
        assert_eq!(url.path, "/old");
        assert_eq!(url.query.as_deref(), Some("x=1"));
        assert_eq!(url.full, "/old?x=1");

        let url = RequestUrl::parse("");
        assert_eq!(url.path, "/");
        assert!(url.query.is_none());

        let url = RequestUrl::parse("/a?");
        assert!(url.query.is_none());
        assert_eq!(url.full, "/a");
    }

    #[test]
    fn test_matched_url() {
        assert_eq!(matched_url("/Old/Page/"), "/old/page");
        assert_eq!(matched_url("old?x=1"), "/old");
        assert_eq!(matched_url("https://example.com/About/"), "/about");
        assert_eq!(matched_url("/"), "/");
    }

    #[test]
    fn test_match_hash_is_stable() {
        assert_eq!(match_hash("/old"), match_hash("/old"));
        assert_ne!(match_hash("/old"), regex_hash());
        assert_eq!(regex_hash().len(), 40);
    }

    #[test]
    fn test_format_target_url() {
        assert_eq!(format_target_url("  new "), "/new");
        assert_eq!(format_target_url("/new"), "/new");
        assert_eq!(format_target_url("https://other.com/x"), "https://other.com/x");
        assert_eq!(format_target_url(""), "");
    }

    #[test]
    fn test_comparable_url() {
        assert_eq!(
            comparable_url("/a?x=1", &site()).as_deref(),
            Some("https://example.com/a")
        );
        assert_eq!(
            comparable_url("https://example.com/a", &site()),
            comparable_url("/a", &site())
        );
        assert_eq!(
            comparable_url("http://example.com:8080/a", &site()).as_deref(),
            Some("http://example.com:8080/a")
        );
    }

    #[test]
    fn test_add_query_args() {
        let args = vec![("x".to_string(), "a b".to_string())];
        assert_eq!(add_query_args("/new", &args), "/new?x=a+b");
        assert_eq!(add_query_args("/new?y=2", &args), "/new?y=2&x=a+b");
        assert_eq!(add_query_args("/new?x=2#top", &args), "/new?x=a+b#top");
        assert_eq!(add_query_args("/new", &[]), "/new");
    }

    #[test]
    fn test_encode_spaces() {
        assert_eq!(encode_spaces("/a b?q=c d"), "/a%20b?q=c+d");
        assert_eq!(encode_spaces("/a b"), "/a%20b");
    }

    #[test]
    fn test_is_external() {
        assert!(is_external("https://other.com/x", &site()));
        assert!(!is_external("https://example.com/x", &site()));
        assert!(!is_external("/x", &site()));
    }

    #[test]
    fn test_mask_ip() {
        assert_eq!(mask_ip("203.0.113.42"), "203.0.113.0");
        assert_eq!(mask_ip("2001:db8:85a3:1:2:3:4:5"), "2001:db8:85a3::");
        assert_eq!(mask_ip("garbage"), "");
    }

    #[test]
    fn test_host_without_port() {
        assert_eq!(host_without_port("example.com:8080"), "example.com");
        assert_eq!(host_without_port("[::1]:80"), "::1");
        assert_eq!(host_without_port("example.com"), "example.com");
    }
}
