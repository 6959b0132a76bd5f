//! Whole-site redirects: relocation, alias domains and the canonical host

use axum::http::{HeaderName, HeaderValue};
use url::Url;

use super::context::RequestContext;
use super::url::untrailingslash;
use crate::config::{FullSiteOptions, HeaderLocation, PreferredDomain};

/// Full-site redirects always use a permanent redirect
pub const FULL_SITE_STATUS: u16 = 301;

pub struct FullSiteRedirects {
    options: FullSiteOptions,
    site: Url,
    aliases: Vec<String>,
}

impl FullSiteRedirects {
    pub fn new(options: FullSiteOptions, site: Url) -> Self {
        let aliases = options
            .aliases
            .iter()
            .filter_map(|alias| alias_host(alias))
            .collect();

        Self {
            options,
            site,
            aliases,
        }
    }

    /// Location the whole request should be sent to, if any.
    /// Relocation wins over aliases, aliases over the canonical host.
    pub fn redirect_for(&self, ctx: &RequestContext) -> Option<String> {
        self.relocate(ctx)
            .or_else(|| self.alias(ctx))
            .or_else(|| self.canonical(ctx))
    }

    fn relocate(&self, ctx: &RequestContext) -> Option<String> {
        let relocate = &self.options.relocate;
        if !relocate.enabled {
            return None;
        }

        let new_domain = relocate.new_domain.trim();
        match Url::parse(new_domain) {
            Ok(url) if url.has_host() => Some(make_url(new_domain, &ctx.url.full)),
            _ => {
                tracing::warn!("Relocation enabled but {:?} is not a URL", new_domain);
                None
            }
        }
    }

    fn alias(&self, ctx: &RequestContext) -> Option<String> {
        if ctx.host.is_empty() || !self.aliases.iter().any(|a| *a == ctx.host) {
            return None;
        }
        Some(make_url(self.site.as_str(), &ctx.url.full))
    }

    fn canonical(&self, ctx: &RequestContext) -> Option<String> {
        let canonical = &self.options.canonical;
        if !canonical.enabled || ctx.host.is_empty() {
            return None;
        }

        let scheme = if canonical.http_to_https {
            "https"
        } else {
            ctx.scheme.as_str()
        };
        let canonical_url = format!(
            "{}://{}",
            scheme,
            preferred_host(&ctx.host, canonical.preferred_domain)
        );

        // Only redirect to a canonical host the site is actually served from
        if untrailingslash(self.site.as_str()) != canonical_url {
            return None;
        }

        let current = format!("{}://{}", ctx.scheme, ctx.host);
        if canonical_url == current {
            return None;
        }

        Some(make_url(&canonical_url, &ctx.url.full))
    }

    /// Configured headers for a response; redirects also get site headers
    pub fn headers_for(&self, location: HeaderLocation) -> Vec<(HeaderName, HeaderValue)> {
        self.options
            .http_headers
            .iter()
            .filter(|h| match (h.location, location) {
                (None, _) | (Some(HeaderLocation::Site), _) => true,
                (Some(HeaderLocation::Redirect), HeaderLocation::Redirect) => true,
                (Some(HeaderLocation::Redirect), HeaderLocation::Site) => false,
            })
            .filter_map(|h| {
                let name = h.header.trim();
                let value = h.value.trim();
                if name.is_empty() || value.is_empty() {
                    return None;
                }
                match (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    (Ok(n), Ok(v)) => Some((n, v)),
                    _ => {
                        tracing::warn!("Skipping unusable HTTP header option {:?}", name);
                        None
                    }
                }
            })
            .collect()
    }
}

/// Host of an alias entry, with or without a scheme
fn alias_host(alias: &str) -> Option<String> {
    let alias = alias.trim();
    if alias.is_empty() {
        return None;
    }

    let without_scheme = alias
        .strip_prefix("https://")
        .or_else(|| alias.strip_prefix("http://"))
        .unwrap_or(alias)
        .trim_start_matches('/');

    Url::parse(&format!("http://{}", without_scheme))
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

fn preferred_host(host: &str, preferred: PreferredDomain) -> String {
    match preferred {
        PreferredDomain::AddWww if !host.starts_with("www.") => format!("www.{}", host),
        PreferredDomain::RemoveWww => host.strip_prefix("www.").unwrap_or(host).to_string(),
        _ => host.to_string(),
    }
}

/// Join a base URL and a request path, collapsing duplicate slashes
fn make_url(base: &str, request: &str) -> String {
    let base = untrailingslash(base.trim());
    let (path, query) = match request.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (request, None),
    };

    let mut collapsed = String::with_capacity(path.len() + 1);
    for c in format!("/{}", path).chars() {
        if c == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(c);
    }

    match query {
        Some(q) => format!("{}{}?{}", base, collapsed, q),
        None => format!("{}{}", base, collapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CanonicalOptions, HttpHeaderOption, RelocateOptions};

    fn site() -> Url {
        Url::parse("https://www.example.com").unwrap()
    }

    fn ctx(scheme: &str, host: &str, path: &str) -> RequestContext {
        let mut ctx = RequestContext::new(path);
        ctx.scheme = scheme.to_string();
        ctx.host = host.to_string();
        ctx
    }

    #[test]
    fn test_make_url() {
        assert_eq!(
            make_url("https://new.example.org/", "//blog//post?x=1"),
            "https://new.example.org/blog/post?x=1"
        );
        assert_eq!(make_url("https://new.example.org", "/"), "https://new.example.org/");
    }

    #[test]
    fn test_relocate() {
        let options = FullSiteOptions {
            relocate: RelocateOptions {
                enabled: true,
                new_domain: "https://new.example.org".to_string(),
            },
            ..Default::default()
        };
        let full_site = FullSiteRedirects::new(options, site());
        assert_eq!(
            full_site.redirect_for(&ctx("https", "www.example.com", "/about?ref=1")),
            Some("https://new.example.org/about?ref=1".to_string())
        );
    }

    #[test]
    fn test_relocate_requires_url() {
        let options = FullSiteOptions {
            relocate: RelocateOptions {
                enabled: true,
                new_domain: "not a url".to_string(),
            },
            ..Default::default()
        };
        let full_site = FullSiteRedirects::new(options, site());
        assert!(full_site
            .redirect_for(&ctx("https", "www.example.com", "/"))
            .is_none());
    }

    #[test]
    fn test_alias_redirects_to_site() {
        let options = FullSiteOptions {
            aliases: vec!["http://old-brand.com/".to_string(), "alias.net".to_string()],
            ..Default::default()
        };
        let full_site = FullSiteRedirects::new(options, site());

        assert_eq!(
            full_site.redirect_for(&ctx("http", "old-brand.com", "/shop")),
            Some("https://www.example.com/shop".to_string())
        );
        assert!(full_site.redirect_for(&ctx("http", "alias.net", "/")).is_some());
        assert!(full_site
            .redirect_for(&ctx("https", "www.example.com", "/shop"))
            .is_none());
    }

    #[test]
    fn test_canonical_add_www_and_https() {
        let options = FullSiteOptions {
            canonical: CanonicalOptions {
                enabled: true,
                http_to_https: true,
                preferred_domain: PreferredDomain::AddWww,
            },
            ..Default::default()
        };
        let full_site = FullSiteRedirects::new(options, site());

        assert_eq!(
            full_site.redirect_for(&ctx("http", "example.com", "/page")),
            Some("https://www.example.com/page".to_string())
        );
        assert!(full_site
            .redirect_for(&ctx("https", "www.example.com", "/page"))
            .is_none());
    }

    #[test]
    fn test_canonical_never_leaves_site() {
        let options = FullSiteOptions {
            canonical: CanonicalOptions {
                enabled: true,
                http_to_https: true,
                preferred_domain: PreferredDomain::RemoveWww,
            },
            ..Default::default()
        };
        // Site is served from www, so removing www would loop
        let full_site = FullSiteRedirects::new(options, site());
        assert!(full_site
            .redirect_for(&ctx("http", "www.example.com", "/page"))
            .is_none());
    }

    #[test]
    fn test_headers_by_location() {
        let header = |name: &str, location| HttpHeaderOption {
            header: name.to_string(),
            value: "1".to_string(),
            location,
        };
        let options = FullSiteOptions {
            http_headers: vec![
                header("x-everywhere", None),
                header("x-site", Some(HeaderLocation::Site)),
                header("x-redirect", Some(HeaderLocation::Redirect)),
                header("bad header", None),
            ],
            ..Default::default()
        };
        let full_site = FullSiteRedirects::new(options, site());

        let names = |location| -> Vec<String> {
            full_site
                .headers_for(location)
                .into_iter()
                .map(|(n, _)| n.to_string())
                .collect()
        };
        assert_eq!(names(HeaderLocation::Site), vec!["x-everywhere", "x-site"]);
        assert_eq!(
            names(HeaderLocation::Redirect),
            vec!["x-everywhere", "x-site", "x-redirect"]
        );
    }
}
