//! Redirect resolution - matcher, custom rules, cache and full-site redirects

pub mod cache;
pub mod context;
pub mod engine;
pub mod full_site;
pub mod logger;
pub mod matcher;
pub mod pattern;
pub mod rules;
pub mod store;
pub mod url;

pub use self::cache::MemoryRedirectCache;
pub use self::context::{extract_client_ip, parse_trusted_proxies, RequestContext};
pub use self::engine::{MatchState, RedirectEngine};
pub use self::full_site::FullSiteRedirects;
pub use self::matcher::Dispatch;
pub use self::rules::FilterRegistry;
pub use self::self_test::SelfTester;
pub use self::store::RedirectStore;
