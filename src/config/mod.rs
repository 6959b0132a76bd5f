//! Configuration module

use serde::Deserialize;

use crate::models::QueryParamPolicy;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub redirects: RedirectOptions,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DatabaseConfig {
    pub mysql_url: Option<String>,
}

/// The site the gateway fronts
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Public home URL, used to resolve relative sources and targets
    #[serde(default = "default_site_url")]
    pub url: String,
    /// Upstream that serves everything that is not redirected
    #[serde(default = "default_origin_url")]
    pub origin_url: String,
    /// Locale reported when the visitor sends no Accept-Language
    #[serde(default = "default_locale")]
    pub default_locale: String,
    /// Path prefixes that never go through the redirect pipeline
    #[serde(default = "default_protected_paths")]
    pub protected_paths: Vec<String>,
    #[serde(default = "default_origin_timeout_ms")]
    pub origin_timeout_ms: u64,
    /// Peers (CIDR) whose X-Forwarded-For / X-Real-IP headers are believed
    #[serde(default = "default_trusted_proxies")]
    pub trusted_proxies: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            url: default_site_url(),
            origin_url: default_origin_url(),
            default_locale: default_locale(),
            protected_paths: default_protected_paths(),
            origin_timeout_ms: default_origin_timeout_ms(),
            trusted_proxies: default_trusted_proxies(),
        }
    }
}

impl SiteConfig {
    pub fn is_protected_path(&self, path: &str) -> bool {
        self.protected_paths
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    /// Role a session needs to use the admin API
    #[serde(default = "default_admin_role")]
    pub admin_role: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            session_cookie: default_session_cookie(),
            admin_role: default_admin_role(),
        }
    }
}

/// Redirect behaviour options
#[derive(Debug, Clone, Deserialize)]
pub struct RedirectOptions {
    /// Value sent in X-Redirect-By and recorded as our own agent
    #[serde(default = "default_agent")]
    pub agent: String,
    #[serde(default)]
    pub defaults: RedirectDefaults,
    #[serde(default)]
    pub logs: LogOptions,
    #[serde(default)]
    pub cache: CacheOptions,
    #[serde(default)]
    pub full_site: FullSiteOptions,
    /// Where the nginx rule snippet is regenerated after rule changes
    #[serde(default)]
    pub server_rules_path: Option<String>,
}

impl Default for RedirectOptions {
    fn default() -> Self {
        Self {
            agent: default_agent(),
            defaults: RedirectDefaults::default(),
            logs: LogOptions::default(),
            cache: CacheOptions::default(),
            full_site: FullSiteOptions::default(),
            server_rules_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedirectDefaults {
    #[serde(default = "default_redirect_type")]
    pub redirect_type: i32,
    #[serde(default)]
    pub query_param: QueryParamPolicy,
}

impl Default for RedirectDefaults {
    fn default() -> Self {
        Self {
            redirect_type: default_redirect_type(),
            query_param: QueryParamPolicy::default(),
        }
    }
}

/// How long a log or cache entry lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Retention {
    Hour,
    Day,
    #[default]
    Week,
    Forever,
}

impl Retention {
    /// Length of the window, `None` for forever
    pub fn duration(&self) -> Option<chrono::Duration> {
        match self {
            Retention::Hour => Some(chrono::Duration::hours(1)),
            Retention::Day => Some(chrono::Duration::days(1)),
            Retention::Week => Some(chrono::Duration::weeks(1)),
            Retention::Forever => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogKindOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub length: Retention,
}

impl Default for LogKindOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            length: Retention::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpLevel {
    Full,
    #[default]
    Anonymized,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpLogOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub level: IpLevel,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogOptions {
    #[serde(default)]
    pub log_404: LogKindOptions,
    #[serde(default)]
    pub redirects: LogKindOptions,
    /// Also log redirects issued by the origin
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub ip_address: IpLogOptions,
    /// Store request headers in request_data
    #[serde(default)]
    pub http_header: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpCacheOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cache_length")]
    pub length: Retention,
}

impl Default for HttpCacheOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            length: default_cache_length(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheOptions {
    #[serde(default)]
    pub http_header: HttpCacheOptions,
    /// Most request URLs whose lookups are kept in memory
    #[serde(default = "default_lookup_capacity")]
    pub lookup_capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            http_header: HttpCacheOptions::default(),
            lookup_capacity: default_lookup_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelocateOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub new_domain: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreferredDomain {
    #[default]
    AsIs,
    AddWww,
    RemoveWww,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CanonicalOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub http_to_https: bool,
    #[serde(default)]
    pub preferred_domain: PreferredDomain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderLocation {
    Site,
    Redirect,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpHeaderOption {
    pub header: String,
    pub value: String,
    /// `None` applies the header everywhere
    #[serde(default)]
    pub location: Option<HeaderLocation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FullSiteOptions {
    #[serde(default)]
    pub relocate: RelocateOptions,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub canonical: CanonicalOptions,
    #[serde(default)]
    pub http_headers: Vec<HttpHeaderOption>,
}

fn default_true() -> bool {
    true
}

fn default_jwt_secret() -> String {
    "CHANGE_ME_IN_PRODUCTION".to_string()
}

fn default_session_cookie() -> String {
    "rg_session".to_string()
}

fn default_admin_role() -> String {
    "administrator".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_site_url() -> String {
    "http://localhost".to_string()
}

fn default_origin_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_locale() -> String {
    "en_US".to_string()
}

fn default_protected_paths() -> Vec<String> {
    vec!["/api/".to_string(), "/health".to_string()]
}

fn default_origin_timeout_ms() -> u64 {
    30000
}

fn default_trusted_proxies() -> Vec<String> {
    vec!["127.0.0.1/32".to_string(), "::1/128".to_string()]
}

fn default_agent() -> String {
    "redirect-gateway".to_string()
}

fn default_redirect_type() -> i32 {
    301
}

fn default_lookup_capacity() -> usize {
    10_000
}

fn default_cache_length() -> Retention {
    Retention::Hour
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("REDIRECTGW").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize().unwrap_or_else(|e| {
            tracing::warn!("Invalid configuration, using defaults: {}", e);
            Config::default()
        });

        Ok(config)
    }
}
