//! Proxy module - front handler and origin forwarding

mod handler;
mod headers;

pub use self::handler::gateway_handler;

use std::sync::Arc;
use std::time::Duration;

use ipnetwork::IpNetwork;

use crate::config::{AuthConfig, Config, RedirectOptions, SiteConfig};
use crate::db::AppState;
use crate::redirect::url::parse_site_url;
use crate::redirect::{
    parse_trusted_proxies, FilterRegistry, FullSiteRedirects, MemoryRedirectCache,
    RedirectEngine, SelfTester,
};
use crate::rewrite::{RewriteEvent, RewriteNotifier};

/// Shared gateway state
#[derive(Clone)]
pub struct ProxyState {
    pub app_state: AppState,
    pub engine: Arc<RedirectEngine>,
    pub full_site: Arc<FullSiteRedirects>,
    pub self_tester: Arc<SelfTester>,
    pub http_client: reqwest::Client,
    pub site: SiteConfig,
    pub options: Arc<RedirectOptions>,
    pub auth_config: AuthConfig,
    pub rewrite: RewriteNotifier,
    pub trusted_proxies: Arc<Vec<IpNetwork>>,
}

impl ProxyState {
    pub fn new(app_state: AppState, config: &Config, rewrite: RewriteNotifier) -> anyhow::Result<Self> {
        let site_url = parse_site_url(&config.site.url);
        let options = config.redirects.clone();

        // Empty on every start
        let cache = Arc::new(MemoryRedirectCache::new(options.cache.lookup_capacity));
        let engine = RedirectEngine::new(
            app_state.mysql.clone(),
            cache,
            FilterRegistry::new(),
            &options,
            site_url.clone(),
        );

        let full_site = FullSiteRedirects::new(options.full_site.clone(), site_url.clone());
        let self_tester = SelfTester::new(site_url, options.agent.clone())?;

        // Origin redirects are passed to the client untouched
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.site.origin_timeout_ms))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            app_state,
            engine: Arc::new(engine),
            full_site: Arc::new(full_site),
            self_tester: Arc::new(self_tester),
            http_client,
            site: config.site.clone(),
            options: Arc::new(options),
            auth_config: config.auth.clone(),
            rewrite,
            trusted_proxies: Arc::new(parse_trusted_proxies(&config.site.trusted_proxies)),
        })
    }

    pub async fn after_mutation(&self, event: RewriteEvent) {
        apply_mutation(&self.engine, &self.rewrite, event).await;
    }
}

/// Every rule mutation drops the whole lookup cache and notifies the rewrite hook
pub async fn apply_mutation(engine: &RedirectEngine, rewrite: &RewriteNotifier, event: RewriteEvent) {
    engine.clear_cache().await;
    tracing::info!("Redirect rules changed: {:?}", event);
    rewrite.notify(event);
}
