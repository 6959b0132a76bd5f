//! Redirect and 404 log entries

use std::sync::Arc;

use serde_json::json;

use super::context::RequestContext;
use super::engine::MatchState;
use super::store::RedirectStore;
use super::url::mask_ip;
use crate::config::{IpLevel, LogOptions};
use crate::models::{NewLogEntry, RedirectRule};

/// Agent recorded when the origin redirects without saying who did it
const ORIGIN_AGENT: &str = "origin";
const MAX_AGENT_LEN: usize = 50;

/// Writes log entries through the store, honouring the log options
pub struct RedirectLogger {
    store: Arc<dyn RedirectStore>,
    options: LogOptions,
    /// Our own X-Redirect-By value
    agent: String,
}

impl RedirectLogger {
    pub fn new(store: Arc<dyn RedirectStore>, options: LogOptions, agent: String) -> Self {
        Self {
            store,
            options,
            agent,
        }
    }

    /// Log a redirect this gateway dispatched
    pub async fn log_redirect(
        &self,
        ctx: &RequestContext,
        state: &MatchState,
        rule: &RedirectRule,
        sent_to: &str,
    ) {
        if !self.options.redirects.enabled || state.matched != Some(rule.id) {
            return;
        }

        let entry = NewLogEntry {
            sent_to: Some(sent_to.to_string()),
            redirect_id: Some(rule.id),
            redirect_by: Some(self.agent.clone()),
            ..self.entry(ctx, rule.redirect_type, concat!(module_path!(), "::log_redirect"))
        };
        self.write(&entry).await;
    }

    /// Log a 404 the origin answered for a request no rule claimed
    pub async fn log_404(&self, ctx: &RequestContext, state: &MatchState) {
        if !self.options.log_404.enabled || state.is_matched() {
            return;
        }

        let entry = self.entry(ctx, 404, concat!(module_path!(), "::log_404"));
        self.write(&entry).await;
    }

    /// Log a redirect issued by the origin itself
    pub async fn log_external_redirect(
        &self,
        ctx: &RequestContext,
        state: &MatchState,
        status: u16,
        location: &str,
        redirect_by: Option<&str>,
    ) {
        if !self.options.external || !self.options.redirects.enabled || state.is_matched() {
            return;
        }

        let agent = external_agent(redirect_by);
        if agent.eq_ignore_ascii_case(&self.agent) {
            return;
        }

        let entry = NewLogEntry {
            sent_to: Some(location.to_string()),
            redirect_by: Some(agent),
            ..self.entry(
                ctx,
                i32::from(status),
                concat!(module_path!(), "::log_external_redirect"),
            )
        };
        self.write(&entry).await;
    }

    fn entry(&self, ctx: &RequestContext, http_code: i32, source: &str) -> NewLogEntry {
        let mut request_data = json!({ "source": [source] });
        if self.options.http_header {
            request_data["headers"] = ctx.headers_json();
        }

        NewLogEntry {
            url: ctx.url.full.clone(),
            domain: ctx.host.clone(),
            sent_to: None,
            agent: ctx.user_agent().map(str::to_string),
            referrer: ctx.referrer().map(str::to_string),
            http_code,
            request_method: ctx.method.clone(),
            ip: self.client_ip(ctx),
            redirect_id: None,
            redirect_by: None,
            request_data,
        }
    }

    fn client_ip(&self, ctx: &RequestContext) -> Option<String> {
        if !self.options.ip_address.enabled || ctx.client_ip.is_empty() {
            return None;
        }
        match self.options.ip_address.level {
            IpLevel::Full => Some(ctx.client_ip.clone()),
            IpLevel::Anonymized => Some(mask_ip(&ctx.client_ip)).filter(|ip| !ip.is_empty()),
        }
    }

    async fn write(&self, entry: &NewLogEntry) {
        if let Err(e) = self.store.write_log(entry).await {
            tracing::warn!("Failed to write {} log entry: {}", entry.kind().table(), e);
        }
    }
}

/// Lowercased X-Redirect-By, cut to 50 characters
fn external_agent(redirect_by: Option<&str>) -> String {
    match redirect_by.map(str::trim).filter(|s| !s.is_empty()) {
        Some(agent) => agent.to_lowercase().chars().take(MAX_AGENT_LEN).collect(),
        None => ORIGIN_AGENT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogKind;
    use crate::redirect::store::testing::MemoryStore;

    #[test]
    fn test_external_agent() {
        assert_eq!(external_agent(None), "origin");
        assert_eq!(external_agent(Some("  ")), "origin");
        assert_eq!(external_agent(Some("Yoast SEO")), "yoast seo");
        assert_eq!(external_agent(Some("A".repeat(80).as_str())).len(), 50);
    }

    fn logger(store: Arc<MemoryStore>, options: LogOptions) -> RedirectLogger {
        RedirectLogger::new(store, options, "redirect-gateway".to_string())
    }

    #[tokio::test]
    async fn test_404_only_logged_without_match() {
        let store = Arc::new(MemoryStore::default());
        let logger = logger(store.clone(), LogOptions::default());
        let ctx = RequestContext::new("/missing?x=1");

        let matched = MatchState {
            matched: Some(3),
            ..MatchState::default()
        };
        logger.log_404(&ctx, &matched).await;
        assert!(store.logs().is_empty());

        logger.log_404(&ctx, &MatchState::new()).await;
        let logs = store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].url, "/missing?x=1");
        assert_eq!(logs[0].kind(), LogKind::NotFound);
    }

    #[tokio::test]
    async fn test_404_logging_disabled() {
        let store = Arc::new(MemoryStore::default());
        let mut options = LogOptions::default();
        options.log_404.enabled = false;
        logger(store.clone(), options)
            .log_404(&RequestContext::new("/missing"), &MatchState::new())
            .await;
        assert!(store.logs().is_empty());
    }

    #[tokio::test]
    async fn test_external_redirect_logging() {
        let store = Arc::new(MemoryStore::default());
        let options = LogOptions {
            external: true,
            ..LogOptions::default()
        };
        let logger = logger(store.clone(), options);
        let ctx = RequestContext::new("/old-post");
        let state = MatchState::new();

        logger
            .log_external_redirect(&ctx, &state, 301, "/new-post", Some("Redirect-Gateway"))
            .await;
        assert!(store.logs().is_empty());

        logger
            .log_external_redirect(&ctx, &state, 302, "/new-post", None)
            .await;
        let logs = store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].redirect_by.as_deref(), Some("origin"));
        assert_eq!(logs[0].sent_to.as_deref(), Some("/new-post"));
        assert_eq!(logs[0].http_code, 302);
    }

    #[tokio::test]
    async fn test_external_redirect_needs_redirect_logging() {
        let store = Arc::new(MemoryStore::default());
        let mut options = LogOptions {
            external: true,
            ..LogOptions::default()
        };
        options.redirects.enabled = false;

        logger(store.clone(), options)
            .log_external_redirect(&RequestContext::new("/a"), &MatchState::new(), 302, "/b", None)
            .await;
        assert!(store.logs().is_empty());
    }

    #[tokio::test]
    async fn test_ip_and_headers_options() {
        let store = Arc::new(MemoryStore::default());
        let mut options = LogOptions::default();
        options.ip_address.enabled = true;
        options.http_header = true;
        let logger = logger(store.clone(), options);

        let mut ctx = RequestContext::new("/missing").with_header("accept", "text/html");
        ctx.client_ip = "203.0.113.42".to_string();
        logger.log_404(&ctx, &MatchState::new()).await;

        let logs = store.logs();
        assert_eq!(logs[0].ip.as_deref(), Some("203.0.113.0"));
        assert_eq!(logs[0].request_data["headers"]["accept"], "text/html");
        assert!(logs[0].request_data["source"][0]
            .as_str()
            .unwrap()
            .ends_with("log_404"));
    }
}
