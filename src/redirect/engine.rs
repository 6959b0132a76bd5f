//! Redirect engine - lookup, cache, selection and dispatch side effects

use std::sync::Arc;

use url::Url;

use super::cache::RedirectCache;
use super::context::RequestContext;
use super::logger::RedirectLogger;
use super::matcher::{
    build_target, dispatch_for, eligible, filter_candidates, Candidate, Dispatch, Target,
};
use super::rules::FilterRegistry;
use super::store::RedirectStore;
use super::url::{match_hash, matched_url, regex_hash, RequestUrl};
use crate::config::RedirectOptions;
use crate::error::AppError;
use crate::models::RedirectRule;

/// Per-request match outcome, threaded through resolution and logging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchState {
    /// The matcher already ran for this request
    pub resolved: bool,
    /// Id of the rule that fired
    pub matched: Option<i64>,
    pub redirect_url: Option<String>,
    pub redirect_code: Option<u16>,
    pub dispatch: Option<Dispatch>,
}

impl MatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_matched(&self) -> bool {
        self.matched.is_some()
    }
}

pub struct RedirectEngine {
    store: Arc<dyn RedirectStore>,
    cache: Arc<dyn RedirectCache>,
    filters: FilterRegistry,
    logger: RedirectLogger,
    site: Url,
}

impl RedirectEngine {
    pub fn new(
        store: Arc<dyn RedirectStore>,
        cache: Arc<dyn RedirectCache>,
        filters: FilterRegistry,
        options: &RedirectOptions,
        site: Url,
    ) -> Self {
        let logger = RedirectLogger::new(store.clone(), options.logs.clone(), options.agent.clone());
        Self {
            store,
            cache,
            filters,
            logger,
            site,
        }
    }

    pub fn logger(&self) -> &RedirectLogger {
        &self.logger
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub fn site(&self) -> &Url {
        &self.site
    }

    /// Filtered candidates for a request URL, from the cache when possible
    pub async fn candidates(&self, request: &RequestUrl) -> Result<Vec<Candidate>, AppError> {
        if let Some(cached) = self.cache.get(&request.full).await {
            return Ok(cached);
        }

        let hash = match_hash(&matched_url(&request.path));
        let mut rules = self.store.find_enabled_by_hash(&hash).await?;
        if rules.is_empty() {
            rules = self.store.find_enabled_by_hash(&regex_hash()).await?;
        }

        let candidates = filter_candidates(rules, request, &self.site);
        self.cache.put(&request.full, candidates.clone()).await;

        Ok(candidates)
    }

    /// Resolve a request to a dispatch. Runs at most once per `MatchState`;
    /// later calls return the first outcome without side effects.
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        state: &mut MatchState,
    ) -> Result<Option<Dispatch>, AppError> {
        if state.resolved {
            return Ok(state.dispatch.clone());
        }
        state.resolved = true;

        let candidates = self.candidates(&ctx.url).await?;
        let Some((rule, target, dispatch)) = self.first_dispatchable(&candidates, ctx) else {
            return Ok(None);
        };

        if let Err(e) = self.store.record_hit(rule.id).await {
            tracing::warn!("Failed to record hit for redirect {}: {}", rule.id, e);
        }

        state.matched = Some(rule.id);
        state.redirect_url = Some(target.url.clone());
        state.redirect_code = Some(dispatch.status());
        state.dispatch = Some(dispatch.clone());

        tracing::debug!(
            "{} matched redirect {} -> {:?}",
            ctx.url.full,
            rule.id,
            dispatch
        );

        self.logger.log_redirect(ctx, state, rule, &target.url).await;

        Ok(Some(dispatch))
    }

    /// First eligible candidate that yields a dispatch; rules that cannot be
    /// dispatched are skipped in favour of older ones
    fn first_dispatchable<'a>(
        &self,
        candidates: &'a [Candidate],
        ctx: &RequestContext,
    ) -> Option<(&'a RedirectRule, Target, Dispatch)> {
        for candidate in eligible(candidates, ctx, &self.filters) {
            let rule = &candidate.rule;
            let target = build_target(candidate, &ctx.url);
            if !target.unresolved.is_empty() {
                tracing::warn!(
                    "Redirect {} target has placeholders without captures: {}",
                    rule.id,
                    target.unresolved.join(", ")
                );
            }

            match dispatch_for(rule, target.url.clone(), &ctx.url) {
                Some(dispatch) => return Some((rule, target, dispatch)),
                None => tracing::warn!(
                    "Redirect {} (type {}) has no usable target, skipping",
                    rule.id,
                    rule.redirect_type
                ),
            }
        }
        None
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomRule, QueryParamPolicy, SessionClaims};
    use crate::redirect::cache::MemoryRedirectCache;
    use crate::redirect::store::testing::{regex_rule, rule, MemoryStore};

    struct Harness {
        store: Arc<MemoryStore>,
        cache: Arc<MemoryRedirectCache>,
        engine: RedirectEngine,
    }

    fn harness(rules: Vec<RedirectRule>) -> Harness {
        let store = Arc::new(MemoryStore::with_rules(rules));
        let cache = Arc::new(MemoryRedirectCache::new(64));
        let engine = RedirectEngine::new(
            store.clone(),
            cache.clone(),
            FilterRegistry::new(),
            &RedirectOptions::default(),
            Url::parse("https://example.com").unwrap(),
        );
        Harness {
            store,
            cache,
            engine,
        }
    }

    async fn resolve(h: &Harness, ctx: &RequestContext) -> Option<Dispatch> {
        let mut state = MatchState::new();
        h.engine.resolve(ctx, &mut state).await.unwrap()
    }

    fn redirect(status: u16, location: &str) -> Option<Dispatch> {
        Some(Dispatch::Redirect {
            status,
            location: location.to_string(),
        })
    }

    #[tokio::test]
    async fn test_scenario_query_ignored() {
        let h = harness(vec![rule(1, "/old", "/new")]);
        let ctx = RequestContext::new("/old?x=1");
        assert_eq!(resolve(&h, &ctx).await, redirect(301, "/new"));
        assert_eq!(h.store.hits(1), 1);
    }

    #[tokio::test]
    async fn test_scenario_query_passed() {
        let h = harness(vec![RedirectRule {
            query_param: QueryParamPolicy::Pass,
            ..rule(1, "/old", "/new")
        }]);
        let ctx = RequestContext::new("/old?x=1");
        assert_eq!(resolve(&h, &ctx).await, redirect(301, "/new?x=1"));
    }

    #[tokio::test]
    async fn test_scenario_regex_capture() {
        let h = harness(vec![regex_rule(1, "^/blog/(.*)$", "/articles/$1")]);
        let ctx = RequestContext::new("/blog/hello-world");
        assert_eq!(resolve(&h, &ctx).await, redirect(301, "/articles/hello-world"));
    }

    #[tokio::test]
    async fn test_scenario_loop_falls_through() {
        let h = harness(vec![rule(1, "/a", "/a")]);
        let ctx = RequestContext::new("/a");
        assert_eq!(resolve(&h, &ctx).await, None);
        assert_eq!(h.store.hits(1), 0);
        assert!(h.store.logs().is_empty());
    }

    #[tokio::test]
    async fn test_scenario_role_gated_rule_skipped() {
        let gated = RedirectRule {
            custom_rules: vec![CustomRule::Role(vec!["editor".to_string()])],
            ..rule(2, "/old", "/editors")
        };
        let h = harness(vec![rule(1, "/old", "/everyone"), gated]);

        let visitor = SessionClaims {
            sub: "reader".to_string(),
            roles: vec!["subscriber".to_string()],
            exp: usize::MAX,
        };
        let ctx = RequestContext::new("/old").with_visitor(visitor.clone());
        assert_eq!(resolve(&h, &ctx).await, redirect(301, "/everyone"));

        let editor = SessionClaims {
            roles: vec!["editor".to_string()],
            ..visitor
        };
        let ctx = RequestContext::new("/old").with_visitor(editor);
        assert_eq!(resolve(&h, &ctx).await, redirect(301, "/editors"));
    }

    #[tokio::test]
    async fn test_literal_rules_shadow_regex_rules() {
        let h = harness(vec![
            regex_rule(1, "^/old.*", "/from-regex"),
            rule(2, "/old", "/from-literal"),
        ]);
        assert_eq!(
            resolve(&h, &RequestContext::new("/old")).await,
            redirect(301, "/from-literal")
        );
        assert_eq!(
            resolve(&h, &RequestContext::new("/older")).await,
            redirect(301, "/from-regex")
        );
    }

    #[tokio::test]
    async fn test_resolve_runs_once_per_state() {
        let h = harness(vec![rule(1, "/old", "/new")]);
        let ctx = RequestContext::new("/old");
        let mut state = MatchState::new();

        let first = h.engine.resolve(&ctx, &mut state).await.unwrap();
        let second = h.engine.resolve(&ctx, &mut state).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.store.hits(1), 1);
        assert_eq!(h.store.logs().len(), 1);
        assert_eq!(state.matched, Some(1));
        assert_eq!(state.redirect_code, Some(301));
        assert_eq!(state.redirect_url.as_deref(), Some("/new"));
    }

    #[tokio::test]
    async fn test_candidates_are_cached() {
        let h = harness(vec![rule(1, "/old", "/new")]);
        let ctx = RequestContext::new("/old");

        resolve(&h, &ctx).await;
        let lookups = h.store.lookups();
        resolve(&h, &ctx).await;

        assert_eq!(h.store.lookups(), lookups);
        assert_eq!(h.store.hits(1), 2);
        assert_eq!(h.cache.len().await, 1);

        h.engine.clear_cache().await;
        assert_eq!(h.cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_unmatched_lookups_are_cached_too() {
        let h = harness(Vec::new());
        let ctx = RequestContext::new("/missing");

        assert_eq!(resolve(&h, &ctx).await, None);
        assert_eq!(h.store.lookups(), 2);
        assert_eq!(resolve(&h, &ctx).await, None);
        assert_eq!(h.store.lookups(), 2);
    }

    #[tokio::test]
    async fn test_distinct_unmatched_urls_do_not_grow_cache() {
        let h = harness(Vec::new());
        for i in 0..500 {
            let ctx = RequestContext::new(&format!("/missing?junk={}", i));
            assert_eq!(resolve(&h, &ctx).await, None);
        }
        assert_eq!(h.cache.len().await, 64);
    }

    #[tokio::test]
    async fn test_unresolved_placeholder_stays_literal() {
        let h = harness(vec![regex_rule(1, "^/shop/(.*)$", "/store/$1/$2")]);
        let ctx = RequestContext::new("/shop/shoes");
        assert_eq!(resolve(&h, &ctx).await, redirect(301, "/store/shoes/$2"));
    }

    #[tokio::test]
    async fn test_redirect_without_target_is_skipped() {
        let h = harness(vec![rule(1, "/old", "")]);
        assert_eq!(resolve(&h, &RequestContext::new("/old")).await, None);
        assert_eq!(h.store.hits(1), 0);
    }

    #[tokio::test]
    async fn test_undispatchable_rule_falls_back_to_older_rule() {
        let h = harness(vec![rule(1, "/old", "/new"), rule(2, "/old", "")]);
        assert_eq!(
            resolve(&h, &RequestContext::new("/old")).await,
            redirect(301, "/new")
        );
        assert_eq!(h.store.hits(2), 0);
        assert_eq!(h.store.hits(1), 1);
    }

    #[tokio::test]
    async fn test_pass_through_and_status_rules() {
        let h = harness(vec![
            RedirectRule {
                redirect_type: 0,
                ..rule(1, "/landing", "/real-page")
            },
            RedirectRule {
                redirect_type: 410,
                ..rule(2, "/gone", "")
            },
        ]);

        assert_eq!(
            resolve(&h, &RequestContext::new("/landing")).await,
            Some(Dispatch::PassThrough {
                url: "/real-page".to_string()
            })
        );
        assert_eq!(
            resolve(&h, &RequestContext::new("/gone")).await,
            Some(Dispatch::Status { status: 410 })
        );
    }

    #[tokio::test]
    async fn test_redirect_is_logged() {
        let h = harness(vec![rule(7, "/old", "/new")]);
        let ctx = RequestContext::new("/old").with_header("user-agent", "curl/8.0");
        resolve(&h, &ctx).await;

        let logs = h.store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].redirect_id, Some(7));
        assert_eq!(logs[0].sent_to.as_deref(), Some("/new"));
        assert_eq!(logs[0].http_code, 301);
        assert_eq!(logs[0].agent.as_deref(), Some("curl/8.0"));
        assert_eq!(logs[0].redirect_by.as_deref(), Some("redirect-gateway"));
        assert!(logs[0].ip.is_none());
    }
}
