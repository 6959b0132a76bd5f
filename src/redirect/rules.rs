//! Custom rule evaluation
//!
//! A matched redirect only fires when every one of its custom rules is
//! satisfied by the current request. Rules are checked in order and the
//! first failure vetoes the redirect.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use ipnetwork::IpNetwork;
use regex::Regex;

use super::context::RequestContext;
use crate::models::{CustomRule, LoginState, RedirectRule, ValueMatch};

const AGENT_MOBILE: &str = "iPad|iPod|iPhone|Android|BlackBerry|SymbianOS|SCH-Md+|Opera Mini|Windows CE|Nokia|SonyEricsson|webOS|PalmOS";
const AGENT_FEEDS: &str = "Bloglines|feed|rss";
const AGENT_LIBRARIES: &str = "cURL|Java|libwww-perl|PHP|urllib";

/// Callback behind a `wp_filter` rule: receives the request URL and the redirect
pub type FilterFn = dyn Fn(&str, &RedirectRule) -> bool + Send + Sync;

/// Named extension points custom rules can call into
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<FilterFn>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(&str, &RedirectRule) -> bool + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Unknown names evaluate to false
    pub fn apply(&self, name: &str, url: &str, rule: &RedirectRule) -> bool {
        self.filters
            .get(name)
            .map(|filter| filter(url, rule))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// True when every custom rule of `rule` passes for this request
pub fn custom_rules_match(
    rule: &RedirectRule,
    ctx: &RequestContext,
    filters: &FilterRegistry,
) -> bool {
    rule.custom_rules
        .iter()
        .all(|custom| custom.is_satisfied(ctx, filters, rule))
}

impl CustomRule {
    pub fn is_satisfied(
        &self,
        ctx: &RequestContext,
        filters: &FilterRegistry,
        rule: &RedirectRule,
    ) -> bool {
        match self {
            CustomRule::Login(state) => match state {
                LoginState::LoggedIn => ctx.is_logged_in(),
                LoginState::LoggedOut => !ctx.is_logged_in(),
                LoginState::Unrestricted(_) => true,
            },
            CustomRule::Role(roles) => match &ctx.visitor {
                Some(visitor) => roles.iter().any(|role| visitor.has_role(role)),
                None => false,
            },
            CustomRule::Filter(names) => names
                .iter()
                .any(|name| filters.apply(name, &ctx.url.full, rule)),
            CustomRule::Agent(matcher) => agent_matches(matcher, ctx.user_agent()),
            CustomRule::Referrer(matcher) => matcher.matches(ctx.referrer()),
            CustomRule::Cookie { key, matcher } => matcher.matches(ctx.cookie(key)),
            CustomRule::Header { key, matcher } => matcher.matches(ctx.header(key)),
            CustomRule::Ip(matcher) => ip_matches(matcher, &ctx.client_ip),
            CustomRule::Server(matcher) => matcher.matches(Some(ctx.host.as_str())),
            CustomRule::Locale(matcher) => matcher.matches(Some(ctx.locale.as_str())),
            CustomRule::Other { kind, .. } => {
                tracing::debug!("Custom rule type {:?} has no request value, failing", kind);
                false
            }
        }
    }
}

impl ValueMatch {
    /// Exact membership, or an unanchored search per pattern when `regex` is set
    pub fn matches(&self, value: Option<&str>) -> bool {
        let Some(value) = value else {
            return false;
        };

        if self.regex {
            self.values.iter().any(|pattern| regex_search(pattern, value))
        } else {
            self.values.iter().any(|v| v == value)
        }
    }
}

fn agent_matches(matcher: &ValueMatch, agent: Option<&str>) -> bool {
    let Some(agent) = agent else {
        return false;
    };

    matcher.values.iter().any(|item| {
        let preset = match item.as_str() {
            "mobile" => Some(AGENT_MOBILE),
            "feeds" => Some(AGENT_FEEDS),
            "libraries" => Some(AGENT_LIBRARIES),
            _ => None,
        };

        match preset {
            Some(pattern) => regex_search(pattern, agent),
            None if matcher.regex => regex_search(item, agent),
            None => item == agent,
        }
    })
}

/// Exact values may also be CIDR networks
fn ip_matches(matcher: &ValueMatch, client_ip: &str) -> bool {
    if client_ip.is_empty() {
        return false;
    }
    if matcher.matches(Some(client_ip)) {
        return true;
    }
    if matcher.regex {
        return false;
    }

    let Ok(ip) = client_ip.parse::<IpAddr>() else {
        return false;
    };
    matcher
        .values
        .iter()
        .filter_map(|v| v.parse::<IpNetwork>().ok())
        .any(|network| network.contains(ip))
}

fn regex_search(pattern: &str, value: &str) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(value),
        Err(e) => {
            tracing::debug!("Invalid custom rule pattern {:?}: {}", pattern, e);
            false
        }
    }
}
