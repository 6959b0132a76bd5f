//! Redirect matcher - candidate filtering and target construction

use serde::Serialize;
use url::{form_urlencoded, Url};

use super::context::RequestContext;
use super::pattern::{capture, compile_source, substitute};
use super::rules::{custom_rules_match, FilterRegistry};
use super::url::{
    add_query_args, comparable_url, encode_spaces, format_target_url, has_trailing_slash,
    parse_query, split_url, untrailingslash, RequestUrl,
};
use crate::models::{QueryParamPolicy, RedirectRule};

/// A rule that survived path/query filtering for one request URL
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub rule: RedirectRule,
    /// Regex captures, group 0 first; empty for literal rules
    pub captures: Vec<String>,
}

/// What the front handler should do with the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Redirect { status: u16, location: String },
    /// Serve the target as if it had been requested
    PassThrough { url: String },
    /// Answer with a bare status and no location
    Status { status: u16 },
}

impl Dispatch {
    pub fn status(&self) -> u16 {
        match self {
            Dispatch::Redirect { status, .. } | Dispatch::Status { status } => *status,
            Dispatch::PassThrough { .. } => 0,
        }
    }
}

/// Drop every rule that cannot apply to this request, keeping the store order
pub fn filter_candidates(
    rules: Vec<RedirectRule>,
    request: &RequestUrl,
    site: &Url,
) -> Vec<Candidate> {
    let mut candidates = Vec::with_capacity(rules.len());

    for rule in rules {
        if rule.regex {
            let regex = match compile_source(&rule.source_url, rule.ignore_case) {
                Ok(re) => re,
                Err(e) => {
                    tracing::warn!("Redirect {} has an invalid source pattern: {}", rule.id, e);
                    continue;
                }
            };

            if let Some(captures) = capture(&regex, &request.full) {
                candidates.push(Candidate { rule, captures });
            }
            continue;
        }

        if is_redirect_loop(&rule, site) {
            tracing::debug!("Redirect {} skipped: source and target are the same", rule.id);
            continue;
        }

        if !source_path_matches(&rule, &request.path) {
            continue;
        }

        if !query_matches(&rule, request.query.as_deref()) {
            continue;
        }

        candidates.push(Candidate {
            rule,
            captures: Vec::new(),
        });
    }

    candidates
}

/// Source and target resolve to the same scheme, host and path
pub fn is_redirect_loop(rule: &RedirectRule, site: &Url) -> bool {
    let target = format_target_url(&rule.target_url);
    if target.is_empty() {
        return false;
    }

    let (Some(source), Some(target)) = (
        comparable_url(&format_target_url(&rule.source_url), site),
        comparable_url(&target, site),
    ) else {
        return false;
    };

    if source == target {
        return true;
    }

    rule.ignore_slash && untrailingslash(&source) == untrailingslash(&target)
}

/// Slash and case checks the hash lookup could not do
fn source_path_matches(rule: &RedirectRule, request_path: &str) -> bool {
    let (source_path, _) = split_url(&rule.source_url);

    if !rule.ignore_slash && has_trailing_slash(&source_path) != has_trailing_slash(request_path) {
        return false;
    }

    if !rule.ignore_case && untrailingslash(&source_path) != untrailingslash(request_path) {
        return false;
    }

    true
}

/// Only `exact` rules look at the query string; both sides must carry the same pairs
fn query_matches(rule: &RedirectRule, request_query: Option<&str>) -> bool {
    if rule.query_param != QueryParamPolicy::Exact {
        return true;
    }

    let (_, source_query) = split_url(&rule.source_url);
    parse_query(source_query.as_deref().unwrap_or_default())
        == parse_query(request_query.unwrap_or_default())
}

/// Candidates whose custom rules all pass, in selection order
pub fn eligible<'a, 'b>(
    candidates: &'a [Candidate],
    ctx: &'b RequestContext,
    filters: &'b FilterRegistry,
) -> impl Iterator<Item = &'a Candidate> + 'b
where
    'a: 'b,
{
    candidates
        .iter()
        .filter(move |c| custom_rules_match(&c.rule, ctx, filters))
}

/// Target URL with placeholders replaced and the query policy applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub url: String,
    pub unresolved: Vec<String>,
}

pub fn build_target(candidate: &Candidate, request: &RequestUrl) -> Target {
    let rule = &candidate.rule;
    let mut target_url = format_target_url(&rule.target_url);
    let mut unresolved = Vec::new();

    if rule.regex {
        let substitution = substitute(&target_url, &candidate.captures);
        unresolved = substitution.unresolved;
        target_url = encode_spaces(&substitution.url);
    }

    if let Some(query) = request.query.as_deref() {
        if matches!(rule.query_param, QueryParamPolicy::Pass | QueryParamPolicy::Utm) {
            let args: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .filter(|(k, _)| rule.query_param == QueryParamPolicy::Pass || k.starts_with("utm_"))
                .collect();
            target_url = add_query_args(&target_url, &args);
        }
    }

    Target {
        url: target_url,
        unresolved,
    }
}

/// Turn a selected rule into a dispatch, `None` when it cannot be dispatched
pub fn dispatch_for(rule: &RedirectRule, target: String, request: &RequestUrl) -> Option<Dispatch> {
    if rule.is_pass_through() {
        let url = if target.is_empty() {
            request.full.clone()
        } else {
            target
        };
        return Some(Dispatch::PassThrough { url });
    }

    let status = u16::try_from(rule.redirect_type).ok()?;

    if rule.is_redirect_type() {
        if target.is_empty() {
            return None;
        }
        return Some(Dispatch::Redirect {
            status,
            location: target,
        });
    }

    axum::http::StatusCode::from_u16(status).ok()?;
    Some(Dispatch::Status { status })
}
