//! Storage seam used while resolving requests

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::{NewLogEntry, NewRedirect, RedirectRule};

/// Rule lookup and dispatch side effects
#[async_trait]
pub trait RedirectStore: Send + Sync {
    /// Enabled rules with this match hash, newest first
    async fn find_enabled_by_hash(&self, hash: &str) -> Result<Vec<RedirectRule>, AppError>;

    /// Atomically add one to the rule's hit counter
    async fn record_hit(&self, redirect_id: i64) -> Result<(), AppError>;

    async fn write_log(&self, entry: &NewLogEntry) -> Result<(), AppError>;
}

/// Writes behind redirect creation
#[async_trait]
pub trait RedirectWriter: Send + Sync {
    /// Whether a redirect with the same source already exists
    async fn source_taken(&self, redirect: &NewRedirect) -> Result<bool, AppError>;

    async fn insert_redirect(&self, redirect: &NewRedirect) -> Result<i64, AppError>;

    /// Drop the 404 log entries a new redirect replaces
    async fn forget_404s(&self, url: &str) -> Result<u64, AppError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chrono::Utc;

    use super::*;
    use crate::models::QueryParamPolicy;
    use crate::redirect::url::{match_hash, matched_url, REGEX_MATCH};

    /// Store backed by plain vectors, counting lookups
    #[derive(Default)]
    pub struct MemoryStore {
        pub rules: Mutex<Vec<RedirectRule>>,
        pub hits: Mutex<HashMap<i64, i64>>,
        pub logs: Mutex<Vec<NewLogEntry>>,
        pub lookups: AtomicUsize,
    }

    impl MemoryStore {
        pub fn with_rules(rules: Vec<RedirectRule>) -> Self {
            Self {
                rules: Mutex::new(rules),
                ..Default::default()
            }
        }

        pub fn hits(&self, id: i64) -> i64 {
            self.hits.lock().unwrap().get(&id).copied().unwrap_or(0)
        }

        pub fn logs(&self) -> Vec<NewLogEntry> {
            self.logs.lock().unwrap().clone()
        }

        pub fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RedirectStore for MemoryStore {
        async fn find_enabled_by_hash(&self, hash: &str) -> Result<Vec<RedirectRule>, AppError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let mut rules: Vec<RedirectRule> = self
                .rules
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.enabled && match_hash(&r.source_url_match) == hash)
                .cloned()
                .collect();
            rules.sort_by(|a, b| b.id.cmp(&a.id));
            Ok(rules)
        }

        async fn record_hit(&self, redirect_id: i64) -> Result<(), AppError> {
            *self.hits.lock().unwrap().entry(redirect_id).or_insert(0) += 1;
            Ok(())
        }

        async fn write_log(&self, entry: &NewLogEntry) -> Result<(), AppError> {
            self.logs.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    /// Literal 301 rule
    pub fn rule(id: i64, source: &str, target: &str) -> RedirectRule {
        RedirectRule {
            id,
            source_url: source.to_string(),
            source_url_match: matched_url(source),
            target_url: target.to_string(),
            redirect_type: 301,
            query_param: QueryParamPolicy::Ignore,
            custom_rules: Vec::new(),
            group: "manual".to_string(),
            regex: false,
            ignore_slash: true,
            ignore_case: true,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn regex_rule(id: i64, source: &str, target: &str) -> RedirectRule {
        RedirectRule {
            regex: true,
            source_url_match: REGEX_MATCH.to_string(),
            ..rule(id, source, target)
        }
    }
}
