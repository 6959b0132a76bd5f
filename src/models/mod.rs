//! Data models for the redirect gateway

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Redirect Models
// ============================================================================

/// What happens with the inbound query string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryParamPolicy {
    #[default]
    Ignore,
    Pass,
    Utm,
    Exact,
}

impl std::fmt::Display for QueryParamPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryParamPolicy::Ignore => write!(f, "ignore"),
            QueryParamPolicy::Pass => write!(f, "pass"),
            QueryParamPolicy::Utm => write!(f, "utm"),
            QueryParamPolicy::Exact => write!(f, "exact"),
        }
    }
}

impl std::str::FromStr for QueryParamPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ignore" => Ok(QueryParamPolicy::Ignore),
            "pass" => Ok(QueryParamPolicy::Pass),
            "utm" => Ok(QueryParamPolicy::Utm),
            "exact" => Ok(QueryParamPolicy::Exact),
            _ => Err(format!("Unknown query param policy: {}", s)),
        }
    }
}

/// Raw redirect row from database (uses String for enum and JSON fields)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RedirectRow {
    pub id: i64,
    pub source_url: String,
    pub source_url_match: String,
    pub target_url: String,
    #[sqlx(rename = "type")]
    pub redirect_type: i32,
    pub query_param: String,
    pub custom_rules: Option<String>,
    pub group: String,
    pub regex: bool,
    pub ignore_slash: bool,
    pub ignore_case: bool,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedirectRule {
    pub id: i64,
    pub source_url: String,
    pub source_url_match: String,
    pub target_url: String,
    pub redirect_type: i32,
    pub query_param: QueryParamPolicy,
    pub custom_rules: Vec<CustomRule>,
    pub group: String,
    pub regex: bool,
    pub ignore_slash: bool,
    pub ignore_case: bool,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RedirectRule {
    /// 3xx types answer with a Location header
    pub fn is_redirect_type(&self) -> bool {
        (300..=399).contains(&self.redirect_type)
    }

    pub fn is_pass_through(&self) -> bool {
        self.redirect_type == 0
    }
}

impl TryFrom<RedirectRow> for RedirectRule {
    type Error = String;

    fn try_from(row: RedirectRow) -> Result<Self, Self::Error> {
        let custom_rules = match row.custom_rules.as_deref().map(str::trim) {
            None | Some("") | Some("null") => Vec::new(),
            Some(json) => serde_json::from_str::<Vec<RawCustomRule>>(json)
                .map_err(|e| format!("Invalid custom rules on redirect {}: {}", row.id, e))?
                .into_iter()
                .filter_map(CustomRule::from_raw)
                .collect(),
        };

        Ok(RedirectRule {
            id: row.id,
            source_url: row.source_url,
            source_url_match: row.source_url_match,
            target_url: row.target_url,
            redirect_type: row.redirect_type,
            query_param: row.query_param.parse()?,
            custom_rules,
            group: row.group,
            regex: row.regex,
            ignore_slash: row.ignore_slash,
            ignore_case: row.ignore_case,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Redirect plus its hit count, for listings
#[derive(Debug, Clone, Serialize)]
pub struct RedirectSummary {
    #[serde(flatten)]
    pub redirect: RedirectRule,
    pub hits: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RedirectSummaryRow {
    #[sqlx(flatten)]
    pub redirect: RedirectRow,
    pub hits: i64,
}

impl TryFrom<RedirectSummaryRow> for RedirectSummary {
    type Error = String;

    fn try_from(row: RedirectSummaryRow) -> Result<Self, Self::Error> {
        Ok(RedirectSummary {
            redirect: RedirectRule::try_from(row.redirect)?,
            hits: row.hits,
        })
    }
}

// ============================================================================
// Custom Rule Models
// ============================================================================

/// A custom rule value, either a single string or a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    One(String),
    Many(Vec<String>),
}

impl Default for RuleValue {
    fn default() -> Self {
        RuleValue::One(String::new())
    }
}

impl RuleValue {
    /// Trimmed, non-empty values
    pub fn into_values(self) -> Vec<String> {
        let values = match self {
            RuleValue::One(v) => vec![v],
            RuleValue::Many(vs) => vs,
        };
        values
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    }
}

/// Custom rule as stored in the `custom_rules` JSON column and sent by the admin API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCustomRule {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub value: RuleValue,
    #[serde(default)]
    pub regex: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    LoggedIn,
    LoggedOut,
    /// Any other value places no restriction
    Unrestricted(String),
}

/// Values a request attribute is compared against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueMatch {
    pub values: Vec<String>,
    pub regex: bool,
}

/// Predicate gating whether a matched redirect fires
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "RawCustomRule")]
pub enum CustomRule {
    Login(LoginState),
    Role(Vec<String>),
    /// Named callbacks in the filter registry (stored type `wp_filter`)
    Filter(Vec<String>),
    Agent(ValueMatch),
    Referrer(ValueMatch),
    Cookie { key: String, matcher: ValueMatch },
    Header { key: String, matcher: ValueMatch },
    Ip(ValueMatch),
    Server(ValueMatch),
    Locale(ValueMatch),
    Other { kind: String, matcher: ValueMatch },
}

impl CustomRule {
    /// Convert a stored rule; rules without a value are dropped
    pub fn from_raw(raw: RawCustomRule) -> Option<Self> {
        let values = raw.value.into_values();
        if values.is_empty() {
            return None;
        }

        let matcher = ValueMatch {
            values: values.clone(),
            regex: raw.regex,
        };
        let key = raw.key.map(|k| k.trim().to_string()).unwrap_or_default();

        let rule = match raw.kind.as_str() {
            "login" => CustomRule::Login(match values[0].as_str() {
                "loggedin" => LoginState::LoggedIn,
                "loggedout" => LoginState::LoggedOut,
                other => LoginState::Unrestricted(other.to_string()),
            }),
            "role" => CustomRule::Role(values),
            "wp_filter" => CustomRule::Filter(values),
            "agent" => CustomRule::Agent(matcher),
            "referrer" => CustomRule::Referrer(matcher),
            "cookie" => CustomRule::Cookie { key, matcher },
            "header" => CustomRule::Header { key, matcher },
            "ip" => CustomRule::Ip(matcher),
            "server" => CustomRule::Server(matcher),
            "locale" => CustomRule::Locale(matcher),
            other => CustomRule::Other {
                kind: other.to_string(),
                matcher,
            },
        };

        Some(rule)
    }
}

impl From<CustomRule> for RawCustomRule {
    fn from(rule: CustomRule) -> Self {
        let raw = |kind: &str, key: Option<String>, m: ValueMatch| RawCustomRule {
            kind: kind.to_string(),
            key,
            value: RuleValue::Many(m.values),
            regex: m.regex,
        };

        match rule {
            CustomRule::Login(state) => RawCustomRule {
                kind: "login".to_string(),
                key: None,
                value: RuleValue::One(match state {
                    LoginState::LoggedIn => "loggedin".to_string(),
                    LoginState::LoggedOut => "loggedout".to_string(),
                    LoginState::Unrestricted(v) => v,
                }),
                regex: false,
            },
            CustomRule::Role(values) => RawCustomRule {
                kind: "role".to_string(),
                key: None,
                value: RuleValue::Many(values),
                regex: false,
            },
            CustomRule::Filter(values) => RawCustomRule {
                kind: "wp_filter".to_string(),
                key: None,
                value: RuleValue::Many(values),
                regex: false,
            },
            CustomRule::Agent(m) => raw("agent", None, m),
            CustomRule::Referrer(m) => raw("referrer", None, m),
            CustomRule::Cookie { key, matcher } => raw("cookie", Some(key), matcher),
            CustomRule::Header { key, matcher } => raw("header", Some(key), matcher),
            CustomRule::Ip(m) => raw("ip", None, m),
            CustomRule::Server(m) => raw("server", None, m),
            CustomRule::Locale(m) => raw("locale", None, m),
            CustomRule::Other { kind, matcher } => raw(&kind, None, matcher),
        }
    }
}

// ============================================================================
// Admin API Models
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SourceUrlInput {
    pub url: String,
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub ignore_slash: bool,
    #[serde(default)]
    pub ignore_case: bool,
}

/// Body for both create and update; several sources may share one target
#[derive(Debug, Clone, Deserialize)]
pub struct SaveRedirectRequest {
    #[serde(default)]
    pub source_urls: Vec<SourceUrlInput>,
    #[serde(default)]
    pub target_url: String,
    pub redirect_type: Option<i32>,
    pub query_param: Option<QueryParamPolicy>,
    #[serde(default)]
    pub custom_rules: Vec<RawCustomRule>,
    pub group: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Validated rule ready to be written
#[derive(Debug, Clone)]
pub struct NewRedirect {
    pub source_url: String,
    pub source_url_match: String,
    pub target_url: String,
    pub redirect_type: i32,
    pub query_param: QueryParamPolicy,
    pub custom_rules: Option<String>,
    pub group: String,
    pub regex: bool,
    pub ignore_slash: bool,
    pub ignore_case: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectFilter {
    #[default]
    All,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListRedirectsQuery {
    #[serde(default)]
    pub filter: RedirectFilter,
    pub group: Option<String>,
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkRequest {
    #[serde(default)]
    pub row_ids: Vec<i64>,
    #[serde(flatten)]
    pub list: ListRedirectsQuery,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PageTotals {
    pub total: i64,
    pub pages: i64,
    pub page: u32,
}

impl PageTotals {
    pub fn new(total: i64, page: u32) -> Self {
        let pages = if total == 0 {
            1
        } else {
            (total + PAGE_SIZE - 1) / PAGE_SIZE
        };
        Self { total, pages, page }
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T: Serialize> {
    pub success: bool,
    pub rows: Vec<T>,
    pub totals: PageTotals,
}

/// Rows per admin listing page
pub const PAGE_SIZE: i64 = 20;

pub fn page_offset(page: u32) -> i64 {
    (page.max(1) as i64 - 1) * PAGE_SIZE
}

fn default_page() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct TestRedirectRequest {
    pub source_url: Option<String>,
}

// ============================================================================
// Log Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Redirect,
    NotFound,
}

impl LogKind {
    pub fn table(&self) -> &'static str {
        match self {
            LogKind::Redirect => "redirect_logs",
            LogKind::NotFound => "redirect_404_logs",
        }
    }
}

/// Log entry to be written
#[derive(Debug, Clone, Serialize)]
pub struct NewLogEntry {
    pub url: String,
    pub domain: String,
    pub sent_to: Option<String>,
    pub agent: Option<String>,
    pub referrer: Option<String>,
    pub http_code: i32,
    pub request_method: String,
    pub ip: Option<String>,
    pub redirect_id: Option<i64>,
    pub redirect_by: Option<String>,
    pub request_data: serde_json::Value,
}

impl NewLogEntry {
    pub fn kind(&self) -> LogKind {
        if self.http_code == 404 {
            LogKind::NotFound
        } else {
            LogKind::Redirect
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LogRow {
    pub id: i64,
    pub url: String,
    pub domain: Option<String>,
    pub sent_to: Option<String>,
    pub agent: Option<String>,
    pub referrer: Option<String>,
    pub http_code: i32,
    pub request_method: Option<String>,
    pub ip: Option<String>,
    pub redirect_id: Option<i64>,
    pub redirect_by: Option<String>,
    pub request_data: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
}

#[derive(Debug, Deserialize)]
pub struct Delete404Request {
    pub url: String,
}

// ============================================================================
// Auth Models
// ============================================================================

/// Session JWT payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: usize,
}

impl SessionClaims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}
