//! Redirect rule CRUD operations

use sqlx::Row;

use crate::error::AppError;
use crate::models::{
    page_offset, ListRedirectsQuery, NewRedirect, RedirectFilter, RedirectRow, RedirectRule,
    RedirectSummary, RedirectSummaryRow, PAGE_SIZE,
};
use crate::redirect::url::match_hash;

use super::{placeholders, MySqlDb};

/// Bind values shared by the listing, count and id queries
struct ListFilter {
    enabled: Option<bool>,
    group: Option<String>,
    search: Option<String>,
}

impl From<&ListRedirectsQuery> for ListFilter {
    fn from(query: &ListRedirectsQuery) -> Self {
        let enabled = match query.filter {
            RedirectFilter::All => None,
            RedirectFilter::Enabled => Some(true),
            RedirectFilter::Disabled => Some(false),
        };
        let group = query
            .group
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty() && *g != "all")
            .map(str::to_string);
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s.replace('%', "\\%").replace('_', "\\_")));

        Self {
            enabled,
            group,
            search,
        }
    }
}

const LIST_WHERE: &str = r#"
    (? IS NULL OR r.enabled = ?)
    AND (? IS NULL OR r.`group` = ?)
    AND (? IS NULL OR r.source_url LIKE ? OR r.target_url LIKE ?)
"#;

impl MySqlDb {
    /// One page of redirects with hit counts, newest first
    pub async fn list_redirects(
        &self,
        query: &ListRedirectsQuery,
    ) -> Result<(Vec<RedirectSummary>, i64), AppError> {
        let filter = ListFilter::from(query);

        let sql = format!(
            r#"
            SELECT r.id, r.source_url, r.source_url_match, r.target_url, r.`type`, r.query_param,
                   r.custom_rules, r.`group`, r.regex, r.ignore_slash, r.ignore_case, r.enabled,
                   r.created_at, r.updated_at, COALESCE(h.count, 0) AS hits
            FROM redirects r
            LEFT JOIN redirect_hits h ON h.redirect_id = r.id
            WHERE {}
            ORDER BY r.id DESC
            LIMIT ? OFFSET ?
            "#,
            LIST_WHERE
        );

        let rows = sqlx::query_as::<_, RedirectSummaryRow>(&sql)
            .bind(filter.enabled)
            .bind(filter.enabled)
            .bind(&filter.group)
            .bind(&filter.group)
            .bind(&filter.search)
            .bind(&filter.search)
            .bind(&filter.search)
            .bind(PAGE_SIZE)
            .bind(page_offset(query.page))
            .fetch_all(&self.pool)
            .await?;

        let redirects: Result<Vec<RedirectSummary>, _> =
            rows.into_iter().map(RedirectSummary::try_from).collect();
        let redirects = redirects.map_err(AppError::InternalError)?;

        let total = self.count_redirects(&filter).await?;

        Ok((redirects, total))
    }

    async fn count_redirects(&self, filter: &ListFilter) -> Result<i64, AppError> {
        let sql = format!(
            "SELECT COUNT(*) as count FROM redirects r WHERE {}",
            LIST_WHERE
        );

        let row = sqlx::query(&sql)
            .bind(filter.enabled)
            .bind(filter.enabled)
            .bind(&filter.group)
            .bind(&filter.group)
            .bind(&filter.search)
            .bind(&filter.search)
            .bind(&filter.search)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get::<i64, _>("count"))
    }

    /// Ids of every redirect the listing filters select
    pub async fn list_redirect_ids(&self, query: &ListRedirectsQuery) -> Result<Vec<i64>, AppError> {
        let filter = ListFilter::from(query);
        let sql = format!("SELECT r.id FROM redirects r WHERE {}", LIST_WHERE);

        let rows = sqlx::query(&sql)
            .bind(filter.enabled)
            .bind(filter.enabled)
            .bind(&filter.group)
            .bind(&filter.group)
            .bind(&filter.search)
            .bind(&filter.search)
            .bind(&filter.search)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|r| r.get::<i64, _>("id")).collect())
    }

    /// Get a single redirect with its hit count
    pub async fn get_redirect(&self, id: i64) -> Result<Option<RedirectSummary>, AppError> {
        let row = sqlx::query_as::<_, RedirectSummaryRow>(
            r#"
            SELECT r.id, r.source_url, r.source_url_match, r.target_url, r.`type`, r.query_param,
                   r.custom_rules, r.`group`, r.regex, r.ignore_slash, r.ignore_case, r.enabled,
                   r.created_at, r.updated_at, COALESCE(h.count, 0) AS hits
            FROM redirects r
            LEFT JOIN redirect_hits h ON h.redirect_id = r.id
            WHERE r.id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(RedirectSummary::try_from(r).map_err(AppError::InternalError)?)),
            None => Ok(None),
        }
    }

    /// Enabled rules sharing a match hash, newest first
    pub async fn list_enabled_by_hash(&self, hash: &str) -> Result<Vec<RedirectRule>, AppError> {
        let rows = sqlx::query_as::<_, RedirectRow>(
            r#"
            SELECT id, source_url, source_url_match, target_url, `type`, query_param,
                   custom_rules, `group`, regex, ignore_slash, ignore_case, enabled,
                   created_at, updated_at
            FROM redirects
            WHERE source_url_match_hash = ? AND enabled = TRUE
            ORDER BY id DESC
            "#,
        )
        .bind(hash)
        .fetch_all(&self.pool)
        .await?;

        Ok(convert_rows(rows))
    }

    /// Enabled rules without custom rules, for the server rules export
    pub async fn list_exportable_redirects(&self) -> Result<Vec<RedirectRule>, AppError> {
        let rows = sqlx::query_as::<_, RedirectRow>(
            r#"
            SELECT id, source_url, source_url_match, target_url, `type`, query_param,
                   custom_rules, `group`, regex, ignore_slash, ignore_case, enabled,
                   created_at, updated_at
            FROM redirects
            WHERE enabled = TRUE
              AND (custom_rules IS NULL OR custom_rules = '' OR custom_rules = '[]')
            ORDER BY id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(convert_rows(rows))
    }

    /// Whether another redirect already uses this source
    pub async fn source_exists(
        &self,
        redirect: &NewRedirect,
        exclude_id: Option<i64>,
    ) -> Result<bool, AppError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM redirects
            WHERE source_url_match_hash = ? AND source_url = ?
              AND (? IS NULL OR id <> ?)
            "#,
        )
        .bind(match_hash(&redirect.source_url_match))
        .bind(&redirect.source_url)
        .bind(exclude_id)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("count") > 0)
    }

    /// Create a redirect, returning its id
    pub async fn create_redirect(&self, redirect: &NewRedirect) -> Result<i64, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO redirects (source_url, source_url_match, source_url_match_hash,
                                   target_url, target_url_hash, `type`, query_param,
                                   custom_rules, `group`, regex, ignore_slash, ignore_case, enabled)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&redirect.source_url)
        .bind(&redirect.source_url_match)
        .bind(match_hash(&redirect.source_url_match))
        .bind(&redirect.target_url)
        .bind(match_hash(&redirect.target_url))
        .bind(redirect.redirect_type)
        .bind(redirect.query_param.to_string())
        .bind(&redirect.custom_rules)
        .bind(&redirect.group)
        .bind(redirect.regex)
        .bind(redirect.ignore_slash)
        .bind(redirect.ignore_case)
        .bind(redirect.enabled)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_id() as i64)
    }

    /// Update an existing redirect
    pub async fn update_redirect(&self, id: i64, redirect: &NewRedirect) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE redirects
            SET source_url = ?, source_url_match = ?, source_url_match_hash = ?,
                target_url = ?, target_url_hash = ?, `type` = ?, query_param = ?,
                custom_rules = ?, `group` = ?, regex = ?, ignore_slash = ?, ignore_case = ?,
                enabled = ?
            WHERE id = ?
            "#,
        )
        .bind(&redirect.source_url)
        .bind(&redirect.source_url_match)
        .bind(match_hash(&redirect.source_url_match))
        .bind(&redirect.target_url)
        .bind(match_hash(&redirect.target_url))
        .bind(redirect.redirect_type)
        .bind(redirect.query_param.to_string())
        .bind(&redirect.custom_rules)
        .bind(&redirect.group)
        .bind(redirect.regex)
        .bind(redirect.ignore_slash)
        .bind(redirect.ignore_case)
        .bind(redirect.enabled)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a redirect and its hit counter
    pub async fn delete_redirect(&self, id: i64) -> Result<bool, AppError> {
        Ok(self.delete_redirects(&[id]).await? > 0)
    }

    /// Delete several redirects and their hit counters
    pub async fn delete_redirects(&self, ids: &[i64]) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let list = placeholders(ids.len());
        let mut tx = self.pool.begin().await?;

        let delete_hits = format!("DELETE FROM redirect_hits WHERE redirect_id IN ({})", list);
        let mut query = sqlx::query(&delete_hits);
        for id in ids {
            query = query.bind(id);
        }
        query.execute(&mut *tx).await?;

        let delete_redirects = format!("DELETE FROM redirects WHERE id IN ({})", list);
        let mut query = sqlx::query(&delete_redirects);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&mut *tx).await?;

        tx.commit().await?;

        Ok(result.rows_affected())
    }

    /// Enable or disable several redirects
    pub async fn set_redirects_enabled(&self, ids: &[i64], enabled: bool) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "UPDATE redirects SET enabled = ? WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql).bind(enabled);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await?;

        Ok(result.rows_affected())
    }
}

/// Rows that fail to convert are logged and skipped
fn convert_rows(rows: Vec<RedirectRow>) -> Vec<RedirectRule> {
    rows.into_iter()
        .filter_map(|row| match RedirectRule::try_from(row) {
            Ok(rule) => Some(rule),
            Err(e) => {
                tracing::warn!("Skipping redirect: {}", e);
                None
            }
        })
        .collect()
}
