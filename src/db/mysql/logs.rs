//! Redirect and 404 log storage

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::error::AppError;
use crate::models::{page_offset, LogKind, LogRow, NewLogEntry, PAGE_SIZE};

use super::MySqlDb;

impl MySqlDb {
    /// Write an entry to the table matching its status code
    pub async fn insert_log(&self, entry: &NewLogEntry) -> Result<(), AppError> {
        let sql = format!(
            r#"
            INSERT INTO {} (url, domain, sent_to, agent, referrer, http_code, request_method,
                            ip, redirect_id, redirect_by, request_data)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            entry.kind().table()
        );

        sqlx::query(&sql)
            .bind(&entry.url)
            .bind(&entry.domain)
            .bind(&entry.sent_to)
            .bind(&entry.agent)
            .bind(&entry.referrer)
            .bind(entry.http_code)
            .bind(&entry.request_method)
            .bind(&entry.ip)
            .bind(entry.redirect_id)
            .bind(&entry.redirect_by)
            .bind(entry.request_data.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// One page of log entries, newest first, with the total row count
    pub async fn list_logs(&self, kind: LogKind, page: u32) -> Result<(Vec<LogRow>, i64), AppError> {
        let sql = format!(
            r#"
            SELECT id, url, domain, sent_to, agent, referrer, http_code, request_method,
                   ip, redirect_id, redirect_by, request_data, created_at
            FROM {}
            ORDER BY id DESC
            LIMIT ? OFFSET ?
            "#,
            kind.table()
        );

        let rows = sqlx::query_as::<_, LogRow>(&sql)
            .bind(PAGE_SIZE)
            .bind(page_offset(page))
            .fetch_all(&self.pool)
            .await?;

        let count_sql = format!("SELECT COUNT(*) as count FROM {}", kind.table());
        let total = sqlx::query(&count_sql)
            .fetch_one(&self.pool)
            .await?
            .get::<i64, _>("count");

        Ok((rows, total))
    }

    /// Delete entries older than the cutoff
    pub async fn prune_logs(&self, kind: LogKind, before: DateTime<Utc>) -> Result<u64, AppError> {
        let sql = format!("DELETE FROM {} WHERE created_at < ?", kind.table());
        let result = sqlx::query(&sql)
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete every 404 entry recorded for a URL
    pub async fn delete_404_logs(&self, url: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM redirect_404_logs WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
