//! Redirect hit counters

use crate::error::AppError;

use super::{placeholders, MySqlDb};

impl MySqlDb {
    /// Add one hit; the row is created on first use
    pub async fn increment_hits(&self, redirect_id: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO redirect_hits (redirect_id, count)
            VALUES (?, 1)
            ON DUPLICATE KEY UPDATE count = count + 1
            "#,
        )
        .bind(redirect_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn reset_hits(&self, ids: &[i64]) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "UPDATE redirect_hits SET count = 0 WHERE redirect_id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await?;

        Ok(result.rows_affected())
    }
}
