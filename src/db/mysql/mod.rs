//! MySQL database module

mod hits;
mod logs;
mod redirects;

use async_trait::async_trait;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{NewLogEntry, NewRedirect, RedirectRule};
use crate::redirect::store::RedirectWriter;
use crate::redirect::RedirectStore;

/// MySQL database wrapper
#[derive(Clone)]
pub struct MySqlDb {
    pool: MySqlPool,
}

impl MySqlDb {
    /// Connect to MySQL database
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let url = config
            .database
            .mysql_url
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("MySQL URL not configured"))?;

        tracing::info!("Connecting to MySQL...");

        let pool = MySqlPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .connect(url)
            .await?;

        tracing::info!("MySQL connected successfully");

        Ok(Self { pool })
    }
}

#[async_trait]
impl RedirectStore for MySqlDb {
    async fn find_enabled_by_hash(&self, hash: &str) -> Result<Vec<RedirectRule>, AppError> {
        self.list_enabled_by_hash(hash).await
    }

    async fn record_hit(&self, redirect_id: i64) -> Result<(), AppError> {
        self.increment_hits(redirect_id).await
    }

    async fn write_log(&self, entry: &NewLogEntry) -> Result<(), AppError> {
        self.insert_log(entry).await
    }
}

#[async_trait]
impl RedirectWriter for MySqlDb {
    async fn source_taken(&self, redirect: &NewRedirect) -> Result<bool, AppError> {
        self.source_exists(redirect, None).await
    }

    async fn insert_redirect(&self, redirect: &NewRedirect) -> Result<i64, AppError> {
        self.create_redirect(redirect).await
    }

    async fn forget_404s(&self, url: &str) -> Result<u64, AppError> {
        self.delete_404_logs(url).await
    }
}

/// `?, ?, ?` for an IN list
fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
