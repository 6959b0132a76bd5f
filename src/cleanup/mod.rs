//! Log retention - periodic deletion of old log entries

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval_at, Instant};

use crate::config::{LogKindOptions, LogOptions};
use crate::db::MySqlDb;
use crate::models::LogKind;

/// Delay before the first sweep after startup
const FIRST_SWEEP_DELAY: Duration = Duration::from_secs(60);

/// Runs one pruning loop per log kind
pub struct LogCleaner {
    db: Arc<MySqlDb>,
    options: LogOptions,
}

impl LogCleaner {
    pub fn new(db: Arc<MySqlDb>, options: LogOptions) -> Self {
        Self { db, options }
    }

    /// Spawn the pruning loops; kinds kept forever or not logged get none
    pub fn start(self: Arc<Self>) {
        for (kind, options) in [
            (LogKind::Redirect, &self.options.redirects),
            (LogKind::NotFound, &self.options.log_404),
        ] {
            let Some(retention) = schedule_for(options) else {
                tracing::debug!("No retention sweep for {}", kind.table());
                continue;
            };

            let cleaner = self.clone();
            tokio::spawn(async move {
                cleaner.run(kind, retention).await;
            });
        }
    }

    async fn run(&self, kind: LogKind, retention: chrono::Duration) {
        let period = match retention.to_std() {
            Ok(period) => period,
            Err(e) => {
                tracing::error!("Invalid retention for {}: {}", kind.table(), e);
                return;
            }
        };

        tracing::info!(
            "Starting log cleaner for {} (retention {}h)",
            kind.table(),
            retention.num_hours()
        );

        let mut timer = interval_at(Instant::now() + FIRST_SWEEP_DELAY, period);
        loop {
            timer.tick().await;

            let cutoff = Utc::now() - retention;
            match self.db.prune_logs(kind, cutoff).await {
                Ok(0) => {}
                Ok(deleted) => {
                    tracing::info!("Pruned {} entries from {}", deleted, kind.table())
                }
                Err(e) => tracing::warn!("Failed to prune {}: {}", kind.table(), e),
            }
        }
    }
}

/// Retention window for a log kind, `None` when nothing should be swept
fn schedule_for(options: &LogKindOptions) -> Option<chrono::Duration> {
    if !options.enabled {
        return None;
    }
    options.length.duration()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Retention;

    #[test]
    fn test_schedule_for() {
        let options = |enabled, length| LogKindOptions { enabled, length };

        assert_eq!(
            schedule_for(&options(true, Retention::Day)),
            Some(chrono::Duration::hours(24))
        );
        assert_eq!(schedule_for(&options(true, Retention::Forever)), None);
        assert_eq!(schedule_for(&options(false, Retention::Hour)), None);
    }
}
