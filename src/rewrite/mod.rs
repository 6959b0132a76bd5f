//! Rewrite hook - rule change notifications and the server rules export

mod nginx;

pub use self::nginx::render_server_rules;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use url::Url;

use crate::db::MySqlDb;

/// Why the rule set changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteEvent {
    Created(Vec<i64>),
    Updated(i64),
    Deleted(Vec<i64>),
    Toggled(Vec<i64>),
    CacheCleared,
}

/// Fans rule changes out to whoever regenerates derived configuration
#[derive(Clone)]
pub struct RewriteNotifier {
    sender: broadcast::Sender<RewriteEvent>,
}

impl RewriteNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    pub fn notify(&self, event: RewriteEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RewriteEvent> {
        self.sender.subscribe()
    }
}

impl Default for RewriteNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Regenerates the nginx snippet whenever the rules change
pub struct ServerRulesWriter {
    db: Arc<MySqlDb>,
    path: PathBuf,
    agent: String,
    site: Url,
}

impl ServerRulesWriter {
    pub fn new(db: Arc<MySqlDb>, path: impl Into<PathBuf>, agent: String, site: Url) -> Self {
        Self {
            db,
            path: path.into(),
            agent,
            site,
        }
    }

    /// Write once at startup, then after every change
    pub async fn start(self, mut events: broadcast::Receiver<RewriteEvent>) {
        tracing::info!("Starting server rules writer ({})", self.path.display());

        if let Err(e) = self.write().await {
            tracing::error!("Failed to write server rules: {}", e);
        }

        loop {
            match events.recv().await {
                Ok(RewriteEvent::CacheCleared) => continue,
                Ok(event) => tracing::debug!("Regenerating server rules after {:?}", event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Server rules writer lagged by {} events", skipped)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }

            if let Err(e) = self.write().await {
                tracing::error!("Failed to write server rules: {}", e);
            }
        }
    }

    async fn write(&self) -> anyhow::Result<()> {
        let rules = self.db.list_exportable_redirects().await?;
        let content = render_server_rules(&rules, &self.agent, &self.site);
        tokio::fs::write(&self.path, content).await?;
        tracing::info!(
            "Server rules written: {} redirects -> {}",
            rules.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notifier_broadcasts() {
        let notifier = RewriteNotifier::new();
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        notifier.notify(RewriteEvent::Deleted(vec![1, 2]));

        assert_eq!(first.recv().await.unwrap(), RewriteEvent::Deleted(vec![1, 2]));
        assert_eq!(second.recv().await.unwrap(), RewriteEvent::Deleted(vec![1, 2]));
    }

    #[test]
    fn test_notify_without_receivers() {
        RewriteNotifier::new().notify(RewriteEvent::CacheCleared);
    }
}
