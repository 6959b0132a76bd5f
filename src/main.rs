//! Redirect Gateway
//!
//! A gateway in front of a web origin that answers configured URL redirects,
//! full-site redirects and status rules, logs redirects and 404s, and forwards
//! everything else to the origin.

mod api;
mod cleanup;
mod config;
mod db;
mod error;
mod models;
mod proxy;
mod redirect;
mod rewrite;

use std::net::SocketAddr;
use std::sync::Arc;

use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cleanup::LogCleaner;
use crate::config::Config;
use crate::db::AppState;
use crate::proxy::ProxyState;
use crate::redirect::url::parse_site_url;
use crate::rewrite::{RewriteNotifier, ServerRulesWriter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "redirect_gateway=info,tower_http=debug".into()),
        )
        .init();

    tracing::info!("Starting redirect gateway...");

    // Load configuration
    let config = Config::load()?;
    tracing::info!("Configuration loaded (site {})", config.site.url);

    // Initialize database connection
    let app_state = AppState::new(&config).await?;
    tracing::info!("Database connection established");

    let rewrite = RewriteNotifier::new();
    let proxy_state = ProxyState::new(app_state.clone(), &config, rewrite.clone())?;

    start_background_tasks(&app_state, &config, &rewrite);

    // Build application router
    let cors = CorsLayer::permissive();

    let app = api::routes(proxy_state.clone())
        .fallback(proxy::gateway_handler)
        .with_state(proxy_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        );

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Start background tasks (log cleanup, server rule regeneration)
fn start_background_tasks(app_state: &AppState, config: &Config, rewrite: &RewriteNotifier) {
    let cleaner = Arc::new(LogCleaner::new(
        app_state.mysql.clone(),
        config.redirects.logs.clone(),
    ));
    cleaner.start();

    if let Some(path) = config.redirects.server_rules_path.clone() {
        let writer = ServerRulesWriter::new(
            app_state.mysql.clone(),
            path,
            config.redirects.agent.clone(),
            parse_site_url(&config.site.url),
        );
        let events = rewrite.subscribe();
        tokio::spawn(async move {
            writer.start(events).await;
        });
    }

    tracing::info!("Background tasks started");
}
