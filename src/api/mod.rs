//! API module - HTTP handlers and routes

pub mod auth_middleware;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::proxy::ProxyState;

pub fn routes(state: ProxyState) -> Router<ProxyState> {
    let admin = Router::new()
        // Redirect management
        .route(
            "/api/redirects",
            get(handlers::list_redirects).post(handlers::create_redirects),
        )
        .route(
            "/api/redirects/:id",
            get(handlers::get_redirect)
                .put(handlers::update_redirect)
                .delete(handlers::delete_redirect),
        )
        .route("/api/redirects/:id/test", post(handlers::test_redirect))
        .route("/api/redirects/bulk/:action", post(handlers::bulk_action))
        .route("/api/redirects/bulk-delete", post(handlers::bulk_delete))
        .route("/api/redirects/cache/clear", post(handlers::clear_cache))
        // Logs
        .route("/api/logs/redirects", get(handlers::list_redirect_logs))
        .route(
            "/api/logs/404",
            get(handlers::list_404_logs).delete(handlers::delete_404_logs),
        )
        .route_layer(middleware::from_fn_with_state(
            state,
            auth_middleware::require_admin,
        ));

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::health_check))
        .merge(admin)
}
