//! Redirect and 404 log handlers

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};

use crate::error::AppError;
use crate::models::{Delete404Request, LogKind, LogListQuery, Page, PageTotals};
use crate::proxy::ProxyState;

use super::SuccessResponse;

/// GET /api/logs/redirects - Get redirect logs
pub async fn list_redirect_logs(
    State(state): State<ProxyState>,
    Query(query): Query<LogListQuery>,
) -> Result<impl IntoResponse, AppError> {
    list_logs(&state, LogKind::Redirect, query.page).await
}

/// GET /api/logs/404 - Get 404 logs
pub async fn list_404_logs(
    State(state): State<ProxyState>,
    Query(query): Query<LogListQuery>,
) -> Result<impl IntoResponse, AppError> {
    list_logs(&state, LogKind::NotFound, query.page).await
}

/// DELETE /api/logs/404 - Forget every 404 recorded for a URL
pub async fn delete_404_logs(
    State(state): State<ProxyState>,
    Json(payload): Json<Delete404Request>,
) -> Result<impl IntoResponse, AppError> {
    let url = payload.url.trim();
    if url.is_empty() {
        return Err(AppError::BadRequest("url is required".to_string()));
    }

    let affected = state.app_state.mysql.delete_404_logs(url).await?;
    tracing::info!("Deleted {} 404 log entries for {}", affected, url);

    Ok(Json(SuccessResponse::with_affected("404 logs deleted", affected)))
}

async fn list_logs(
    state: &ProxyState,
    kind: LogKind,
    page: u32,
) -> Result<impl IntoResponse, AppError> {
    let (rows, total) = state.app_state.mysql.list_logs(kind, page).await?;

    Ok(Json(Page {
        success: true,
        rows,
        totals: PageTotals::new(total, page.max(1)),
    }))
}
