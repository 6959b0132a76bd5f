//! Redirect management handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use crate::config::RedirectDefaults;
use crate::error::AppError;
use crate::models::{
    BulkRequest, CustomRule, ListRedirectsQuery, NewRedirect, Page, PageTotals,
    SaveRedirectRequest, TestRedirectRequest,
};
use crate::proxy::{apply_mutation, ProxyState};
use crate::redirect::pattern::compile_source;
use crate::redirect::store::RedirectWriter;
use crate::redirect::url::{format_target_url, matched_url, REGEX_MATCH};
use crate::redirect::{FilterRegistry, RedirectEngine};
use crate::rewrite::{RewriteEvent, RewriteNotifier};

use super::SuccessResponse;

/// Group whose redirects replace logged 404s
const NOT_FOUND_GROUP: &str = "404";
const DEFAULT_GROUP: &str = "manual";

#[derive(Serialize)]
pub struct CreatedResponse {
    pub success: bool,
    pub ids: Vec<i64>,
}

/// GET /api/redirects - List redirects
pub async fn list_redirects(
    State(state): State<ProxyState>,
    Query(query): Query<ListRedirectsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (rows, total) = state.app_state.mysql.list_redirects(&query).await?;

    Ok(Json(Page {
        success: true,
        rows,
        totals: PageTotals::new(total, query.page.max(1)),
    }))
}

/// GET /api/redirects/:id - Get a single redirect
pub async fn get_redirect(
    State(state): State<ProxyState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let redirect = state
        .app_state
        .mysql
        .get_redirect(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Redirect {} not found", id)))?;

    Ok(Json(redirect))
}

/// POST /api/redirects - Create one redirect per source URL
pub async fn create_redirects(
    State(state): State<ProxyState>,
    Json(payload): Json<SaveRedirectRequest>,
) -> Result<impl IntoResponse, AppError> {
    let redirects = build_redirects(payload, &state.options.defaults, state.engine.filters())?;
    let ids = create_batch(
        state.app_state.mysql.as_ref(),
        &state.engine,
        &state.rewrite,
        &redirects,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse { success: true, ids }),
    ))
}

/// PUT /api/redirects/:id - Update a redirect from the first source URL
pub async fn update_redirect(
    State(state): State<ProxyState>,
    Path(id): Path<i64>,
    Json(payload): Json<SaveRedirectRequest>,
) -> Result<impl IntoResponse, AppError> {
    let redirect = build_redirects(payload, &state.options.defaults, state.engine.filters())?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::BadRequest("At least one source URL is required".to_string()))?;
    let db = &state.app_state.mysql;

    if db.get_redirect(id).await?.is_none() {
        return Err(AppError::NotFound(format!("Redirect {} not found", id)));
    }

    if db.source_exists(&redirect, Some(id)).await? {
        return Err(AppError::Conflict(vec![redirect.source_url]));
    }

    db.update_redirect(id, &redirect).await?;
    tracing::info!("Updated redirect {}", id);

    state.after_mutation(RewriteEvent::Updated(id)).await;

    Ok(Json(SuccessResponse::with_id("Redirect updated", id)))
}

/// DELETE /api/redirects/:id - Delete a redirect and its hits
pub async fn delete_redirect(
    State(state): State<ProxyState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let deleted = state.app_state.mysql.delete_redirect(id).await?;

    if !deleted {
        return Err(AppError::NotFound(format!("Redirect {} not found", id)));
    }

    tracing::info!("Deleted redirect {}", id);
    state.after_mutation(RewriteEvent::Deleted(vec![id])).await;

    Ok(Json(SuccessResponse::new("Redirect deleted")))
}

/// POST /api/redirects/bulk/:action - enable, disable or reset-hits
pub async fn bulk_action(
    State(state): State<ProxyState>,
    Path(action): Path<String>,
    Json(payload): Json<BulkRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ids = resolve_bulk_ids(&state, &payload).await?;
    let db = &state.app_state.mysql;

    let affected = match action.as_str() {
        "enable" | "disable" => {
            let affected = db.set_redirects_enabled(&ids, action == "enable").await?;
            state.after_mutation(RewriteEvent::Toggled(ids)).await;
            affected
        }
        "reset-hits" => db.reset_hits(&ids).await?,
        other => {
            return Err(AppError::BadRequest(format!("Unknown bulk action: {}", other)));
        }
    };

    tracing::info!("Bulk {} applied to {} redirects", action, affected);

    Ok(Json(SuccessResponse::with_affected(
        format!("Bulk {} applied", action),
        affected,
    )))
}

/// POST /api/redirects/bulk-delete - Delete many redirects
pub async fn bulk_delete(
    State(state): State<ProxyState>,
    Json(payload): Json<BulkRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ids = resolve_bulk_ids(&state, &payload).await?;
    let affected = state.app_state.mysql.delete_redirects(&ids).await?;

    tracing::info!("Bulk deleted {} redirects", affected);
    state.after_mutation(RewriteEvent::Deleted(ids)).await;

    Ok(Json(SuccessResponse::with_affected("Redirects deleted", affected)))
}

/// POST /api/redirects/:id/test - Request the source and compare the answer
pub async fn test_redirect(
    State(state): State<ProxyState>,
    Path(id): Path<i64>,
    payload: Option<Json<TestRedirectRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let redirect = state
        .app_state
        .mysql
        .get_redirect(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Redirect {} not found", id)))?;

    let source = payload.and_then(|Json(p)| p.source_url);
    let report = state
        .self_tester
        .run(&redirect.redirect, source.as_deref())
        .await;

    if !report.success {
        tracing::info!("Self-test of redirect {} failed: {:?}", id, report.failures);
    }

    Ok(Json(report))
}

/// POST /api/redirects/cache/clear - Drop the lookup cache
pub async fn clear_cache(State(state): State<ProxyState>) -> Result<impl IntoResponse, AppError> {
    state.after_mutation(RewriteEvent::CacheCleared).await;
    Ok(Json(SuccessResponse::new("Redirect cache cleared")))
}

/// Explicit ids win; otherwise every redirect the listing filters select
async fn resolve_bulk_ids(state: &ProxyState, payload: &BulkRequest) -> Result<Vec<i64>, AppError> {
    if !payload.row_ids.is_empty() {
        return Ok(payload.row_ids.clone());
    }
    state.app_state.mysql.list_redirect_ids(&payload.list).await
}

/// Insert every redirect whose source is free. Rows written before a failure
/// stay written, so the cache is invalidated before any error is returned.
async fn create_batch(
    writer: &dyn RedirectWriter,
    engine: &RedirectEngine,
    rewrite: &RewriteNotifier,
    redirects: &[NewRedirect],
) -> Result<Vec<i64>, AppError> {
    let mut ids = Vec::new();
    let mut failed = Vec::new();

    let outcome = insert_each(writer, redirects, &mut ids, &mut failed).await;

    if !ids.is_empty() {
        apply_mutation(engine, rewrite, RewriteEvent::Created(ids.clone())).await;
    }

    outcome?;
    if !failed.is_empty() {
        return Err(AppError::Conflict(failed));
    }

    Ok(ids)
}

async fn insert_each(
    writer: &dyn RedirectWriter,
    redirects: &[NewRedirect],
    ids: &mut Vec<i64>,
    failed: &mut Vec<String>,
) -> Result<(), AppError> {
    for redirect in redirects {
        if writer.source_taken(redirect).await? {
            failed.push(redirect.source_url.clone());
            continue;
        }

        let id = writer.insert_redirect(redirect).await?;
        tracing::info!(
            "Created redirect {}: {} -> {} ({})",
            id,
            redirect.source_url,
            redirect.target_url,
            redirect.redirect_type
        );
        ids.push(id);

        if redirect.group == NOT_FOUND_GROUP {
            let removed = writer.forget_404s(&redirect.source_url).await?;
            tracing::debug!("Removed {} 404 log entries for {}", removed, redirect.source_url);
        }
    }

    Ok(())
}

/// Validate a save request into one row per source URL
fn build_redirects(
    payload: SaveRedirectRequest,
    defaults: &RedirectDefaults,
    filters: &FilterRegistry,
) -> Result<Vec<NewRedirect>, AppError> {
    let sources: Vec<_> = payload
        .source_urls
        .into_iter()
        .filter(|s| !s.url.trim().is_empty())
        .collect();
    if sources.is_empty() {
        return Err(AppError::BadRequest(
            "At least one source URL is required".to_string(),
        ));
    }

    let redirect_type = payload.redirect_type.unwrap_or(defaults.redirect_type);
    let target_url = payload.target_url.trim().to_string();
    if (300..=399).contains(&redirect_type) && target_url.is_empty() {
        return Err(AppError::BadRequest(format!(
            "A target URL is required for {} redirects",
            redirect_type
        )));
    }
    if redirect_type != 0 && !(100..=599).contains(&redirect_type) {
        return Err(AppError::BadRequest(format!(
            "Invalid redirect type: {}",
            redirect_type
        )));
    }

    let custom_rules: Vec<CustomRule> = payload
        .custom_rules
        .into_iter()
        .filter_map(CustomRule::from_raw)
        .collect();
    // Unregistered filters never pass
    for rule in &custom_rules {
        if let CustomRule::Filter(names) = rule {
            if let Some(name) = names.iter().find(|name| !filters.contains(name)) {
                return Err(AppError::BadRequest(format!("Unknown filter: {}", name)));
            }
        }
    }
    let custom_rules = if custom_rules.is_empty() {
        None
    } else {
        Some(
            serde_json::to_string(&custom_rules)
                .map_err(|e| AppError::InternalError(format!("Failed to encode custom rules: {}", e)))?,
        )
    };

    let group = payload
        .group
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| DEFAULT_GROUP.to_string());
    let query_param = payload.query_param.unwrap_or(defaults.query_param);

    sources
        .into_iter()
        .map(|source| {
            let (source_url, source_url_match) = if source.regex {
                let pattern = source.url.trim().to_string();
                compile_source(&pattern, source.ignore_case).map_err(|e| {
                    AppError::BadRequest(format!("Invalid regex source {}: {}", pattern, e))
                })?;
                (pattern, REGEX_MATCH.to_string())
            } else {
                let url = format_target_url(&source.url);
                let matched = matched_url(&url);
                (url, matched)
            };

            Ok(NewRedirect {
                source_url,
                source_url_match,
                target_url: target_url.clone(),
                redirect_type,
                query_param,
                custom_rules: custom_rules.clone(),
                group: group.clone(),
                regex: source.regex,
                ignore_slash: source.ignore_slash,
                ignore_case: source.ignore_case,
                enabled: payload.enabled,
            })
        })
        .collect()
}
