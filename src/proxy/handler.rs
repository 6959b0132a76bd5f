//! Front handler - full-site redirects, rule dispatch and origin forwarding

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::net::SocketAddr;

use super::headers::{is_hop_by_hop_header, redirect_headers};
use super::ProxyState;
use crate::api::auth_middleware::visitor_from_headers;
use crate::config::HeaderLocation;
use crate::redirect::full_site::FULL_SITE_STATUS;
use crate::redirect::url::{is_external, untrailingslash};
use crate::redirect::{extract_client_ip, Dispatch, MatchState, RequestContext};

/// Largest request body forwarded to the origin
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Fallback handler for every non-API request
pub async fn gateway_handler(
    State(state): State<ProxyState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let client_ip = extract_client_ip(&parts.headers, addr, &state.trusted_proxies);

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Failed to read request body: {}", e);
            return (StatusCode::BAD_REQUEST, "Failed to read request body").into_response();
        }
    };

    if state.site.is_protected_path(parts.uri.path()) {
        return match forward(&state, &parts.method, &parts.headers, body, &path_and_query, &client_ip)
            .await
        {
            Ok(upstream) => into_response(upstream, &[]).await,
            Err(response) => response,
        };
    }

    let visitor = visitor_from_headers(&parts.headers, &state.auth_config);
    let ctx = RequestContext::from_request(
        parts.method.as_str(),
        &path_and_query,
        &parts.headers,
        client_ip.clone(),
        &state.site,
        visitor,
    );

    if let Some(location) = state.full_site.redirect_for(&ctx) {
        tracing::debug!("Full-site redirect {} -> {}", ctx.url.full, location);
        return redirect_response(&state, FULL_SITE_STATUS, &location);
    }

    let mut match_state = MatchState::new();
    let dispatch = match state.engine.resolve(&ctx, &mut match_state).await {
        Ok(dispatch) => dispatch,
        Err(e) => {
            tracing::warn!("Redirect lookup failed for {}: {}", ctx.url.full, e);
            None
        }
    };

    let site_headers = state.full_site.headers_for(HeaderLocation::Site);

    match dispatch {
        Some(Dispatch::Redirect { status, location }) => {
            return redirect_response(&state, status, &location);
        }
        Some(Dispatch::Status { status }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::NOT_FOUND);
            let mut response = status.into_response();
            append_headers(response.headers_mut(), &site_headers);
            return response;
        }
        Some(Dispatch::PassThrough { url }) => {
            let upstream = if is_external(&url, state.engine.site()) {
                fetch_external(&state, &url).await
            } else {
                let path = origin_path(&url);
                forward(&state, &parts.method, &parts.headers, body, &path, &client_ip).await
            };
            return match upstream {
                Ok(upstream) => into_response(upstream, &site_headers).await,
                Err(response) => response,
            };
        }
        None => {}
    }

    let upstream =
        match forward(&state, &parts.method, &parts.headers, body, &path_and_query, &client_ip).await
        {
            Ok(upstream) => upstream,
            Err(response) => return response,
        };

    let status = upstream.status().as_u16();
    if status == 404 {
        state.engine.logger().log_404(&ctx, &match_state).await;
    } else if (300..400).contains(&status) {
        let header = |name: &str| {
            upstream
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        if let Some(location) = header("location") {
            let redirect_by = header("x-redirect-by");
            state
                .engine
                .logger()
                .log_external_redirect(&ctx, &match_state, status, &location, redirect_by.as_deref())
                .await;
        }
    }

    into_response(upstream, &site_headers).await
}

/// Redirect with Location, X-Redirect-By, cache and configured headers
fn redirect_response(state: &ProxyState, status: u16, location: &str) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::MOVED_PERMANENTLY);
    let mut headers = redirect_headers(
        status.as_u16(),
        location,
        &state.options.agent,
        &state.options.cache.http_header,
        Utc::now(),
    );
    append_headers(
        &mut headers,
        &state.full_site.headers_for(HeaderLocation::Redirect),
    );

    (status, headers).into_response()
}

fn append_headers(target: &mut HeaderMap, extra: &[(header::HeaderName, HeaderValue)]) {
    for (name, value) in extra {
        target.insert(name.clone(), value.clone());
    }
}

/// Send the request to the origin with `path_and_query` as its path
async fn forward(
    state: &ProxyState,
    method: &Method,
    headers: &HeaderMap,
    body: Bytes,
    path_and_query: &str,
    client_ip: &str,
) -> Result<reqwest::Response, Response> {
    let full_url = format!(
        "{}{}",
        untrailingslash(&state.site.origin_url),
        path_and_query
    );

    tracing::debug!("Forwarding {} {} -> {}", method, path_and_query, full_url);

    let mut request_builder = state
        .http_client
        .request(convert_method(method), &full_url);

    for (key, value) in headers.iter() {
        if is_hop_by_hop_header(key.as_str()) || key == header::CONTENT_LENGTH {
            continue;
        }
        if let Ok(s) = value.to_str() {
            request_builder = request_builder.header(key.as_str(), s);
        }
    }

    let xff = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{}, {}", existing, client_ip),
        None => client_ip.to_string(),
    };
    request_builder = request_builder.header("X-Forwarded-For", &xff);
    request_builder = request_builder.header("X-Real-IP", client_ip);

    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    request_builder = request_builder.header("X-Forwarded-Proto", proto);

    if !body.is_empty() {
        request_builder = request_builder.body(body);
    }

    request_builder.send().await.map_err(|e| {
        tracing::error!("Origin request failed: {} -> {}: {}", path_and_query, full_url, e);
        let status = if e.is_timeout() {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::BAD_GATEWAY
        };
        (status, "Origin unavailable").into_response()
    })
}

/// GET an external pass-through target
async fn fetch_external(state: &ProxyState, url: &str) -> Result<reqwest::Response, Response> {
    state.http_client.get(url).send().await.map_err(|e| {
        tracing::warn!("Pass-through fetch of {} failed: {}", url, e);
        (StatusCode::BAD_GATEWAY, "Pass-through target unavailable").into_response()
    })
}

/// Convert an upstream response, dropping hop-by-hop headers
async fn into_response(
    upstream: reqwest::Response,
    extra_headers: &[(header::HeaderName, HeaderValue)],
) -> Response {
    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let upstream_headers = upstream.headers().clone();

    let body = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Failed to read upstream response: {}", e);
            return (StatusCode::BAD_GATEWAY, "Failed to read upstream response").into_response();
        }
    };

    let mut builder = Response::builder().status(status);
    for (key, value) in upstream_headers.iter() {
        if is_hop_by_hop_header(key.as_str()) {
            continue;
        }
        if let Ok(v) = HeaderValue::from_bytes(value.as_bytes()) {
            builder = builder.header(key.as_str(), v);
        }
    }

    let mut response = builder.body(Body::from(body)).unwrap_or_else(|_| {
        (StatusCode::INTERNAL_SERVER_ERROR, "Response build failed").into_response()
    });
    append_headers(response.headers_mut(), extra_headers);
    response
}

/// Path and query of a same-site pass-through target
fn origin_path(target: &str) -> String {
    match url::Url::parse(target) {
        Ok(parsed) if parsed.has_host() => match parsed.query() {
            Some(q) => format!("{}?{}", parsed.path(), q),
            None => parsed.path().to_string(),
        },
        _ => target.to_string(),
    }
}

/// Convert axum Method to reqwest Method
fn convert_method(method: &Method) -> reqwest::Method {
    reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET)
}
