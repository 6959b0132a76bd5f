//! Authentication middleware - validates the session JWT from its cookie
//!
//! The session cookie carries an HS256 JWT. The admin API requires one whose
//! roles include the configured admin role; the front handler decodes the
//! same cookie to know who the visitor is.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::config::AuthConfig;
use crate::models::SessionClaims;
use crate::proxy::ProxyState;

/// Middleware that requires an administrator session.
/// On success, injects the SessionClaims into request extensions.
pub async fn require_admin(
    State(state): State<ProxyState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_session_cookie(req.headers(), &state.auth_config.session_cookie)
    else {
        return error_response(StatusCode::UNAUTHORIZED, "Authentication required");
    };

    let claims = match decode_session(&token, &state.auth_config.jwt_secret) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!("Invalid session token: {}", e);
            return error_response(StatusCode::UNAUTHORIZED, "Authentication required");
        }
    };

    if !claims.has_role(&state.auth_config.admin_role) {
        tracing::warn!(
            "Admin API access denied for {} (path: {})",
            claims.sub,
            req.uri().path()
        );
        return error_response(StatusCode::FORBIDDEN, "Administrator role required");
    }

    req.extensions_mut().insert(claims);
    next.run(req).await
}

/// Visitor behind a request, `None` when anonymous or the session is invalid
pub fn visitor_from_headers(headers: &HeaderMap, auth: &AuthConfig) -> Option<SessionClaims> {
    let token = extract_session_cookie(headers, &auth.session_cookie)?;
    match decode_session(&token, &auth.jwt_secret) {
        Ok(claims) => Some(claims),
        Err(e) => {
            tracing::debug!("Ignoring invalid visitor session: {}", e);
            None
        }
    }
}

fn extract_session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Decode and validate a session JWT (HS256)
fn decode_session(token: &str, secret: &str) -> Result<SessionClaims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let token_data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;

    Ok(token_data.claims)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": message,
            "status": status.as_u16()
        })),
    )
        .into_response()
}
