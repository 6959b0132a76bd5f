//! HTTP handlers module

mod logs;
mod redirects;

pub use self::logs::*;
pub use self::redirects::*;

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;

use crate::proxy::ProxyState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Health check handler
pub async fn health_check(State(state): State<ProxyState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.app_state.uptime_seconds(),
    })
}

/// Generic success response
#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected: Option<u64>,
}

impl SuccessResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            id: None,
            affected: None,
        }
    }

    pub fn with_id(message: impl Into<String>, id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::new(message)
        }
    }

    pub fn with_affected(message: impl Into<String>, affected: u64) -> Self {
        Self {
            affected: Some(affected),
            ..Self::new(message)
        }
    }
}
