//! Data-plane HTTP handlers.
//!
//! `POST /api/v1/guard` runs the full pipeline (200 allowed, 403 blocked,
//! 400 malformed); `analyze`, `mask`, and `detect` expose the degenerate
//! pipelines; `/health` and `/ready` are unauthenticated probes.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use promptgate_core::{ErrorResponse, GuardRequest, HealthResponse};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::audit::AuditEngine;
use crate::config::Config;
use crate::factory::ClientFactory;
use crate::pipeline::{ClientMeta, GuardPipeline};
use crate::policy::PolicyEngine;
use crate::settings::SettingsService;
use crate::spending::SpendTracker;
use promptgate_core::Repository;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub pipeline: GuardPipeline,
    pub policy: Arc<PolicyEngine>,
    pub audit: Arc<AuditEngine>,
    pub spending: Arc<SpendTracker>,
    pub settings: Arc<SettingsService>,
    pub repo: Arc<dyn Repository>,
    pub factory: Arc<ClientFactory>,
    pub start_time: Instant,
    pub version: &'static str,
}

/// Build a JSON error response.
pub(crate) fn api_error(status: StatusCode, message: &str, code: &str) -> Response {
    let body = ErrorResponse {
        error: message.to_string(),
        code: code.to_string(),
        request_id: String::new(),
    };
    (status, Json(body)).into_response()
}

/// Extract transport attributes recorded in the audit trail.
fn client_meta(headers: &HeaderMap) -> ClientMeta {
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .unwrap_or_default()
        .trim()
        .to_string();
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    ClientMeta {
        ip_address,
        user_agent,
    }
}

/// Validate the request body shared by all data-plane endpoints.
fn validate_body(
    payload: Result<Json<GuardRequest>, JsonRejection>,
) -> Result<GuardRequest, Response> {
    let Json(req) = payload.map_err(|_| {
        api_error(
            StatusCode::BAD_REQUEST,
            "Invalid request body",
            "INVALID_REQUEST",
        )
    })?;
    if req.messages.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "messages must not be empty",
            "INVALID_REQUEST",
        ));
    }
    Ok(req)
}

/// `POST /api/v1/guard` — full pipeline.
pub async fn guard(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<GuardRequest>, JsonRejection>,
) -> Response {
    let req = match validate_body(payload) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let response = state.pipeline.guard(req, &client_meta(&headers)).await;
    let status = if response.allowed {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };
    (status, Json(response)).into_response()
}

/// `POST /api/v1/analyze` — classification + PII detection only.
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<GuardRequest>, JsonRejection>,
) -> Response {
    let req = match validate_body(payload) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    Json(state.pipeline.analyze(req, &client_meta(&headers))).into_response()
}

/// `POST /api/v1/mask` — PII masking only.
pub async fn mask(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<GuardRequest>, JsonRejection>,
) -> Response {
    let req = match validate_body(payload) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    Json(state.pipeline.mask(req, &client_meta(&headers))).into_response()
}

/// `POST /api/v1/detect` — injection detection only.
pub async fn detect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<GuardRequest>, JsonRejection>,
) -> Response {
    let req = match validate_body(payload) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    Json(state.pipeline.detect(req, &client_meta(&headers))).into_response()
}

/// `GET /health` — liveness probe with per-service status.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let mut services = HashMap::new();
    services.insert("injection_detector".to_string(), "healthy".to_string());
    services.insert("pii_masker".to_string(), "healthy".to_string());
    services.insert(
        "llm_client".to_string(),
        if state.factory.has_default_client() {
            "healthy".to_string()
        } else {
            "not_configured".to_string()
        },
    );

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.to_string(),
        uptime: format!("{:?}", state.start_time.elapsed()),
        services,
    })
    .into_response()
}

/// `GET /ready` — readiness probe.
pub async fn ready() -> Response {
    Json(serde_json::json!({"ready": true})).into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
