//! Control-plane HTTP handlers.
//!
//! Management surface under `/api/v1/control`: policy CRUD, spending limits
//! (create/read/update only — limits are reset, never deleted), user CRUD,
//! audit queries and stats, the dashboard, alerts with acknowledgement, and
//! the settings surface.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use promptgate_core::{
    AuditEventType, AuditLog, AuditQuery, AuditStatus, GatewayError, Policy, SpendingLimit, User,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::{api_error, AppState};
use crate::settings::{LlmSettings, SecuritySettings};

fn error_response(err: &GatewayError) -> Response {
    match err {
        GatewayError::NotFound(msg) => api_error(StatusCode::NOT_FOUND, msg, "NOT_FOUND"),
        other => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &other.to_string(),
            "INTERNAL_ERROR",
        ),
    }
}

/// Record a control-plane mutation in the audit trail.
fn log_control_event(
    state: &AppState,
    event_type: AuditEventType,
    action: &str,
    resource_type: &str,
    resource_id: &str,
) {
    state.audit.log(AuditLog {
        event_type,
        action: action.to_string(),
        resource_type: resource_type.to_string(),
        resource_id: resource_id.to_string(),
        status: AuditStatus::Success,
        ..AuditLog::default()
    });
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// `POST /api/v1/control/policies`
pub async fn create_policy(
    State(state): State<Arc<AppState>>,
    Json(policy): Json<Policy>,
) -> Response {
    let created = state.policy.create_policy(&policy);
    log_control_event(
        &state,
        AuditEventType::PolicyChange,
        "policy_created",
        "policy",
        &created.id,
    );
    (StatusCode::CREATED, Json(created)).into_response()
}

/// `GET /api/v1/control/policies`
pub async fn list_policies(State(state): State<Arc<AppState>>) -> Response {
    Json(state.policy.list_policies()).into_response()
}

/// `GET /api/v1/control/policies/{id}`
pub async fn get_policy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.policy.get_policy(&id) {
        Ok(policy) => Json(policy).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `PUT /api/v1/control/policies/{id}`
pub async fn update_policy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut policy): Json<Policy>,
) -> Response {
    policy.id = id;
    match state.policy.update_policy(&policy) {
        Ok(updated) => {
            log_control_event(
                &state,
                AuditEventType::PolicyChange,
                "policy_updated",
                "policy",
                &updated.id,
            );
            Json(updated).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// `DELETE /api/v1/control/policies/{id}`
pub async fn delete_policy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.policy.delete_policy(&id) {
        Ok(()) => {
            log_control_event(
                &state,
                AuditEventType::PolicyChange,
                "policy_deleted",
                "policy",
                &id,
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// Spending limits
// ---------------------------------------------------------------------------

/// `POST /api/v1/control/spending-limits`
pub async fn create_spending_limit(
    State(state): State<Arc<AppState>>,
    Json(limit): Json<SpendingLimit>,
) -> Response {
    match state.repo.create_spending_limit(&limit).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/v1/control/spending-limits`
pub async fn list_spending_limits(State(state): State<Arc<AppState>>) -> Response {
    match state.repo.list_spending_limits().await {
        Ok(limits) => Json(limits).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/v1/control/spending-limits/{id}`
pub async fn get_spending_limit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.repo.get_spending_limit(&id).await {
        Ok(Some(limit)) => Json(limit).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "spending limit not found", "NOT_FOUND"),
        Err(e) => error_response(&e),
    }
}

/// `PUT /api/v1/control/spending-limits/{id}`
pub async fn update_spending_limit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut limit): Json<SpendingLimit>,
) -> Response {
    limit.id = id;
    match state.repo.update_spending_limit(&limit).await {
        Ok(updated) => Json(updated).into_response(),
        Err(e) => error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// `POST /api/v1/control/users`
pub async fn create_user(State(state): State<Arc<AppState>>, Json(user): Json<User>) -> Response {
    match state.repo.create_user(&user).await {
        Ok(created) => {
            state.policy.upsert_user(&created);
            log_control_event(
                &state,
                AuditEventType::UserAction,
                "user_created",
                "user",
                &created.id,
            );
            (StatusCode::CREATED, Json(created)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// `GET /api/v1/control/users`
pub async fn list_users(State(state): State<Arc<AppState>>) -> Response {
    match state.repo.list_users().await {
        Ok(users) => Json(users).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/v1/control/users/{id}`
pub async fn get_user(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.repo.get_user(&id).await {
        Ok(Some(user)) => Json(user).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "user not found", "NOT_FOUND"),
        Err(e) => error_response(&e),
    }
}

/// `PUT /api/v1/control/users/{id}`
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut user): Json<User>,
) -> Response {
    user.id = id;
    match state.repo.update_user(&user).await {
        Ok(updated) => {
            state.policy.upsert_user(&updated);
            Json(updated).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// `DELETE /api/v1/control/users/{id}`
pub async fn delete_user(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.repo.delete_user(&id).await {
        Ok(()) => {
            state.policy.remove_user(&id);
            log_control_event(
                &state,
                AuditEventType::UserAction,
                "user_deleted",
                "user",
                &id,
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Query parameters for `GET /api/v1/control/audit/logs`.
#[derive(Debug, Default, Deserialize)]
pub struct AuditLogsParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub user_id: Option<String>,
    pub resource_type: Option<String>,
    pub status: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Comma-separated event types.
    pub event_types: Option<String>,
}

/// `GET /api/v1/control/audit/logs`
pub async fn query_audit_logs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditLogsParams>,
) -> Response {
    let status = match params.status.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => match serde_json::from_value::<AuditStatus>(serde_json::json!(s)) {
            Ok(status) => Some(status),
            Err(_) => {
                return api_error(StatusCode::BAD_REQUEST, "invalid status", "INVALID_REQUEST")
            }
        },
        None => None,
    };

    let event_types = params
        .event_types
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| serde_json::from_value::<AuditEventType>(serde_json::json!(s.trim())).ok())
        .collect();

    let query = AuditQuery {
        start_time: params.start_time,
        end_time: params.end_time,
        event_types,
        user_id: params.user_id.unwrap_or_default(),
        resource_type: params.resource_type.unwrap_or_default(),
        status,
        limit: params.limit.unwrap_or(0),
        offset: params.offset.unwrap_or(0),
    };

    let (logs, total) = state.audit.query(&query);
    Json(serde_json::json!({
        "logs": logs,
        "total": total,
        "limit": if query.limit == 0 { 50 } else { query.limit },
        "offset": query.offset,
    }))
    .into_response()
}

/// Query parameters for `GET /api/v1/control/audit/stats`.
#[derive(Debug, Default, Deserialize)]
pub struct AuditStatsParams {
    pub period: Option<String>,
}

/// `GET /api/v1/control/audit/stats`
pub async fn audit_stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditStatsParams>,
) -> Response {
    Json(state.audit.stats(params.period.as_deref().unwrap_or("24h"))).into_response()
}

/// `GET /api/v1/control/dashboard`
pub async fn dashboard(State(state): State<Arc<AppState>>) -> Response {
    Json(state.audit.dashboard_metrics()).into_response()
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Query parameters for `GET /api/v1/control/alerts`.
#[derive(Debug, Default, Deserialize)]
pub struct AlertsParams {
    pub limit: Option<usize>,
    pub include_acked: Option<bool>,
}

/// `GET /api/v1/control/alerts`
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertsParams>,
) -> Response {
    let alerts = state.audit.alerts(
        params.limit.unwrap_or(50),
        params.include_acked.unwrap_or(false),
    );
    Json(alerts).into_response()
}

/// Optional body for alert acknowledgement.
#[derive(Debug, Default, Deserialize)]
pub struct AckRequest {
    #[serde(default)]
    pub acked_by: String,
}

/// `POST /api/v1/control/alerts/{id}/ack`
///
/// Idempotent; acknowledging an unknown alert also reports success.
pub async fn ack_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<AckRequest>>,
) -> Response {
    let acked_by = body.map(|Json(b)| b.acked_by).unwrap_or_default();
    state.audit.ack_alert(&id, &acked_by);
    Json(serde_json::json!({"acked": true})).into_response()
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// `GET /api/v1/control/settings`
pub async fn get_settings(State(state): State<Arc<AppState>>) -> Response {
    let mut settings = state.settings.all_settings().await;
    // Stored secrets never leave through the read surface.
    if let Some(v) = settings.get_mut("llm_api_key") {
        *v = serde_json::json!("");
    }
    Json(settings).into_response()
}

/// `GET /api/v1/control/settings/llm`
pub async fn get_llm_settings(State(state): State<Arc<AppState>>) -> Response {
    let mut settings = state.settings.llm_settings().await;
    let has_api_key = !settings.api_key.is_empty();
    settings.api_key = String::new();

    let mut body = serde_json::to_value(&settings).unwrap_or_default();
    body["has_api_key"] = serde_json::json!(has_api_key);
    Json(body).into_response()
}

/// `PUT /api/v1/control/settings/llm`
pub async fn update_llm_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<LlmSettings>,
) -> Response {
    match state.settings.update_llm_settings(&settings).await {
        Ok(()) => {
            log_control_event(
                &state,
                AuditEventType::SystemEvent,
                "llm_settings_updated",
                "settings",
                "llm",
            );
            Json(serde_json::json!({"updated": true})).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// `GET /api/v1/control/settings/security`
pub async fn get_security_settings(State(state): State<Arc<AppState>>) -> Response {
    Json(state.settings.security_settings().await).into_response()
}

/// `PUT /api/v1/control/settings/security`
pub async fn update_security_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<SecuritySettings>,
) -> Response {
    match state.settings.update_security_settings(&settings).await {
        Ok(()) => {
            log_control_event(
                &state,
                AuditEventType::SystemEvent,
                "security_settings_updated",
                "settings",
                "security",
            );
            Json(serde_json::json!({"updated": true})).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// `GET /api/v1/control/settings/storage`
pub async fn get_storage_info(State(state): State<Arc<AppState>>) -> Response {
    let settings = state.settings.all_settings().await;
    let mut info = HashMap::new();
    info.insert("type".to_string(), serde_json::json!("memory"));
    info.insert("healthy".to_string(), serde_json::json!(true));
    info.insert(
        "settings_count".to_string(),
        serde_json::json!(settings.len()),
    );
    Json(info).into_response()
}
