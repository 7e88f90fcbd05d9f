//! Escalation category settings.
//!
//! - `GET  /api/admin/settings/escalation`            — all categories
//! - `GET  /api/admin/settings/escalation/:category`  — one
//! - `PUT  /api/admin/settings/escalation/:category`  — upsert
//! - `POST /api/admin/settings/escalation/test`       — keyword dry-run

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use pal_domain::policy::EscalationSetting;
use pal_safety::detect_escalation;

use crate::api::admin::guard::AdminGuard;
use crate::api::error::{api_error, error_response};
use crate::state::AppState;

pub async fn list(State(state): State<AppState>, _guard: AdminGuard) -> Response {
    match state.store.list_escalation_settings() {
        Ok(settings) => Json(serde_json::json!({ "settings": settings })).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn get_one(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Path(category): Path<String>,
) -> Response {
    match state.store.get_escalation_setting(&category) {
        Ok(Some(setting)) => Json(serde_json::json!({ "setting": setting })).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "not_found", "no such category"),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEscalationSetting {
    pub enabled: bool,
    pub keywords: Vec<String>,
    pub response_template: String,
    pub priority: i32,
}

pub async fn update(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Path(category): Path<String>,
    Json(body): Json<UpdateEscalationSetting>,
) -> Response {
    if body.response_template.trim().is_empty() {
        return api_error(
            StatusCode::BAD_REQUEST,
            "invalid_setting",
            "responseTemplate must not be empty",
        );
    }
    let setting = EscalationSetting {
        category,
        enabled: body.enabled,
        keywords: body.keywords,
        response_template: body.response_template,
        priority: body.priority,
    };
    match state.store.upsert_escalation_setting(&setting) {
        Ok(()) => {
            state.policy.invalidate();
            Json(serde_json::json!({ "setting": setting })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct TestRequest {
    pub text: String,
}

/// Dry-run the escalation detector against the live keyword lists.
pub async fn test(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Json(body): Json<TestRequest>,
) -> Response {
    let snapshot = match state.policy.snapshot().await {
        Ok(s) => s,
        Err(e) => return error_response(&e),
    };

    match detect_escalation(&body.text, &snapshot) {
        Some(hit) => Json(serde_json::json!({
            "matched": true,
            "category": hit.category,
            "urgency": hit.urgency,
            "triggers": hit.triggers,
            "responseTemplate": hit.response_template,
        }))
        .into_response(),
        None => Json(serde_json::json!({ "matched": false })).into_response(),
    }
}
