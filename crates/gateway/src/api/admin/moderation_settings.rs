//! Moderation threshold settings.
//!
//! - `GET  /api/admin/settings/moderation`            — all categories
//! - `GET  /api/admin/settings/moderation/:category`  — one
//! - `PUT  /api/admin/settings/moderation/:category`  — upsert
//! - `POST /api/admin/settings/moderation/test`       — live dry-run

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use pal_domain::policy::{ModerationSetting, RuleAction};
use pal_safety::apply_thresholds;

use crate::api::admin::guard::AdminGuard;
use crate::api::error::{api_error, error_response};
use crate::state::AppState;

pub async fn list(State(state): State<AppState>, _guard: AdminGuard) -> Response {
    match state.store.list_moderation_settings() {
        Ok(settings) => Json(serde_json::json!({ "settings": settings })).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn get_one(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Path(category): Path<String>,
) -> Response {
    match state.store.get_moderation_setting(&category) {
        Ok(Some(setting)) => Json(serde_json::json!({ "setting": setting })).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "not_found", "no such category"),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateModerationSetting {
    pub enabled: bool,
    pub threshold: f64,
    pub action: RuleAction,
}

pub async fn update(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Path(category): Path<String>,
    Json(body): Json<UpdateModerationSetting>,
) -> Response {
    let setting = ModerationSetting {
        category,
        enabled: body.enabled,
        threshold: body.threshold,
        action: body.action,
    };
    match state.store.upsert_moderation_setting(&setting) {
        Ok(()) => {
            state.policy.invalidate();
            Json(serde_json::json!({ "setting": setting })).into_response()
        }
        Err(e) => match e {
            pal_domain::error::Error::Config(msg) => {
                api_error(StatusCode::BAD_REQUEST, "invalid_setting", msg)
            }
            other => error_response(&other),
        },
    }
}

#[derive(Debug, Deserialize)]
pub struct TestRequest {
    pub text: String,
}

/// Dry-run a text against the live provider and thresholds.  Reports
/// the raw scores plus the locally-thresholded verdicts.
pub async fn test(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Json(body): Json<TestRequest>,
) -> Response {
    let Some(provider) = &state.moderation else {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "moderation_unavailable",
            "no moderation provider configured",
        );
    };
    let snapshot = match state.policy.snapshot().await {
        Ok(s) => s,
        Err(e) => return error_response(&e),
    };

    match provider.moderate(&body.text).await {
        Ok(outcome) => {
            let (hits, local_flags) = apply_thresholds(&outcome, &snapshot);
            Json(serde_json::json!({
                "scores": outcome.scores,
                "providerFlags": outcome.flags,
                "localFlags": local_flags,
                "hits": hits,
            }))
            .into_response()
        }
        Err(e) => error_response(&e),
    }
}
