//! Escalation and moderation-log review endpoints.
//!
//! - `GET /api/admin/escalations`        — escalated conversations
//! - `GET /api/admin/escalations/:id`    — one, with its messages
//! - `GET /api/admin/moderation-logs`    — the audit trail

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use uuid::Uuid;

use crate::api::admin::guard::AdminGuard;
use crate::api::error::{api_error, error_response};
use crate::api::Pagination;
use crate::state::AppState;

pub async fn list_escalations(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Query(pagination): Query<Pagination>,
) -> Response {
    let (page, limit) = pagination.clamped();
    match state.store.list_escalations(page, limit) {
        Ok((escalations, total)) => Json(serde_json::json!({
            "escalations": escalations,
            "page": page,
            "limit": limit,
            "total": total,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn get_escalation(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Path(id): Path<Uuid>,
) -> Response {
    let conversation = match state.store.get_conversation(id) {
        Ok(Some(c)) if c.escalated => c,
        Ok(_) => return api_error(StatusCode::NOT_FOUND, "not_found", "escalation not found"),
        Err(e) => return error_response(&e),
    };
    let messages = match state.store.list_messages(conversation.id) {
        Ok(m) => m,
        Err(e) => return error_response(&e),
    };
    Json(serde_json::json!({
        "conversation": conversation,
        "messages": messages,
    }))
    .into_response()
}

pub async fn list_moderation_logs(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Query(pagination): Query<Pagination>,
) -> Response {
    let (page, limit) = pagination.clamped();
    match state.store.list_moderation_logs(page, limit) {
        Ok((logs, total)) => Json(serde_json::json!({
            "logs": logs,
            "page": page,
            "limit": limit,
            "total": total,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}
