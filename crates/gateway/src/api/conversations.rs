//! Conversation endpoints.
//!
//! - `POST /api/conversations`     — create
//! - `GET  /api/conversations/:id` — conversation with ordered messages
//! - `GET  /api/conversations`     — paginated list for the session

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use uuid::Uuid;

use crate::api::error::{api_error, error_response, SessionId};
use crate::api::Pagination;
use crate::state::AppState;

pub async fn create(State(state): State<AppState>, SessionId(session): SessionId) -> Response {
    match state.store.create_conversation(session) {
        Ok(conversation) => {
            tracing::info!(conversation_id = %conversation.id, "conversation created");
            Json(serde_json::json!({ "conversation": conversation })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

pub async fn get(
    State(state): State<AppState>,
    SessionId(session): SessionId,
    Path(id): Path<Uuid>,
) -> Response {
    let conversation = match state.store.get_conversation(id) {
        Ok(Some(c)) if c.session_id == session => c,
        Ok(_) => {
            return api_error(StatusCode::NOT_FOUND, "not_found", "conversation not found")
        }
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

pub async fn list(
    State(state): State<AppState>,
    SessionId(session): SessionId,
    Query(pagination): Query<Pagination>,
) -> Response {
    let (page, limit) = pagination.clamped();
    match state.store.list_conversations(session, page, limit) {
        Ok((conversations, total)) => Json(serde_json::json!({
            "conversations": conversations,
            "page": page,
            "limit": limit,
            "total": total,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}
