//! `GET /api/admin/stats` — gateway-wide totals.

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};

use crate::api::admin::guard::AdminGuard;
use crate::api::error::error_response;
use crate::state::AppState;

pub async fn stats(State(state): State<AppState>, _guard: AdminGuard) -> Response {
    match state.store.gateway_stats() {
        Ok(stats) => Json(serde_json::json!({
            "stats": stats,
            "activeConversationLocks": state.turn_locks.conversation_count(),
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}
