//! Chat turn endpoints — the primary user-facing surface.
//!
//! - `POST /api/messages` — non-streaming turn
//! - `GET  /api/messages/stream/:conversation_id?message=<text>` — SSE
//!
//! The SSE stream carries `data:` frames of `{type: "content"|"done"|
//! "error", ...}` and always ends with exactly one `done` or `error`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::Stream;
use serde::Deserialize;
use uuid::Uuid;

use pal_domain::conversation::Conversation;

use crate::api::error::{api_error, error_response, status_for_code, SessionId};
use crate::pipeline::{run_turn, TurnEvent, TurnInput, TurnSummary};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: Uuid,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub message: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared pre-flight
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reject early with a clear 503 when no completion provider key was
/// configured, instead of a vague failure mid-turn.
fn require_llm(state: &AppState) -> Result<(), Response> {
    if state.llm_configured {
        return Ok(());
    }
    Err(api_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "llm_unavailable",
        "no completion provider configured — set the LLM API key",
    ))
}

/// Load the conversation, check session ownership, and apply the
/// per-session rate limit.  The limit rejects before any message is
/// created.
async fn admit_turn(
    state: &AppState,
    session: Uuid,
    conversation_id: Uuid,
) -> Result<Conversation, Response> {
    let conversation = match state.store.get_conversation(conversation_id) {
        Ok(Some(c)) if c.session_id == session => c,
        Ok(_) => {
            return Err(api_error(
                StatusCode::NOT_FOUND,
                "not_found",
                "conversation not found",
            ))
        }
        Err(e) => return Err(error_response(&e)),
    };

    let limits = match state.policy.snapshot().await {
        Ok(snapshot) => snapshot.rate_limit((
            state.config.limits.max_messages,
            state.config.limits.window_secs,
        )),
        Err(e) => return Err(error_response(&e)),
    };
    if let Err(e) = state.rate_limiter.check(session, limits.0, limits.1) {
        return Err(error_response(&e));
    }

    Ok(conversation)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/messages (non-streaming)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn send(
    State(state): State<AppState>,
    SessionId(session): SessionId,
    Json(body): Json<SendMessageRequest>,
) -> Response {
    if let Err(resp) = require_llm(&state) {
        return resp;
    }
    let conversation = match admit_turn(&state, session, body.conversation_id).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut rx = run_turn(
        state.clone(),
        TurnInput {
            conversation,
            session_id: session,
            text: body.content,
        },
    );

    // Drain the event stream down to its terminal frame.
    let mut outcome: Option<TurnEvent> = None;
    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Content { .. } => {}
            terminal => outcome = Some(terminal),
        }
    }

    match outcome {
        Some(TurnEvent::Done(summary)) => Json(summary_json(&summary)).into_response(),
        Some(TurnEvent::Error { message, code }) => {
            api_error(status_for_code(code), code, message)
        }
        _ => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "turn ended without a terminal event",
        ),
    }
}

fn summary_json(summary: &TurnSummary) -> serde_json::Value {
    serde_json::json!({
        "userMessage": summary.user_message,
        "assistantMessage": summary.assistant_message,
        "blocked": summary.blocked,
        "blockReason": summary.block_reason,
        "escalated": summary.escalated,
        "moderationSkipped": summary.moderation_skipped,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/messages/stream/:conversation_id (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn stream(
    State(state): State<AppState>,
    SessionId(session): SessionId,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
) -> Response {
    if let Err(resp) = require_llm(&state) {
        return resp;
    }
    let conversation = match admit_turn(&state, session, conversation_id).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let rx = run_turn(
        state.clone(),
        TurnInput {
            conversation,
            session_id: session,
            text: query.message,
        },
    );

    Sse::new(sse_frames(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Map turn events onto the wire frames.  A post-check block surfaces as
/// the terminal `error` frame; everything else terminal is `done`.
fn sse_frames(
    mut rx: tokio::sync::mpsc::Receiver<TurnEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let frame = match event {
                TurnEvent::Content { content } => {
                    serde_json::json!({ "type": "content", "content": content })
                }
                TurnEvent::Done(summary) if summary.post_check_blocked => {
                    serde_json::json!({
                        "type": "error",
                        "message": "the response was withheld by the safety policy",
                        "code": "blocked",
                    })
                }
                TurnEvent::Done(summary) => {
                    serde_json::json!({
                        "type": "done",
                        "assistantMessage": {
                            "id": summary.assistant_message.id,
                            "content": summary.assistant_message.content,
                            "createdAt": summary.assistant_message.created_at,
                        },
                        "escalated": summary.escalated,
                    })
                }
                TurnEvent::Error { message, code } => {
                    serde_json::json!({ "type": "error", "message": message, "code": code })
                }
            };
            yield Ok(Event::default().data(frame.to_string()));
        }
    }
}
