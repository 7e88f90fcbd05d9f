//! Error → HTTP mapping and the session extractor.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use uuid::Uuid;

use pal_domain::error::Error;

use crate::state::AppState;

/// Build a standardized JSON error response: `{ "error": "...", "code": "..." }`.
pub fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into(), "code": code })),
    )
        .into_response()
}

/// Map a domain error onto the HTTP surface (§7 policy): client errors
/// keep their message, internals are opaque.
pub fn error_response(e: &Error) -> Response {
    let status = status_for_code(e.code());
    let message = match status {
        StatusCode::INTERNAL_SERVER_ERROR => {
            tracing::error!(error = %e, "internal error");
            "internal error".to_string()
        }
        _ => e.to_string(),
    };
    api_error(status, e.code(), message)
}

/// Shared mapping for error codes arriving via turn events.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "input_empty" | "input_too_long" => StatusCode::BAD_REQUEST,
        "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
        "config_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        "llm_unavailable" => StatusCode::BAD_GATEWAY,
        "timeout" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session extractor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extracts and records the client session from `X-Session-Id`.
///
/// The ID is a client-minted UUID; the server only tracks first/last
/// contact.  Missing or malformed headers are a 400.
pub struct SessionId(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for SessionId {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("x-session-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                api_error(
                    StatusCode::BAD_REQUEST,
                    "missing_session",
                    "missing X-Session-Id header",
                )
            })?;

        let id = Uuid::parse_str(raw).map_err(|_| {
            api_error(
                StatusCode::BAD_REQUEST,
                "invalid_session",
                "X-Session-Id must be a UUID",
            )
        })?;

        state
            .store
            .touch_session(id)
            .map_err(|e| error_response(&e))?;

        Ok(SessionId(id))
    }
}
