//! Admin auth guard — `AdminGuard` axum extractor.
//!
//! Handlers opt in by adding `_guard: AdminGuard` to their parameter
//! list.  The `X-Admin-Key` header is hashed with SHA-256 and compared
//! in constant time against the startup-computed hash, so neither the
//! key length nor its prefix leaks through timing.
//!
//! If `ADMIN_KEY` is not configured (dev mode), all requests pass.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub struct AdminGuard;

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let expected_hash = match &state.admin_key_hash {
            Some(h) => h,
            None => return Ok(AdminGuard), // dev mode
        };

        let provided = parts
            .headers
            .get("x-admin-key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let provided_hash = Sha256::digest(provided.as_bytes());
        if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
            return Err((
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({ "error": "invalid admin key" })),
            ));
        }
        Ok(AdminGuard)
    }
}
