//! System settings (JSON value per key).
//!
//! Known keys carry a fixed value schema, validated on write; unknown
//! keys are accepted as free-form JSON.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::Value;

use pal_domain::policy::SystemSetting;

use crate::api::admin::guard::AdminGuard;
use crate::api::error::{api_error, error_response};
use crate::state::AppState;

/// Schema check for the keys the pipeline consumes.
fn validate_value(key: &str, value: &Value) -> Result<(), String> {
    let ok = match key {
        "system_prompt" | "refusal_message" => value.is_string(),
        "history_window" | "cache_ttl" => value.as_u64().is_some(),
        "stream_buffer_full" => value.is_boolean(),
        "rate_limit" => {
            value.get("max_messages").and_then(Value::as_u64).is_some()
                && value.get("window_secs").and_then(Value::as_u64).is_some()
        }
        "rag" => {
            value.get("k").and_then(Value::as_u64).is_some()
                && value.get("budget_chars").and_then(Value::as_u64).is_some()
        }
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("value does not match the schema for key '{key}'"))
    }
}

pub async fn list(State(state): State<AppState>, _guard: AdminGuard) -> Response {
    match state.store.list_system_settings() {
        Ok(settings) => Json(serde_json::json!({ "settings": settings })).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn get_one(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Path(key): Path<String>,
) -> Response {
    match state.store.get_system_setting(&key) {
        Ok(Some(setting)) => Json(serde_json::json!({ "setting": setting })).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "not_found", "no such setting"),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateSystemSetting {
    pub value: Value,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Path(key): Path<String>,
    Json(body): Json<UpdateSystemSetting>,
) -> Response {
    if let Err(message) = validate_value(&key, &body.value) {
        return api_error(StatusCode::BAD_REQUEST, "invalid_setting", message);
    }
    let setting = SystemSetting {
        key,
        value: body.value,
        description: body.description,
    };
    match state.store.upsert_system_setting(&setting) {
        Ok(()) => {
            state.policy.invalidate();
            Json(serde_json::json!({ "setting": setting })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_keys_are_schema_checked() {
        assert!(validate_value("system_prompt", &json!("hi")).is_ok());
        assert!(validate_value("system_prompt", &json!(5)).is_err());
        assert!(validate_value("stream_buffer_full", &json!(true)).is_ok());
        assert!(validate_value("stream_buffer_full", &json!("yes")).is_err());
        assert!(validate_value(
            "rate_limit",
            &json!({"max_messages": 10, "window_secs": 60})
        )
        .is_ok());
        assert!(validate_value("rate_limit", &json!({"max_messages": 10})).is_err());
    }

    #[test]
    fn unknown_keys_are_free_form() {
        assert!(validate_value("custom_flag", &json!({"anything": []})).is_ok());
    }
}
