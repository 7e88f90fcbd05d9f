//! Safety-rule CRUD and dry-run endpoints.
//!
//! Mutations validate that regex rules compile before touching the
//! store, then invalidate the policy cache so the next turn sees the
//! change.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use regex::RegexBuilder;
use serde::Deserialize;

use pal_domain::policy::RuleType;
use pal_safety::{detect_escalation, resolve_patterns_only};
use pal_store::RuleDraft;

use crate::api::admin::guard::AdminGuard;
use crate::api::error::{api_error, error_response};
use crate::state::AppState;

/// Compile check shared by create/update/test.  Keyword rules always
/// pass (their literals are escaped at snapshot build time).
fn compile_error(draft: &RuleDraft) -> Option<String> {
    if draft.rule_type != RuleType::RegexPattern {
        return None;
    }
    RegexBuilder::new(&draft.value)
        .case_insensitive(true)
        .size_limit(1 << 20)
        .build()
        .err()
        .map(|e| e.to_string())
}

pub async fn list(State(state): State<AppState>, _guard: AdminGuard) -> Response {
    match state.store.list_rules() {
        Ok(rules) => Json(serde_json::json!({ "rules": rules })).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn create(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Json(draft): Json<RuleDraft>,
) -> Response {
    if let Some(error) = compile_error(&draft) {
        return api_error(
            StatusCode::BAD_REQUEST,
            "invalid_rule",
            format!("regex does not compile: {error}"),
        );
    }
    match state.store.insert_rule(&draft) {
        Ok(rule) => {
            state.policy.invalidate();
            tracing::info!(rule_id = rule.id, category = %rule.category, "safety rule created");
            (StatusCode::CREATED, Json(serde_json::json!({ "rule": rule }))).into_response()
        }
        Err(e) => error_response(&e),
    }
}

pub async fn update(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Path(id): Path<i64>,
    Json(draft): Json<RuleDraft>,
) -> Response {
    if let Some(error) = compile_error(&draft) {
        return api_error(
            StatusCode::BAD_REQUEST,
            "invalid_rule",
            format!("regex does not compile: {error}"),
        );
    }
    match state.store.update_rule(id, &draft) {
        Ok(Some(rule)) => {
            state.policy.invalidate();
            Json(serde_json::json!({ "rule": rule })).into_response()
        }
        Ok(None) => api_error(StatusCode::NOT_FOUND, "not_found", "rule not found"),
        Err(e) => error_response(&e),
    }
}

pub async fn remove(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Path(id): Path<i64>,
) -> Response {
    match state.store.delete_rule(id) {
        Ok(true) => {
            state.policy.invalidate();
            Json(serde_json::json!({ "deleted": true })).into_response()
        }
        Ok(false) => api_error(StatusCode::NOT_FOUND, "not_found", "rule not found"),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dry runs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRuleRequest {
    #[serde(flatten)]
    pub rule: RuleDraft,
    pub sample_text: String,
}

/// `POST /api/admin/rules/test` — compile a candidate rule and preview
/// its match against a sample, without persisting anything.
pub async fn test_rule(
    _guard: AdminGuard,
    Json(body): Json<TestRuleRequest>,
) -> Response {
    if let Some(error) = compile_error(&body.rule) {
        return Json(serde_json::json!({
            "compiles": false,
            "error": error,
            "matched": false,
        }))
        .into_response();
    }

    let source = match body.rule.rule_type {
        RuleType::RegexPattern => body.rule.value.clone(),
        _ => regex::escape(&body.rule.value),
    };
    // Compile error handled above; escaped literals always compile.
    let regex = match RegexBuilder::new(&source).case_insensitive(true).build() {
        Ok(r) => r,
        Err(e) => {
            return Json(serde_json::json!({
                "compiles": false,
                "error": e.to_string(),
                "matched": false,
            }))
            .into_response()
        }
    };

    match regex.find(&body.sample_text) {
        Some(found) => Json(serde_json::json!({
            "compiles": true,
            "matched": true,
            "matchedText": found.as_str(),
            "offset": found.start(),
        }))
        .into_response(),
        None => Json(serde_json::json!({ "compiles": true, "matched": false })).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct TestAllRequest {
    pub text: String,
}

/// `POST /api/admin/rules/test-all` — run the live pattern rules and
/// escalation keywords against a sample and report the would-be
/// decision (moderation excluded: this is a pure, offline dry-run).
pub async fn test_all(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Json(body): Json<TestAllRequest>,
) -> Response {
    let snapshot = match state.policy.snapshot().await {
        Ok(s) => s,
        Err(e) => return error_response(&e),
    };

    let matches = state.matcher.find_matches(&body.text, &snapshot);
    let escalation = detect_escalation(&body.text, &snapshot);
    let decision = resolve_patterns_only(&matches, escalation, &snapshot);

    let match_summaries: Vec<serde_json::Value> = matches
        .iter()
        .map(|m| {
            serde_json::json!({
                "ruleId": m.rule.id,
                "category": m.rule.category,
                "action": m.rule.action,
                "matchedText": m.matched_text,
                "offset": m.offset,
            })
        })
        .collect();

    Json(serde_json::json!({
        "decision": decision,
        "matches": match_summaries,
    }))
    .into_response()
}
