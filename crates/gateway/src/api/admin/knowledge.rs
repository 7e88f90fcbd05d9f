//! Knowledge-base administration.
//!
//! CRUD over the corpus plus the retrieval-scored search endpoint and
//! the bulk import/delete contract (post-parse: an array of
//! `{title, category, content, keywords}` entries).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use pal_domain::policy::KnowledgeImport;
use pal_retrieval::Retriever;

use crate::api::admin::guard::AdminGuard;
use crate::api::error::{api_error, error_response};
use crate::state::AppState;

fn validate_entry(entry: &KnowledgeImport) -> Result<(), String> {
    if entry.title.trim().is_empty() {
        return Err("title must not be empty".into());
    }
    if entry.content.trim().is_empty() {
        return Err("content must not be empty".into());
    }
    if entry.category.trim().is_empty() {
        return Err("category must not be empty".into());
    }
    Ok(())
}

pub async fn list(State(state): State<AppState>, _guard: AdminGuard) -> Response {
    match state.store.list_knowledge() {
        Ok(documents) => Json(serde_json::json!({ "documents": documents })).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn get_one(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Path(id): Path<i64>,
) -> Response {
    match state.store.get_knowledge(id) {
        Ok(Some(document)) => Json(serde_json::json!({ "document": document })).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "not_found", "document not found"),
        Err(e) => error_response(&e),
    }
}

pub async fn create(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Json(entry): Json<KnowledgeImport>,
) -> Response {
    if let Err(message) = validate_entry(&entry) {
        return api_error(StatusCode::BAD_REQUEST, "invalid_document", message);
    }
    match state.store.insert_knowledge(&entry) {
        Ok(document) => {
            state.policy.invalidate();
            (
                StatusCode::CREATED,
                Json(serde_json::json!({ "document": document })),
            )
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

pub async fn update(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Path(id): Path<i64>,
    Json(entry): Json<KnowledgeImport>,
) -> Response {
    if let Err(message) = validate_entry(&entry) {
        return api_error(StatusCode::BAD_REQUEST, "invalid_document", message);
    }
    match state.store.update_knowledge(id, &entry) {
        Ok(Some(document)) => {
            state.policy.invalidate();
            Json(serde_json::json!({ "document": document })).into_response()
        }
        Ok(None) => api_error(StatusCode::NOT_FOUND, "not_found", "document not found"),
        Err(e) => error_response(&e),
    }
}

pub async fn remove(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Path(id): Path<i64>,
) -> Response {
    match state.store.delete_knowledge(id) {
        Ok(true) => {
            state.policy.invalidate();
            Json(serde_json::json!({ "deleted": true })).into_response()
        }
        Ok(false) => api_error(StatusCode::NOT_FOUND, "not_found", "document not found"),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "d_search_limit")]
    pub limit: usize,
}

fn d_search_limit() -> usize {
    10
}

/// Score the persisted corpus against a query with the same weights the
/// pipeline's retriever uses.
pub async fn search(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Json(body): Json<SearchRequest>,
) -> Response {
    let documents = match state.store.list_knowledge() {
        Ok(d) => d,
        Err(e) => return error_response(&e),
    };
    let retriever = Retriever::new(&state.config.retrieval);
    let results = retriever.search(&body.query, &documents, body.limit.clamp(1, 50));
    Json(serde_json::json!({ "results": results })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bulk operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct BulkImportRequest {
    pub entries: Vec<KnowledgeImport>,
}

/// Import pre-parsed entries, one validation verdict per item.  Valid
/// entries are inserted even when siblings fail.
pub async fn bulk_import(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Json(body): Json<BulkImportRequest>,
) -> Response {
    let mut imported = 0usize;
    let mut errors: Vec<serde_json::Value> = Vec::new();

    for (index, entry) in body.entries.iter().enumerate() {
        if let Err(message) = validate_entry(entry) {
            errors.push(serde_json::json!({ "index": index, "error": message }));
            continue;
        }
        match state.store.insert_knowledge(entry) {
            Ok(_) => imported += 1,
            Err(e) => {
                errors.push(serde_json::json!({ "index": index, "error": e.to_string() }))
            }
        }
    }

    if imported > 0 {
        state.policy.invalidate();
    }
    tracing::info!(imported, skipped = errors.len(), "knowledge bulk import");

    Json(serde_json::json!({
        "imported": imported,
        "skipped": errors.len(),
        "errors": errors,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<i64>,
}

pub async fn bulk_delete(
    State(state): State<AppState>,
    _guard: AdminGuard,
    Json(body): Json<BulkDeleteRequest>,
) -> Response {
    match state.store.delete_knowledge_bulk(&body.ids) {
        Ok(deleted) => {
            if deleted > 0 {
                state.policy.invalidate();
            }
            Json(serde_json::json!({ "deleted": deleted })).into_response()
        }
        Err(e) => error_response(&e),
    }
}
