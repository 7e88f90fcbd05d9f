pub mod admin;
pub mod conversations;
pub mod error;
pub mod messages;

use axum::routing::{delete, get, post, put};
use axum::Router;
use serde::Deserialize;

use crate::state::AppState;

/// Build the full API router.
///
/// Chat routes are session-scoped via the `X-Session-Id` header; admin
/// routes enforce the `X-Admin-Key` guard inside each handler.
pub fn router() -> Router<AppState> {
    let chat = Router::new()
        .route("/api/conversations", post(conversations::create))
        .route("/api/conversations", get(conversations::list))
        .route("/api/conversations/:id", get(conversations::get))
        .route("/api/messages", post(messages::send))
        .route(
            "/api/messages/stream/:conversation_id",
            get(messages::stream),
        );

    let admin = Router::new()
        .route("/api/admin/stats", get(admin::stats::stats))
        // Escalations & audit logs
        .route("/api/admin/escalations", get(admin::logs::list_escalations))
        .route(
            "/api/admin/escalations/:id",
            get(admin::logs::get_escalation),
        )
        .route(
            "/api/admin/moderation-logs",
            get(admin::logs::list_moderation_logs),
        )
        // Safety rules
        .route("/api/admin/rules", get(admin::rules::list))
        .route("/api/admin/rules", post(admin::rules::create))
        .route("/api/admin/rules/test", post(admin::rules::test_rule))
        .route("/api/admin/rules/test-all", post(admin::rules::test_all))
        .route("/api/admin/rules/:id", put(admin::rules::update))
        .route("/api/admin/rules/:id", delete(admin::rules::remove))
        // Moderation settings
        .route(
            "/api/admin/settings/moderation",
            get(admin::moderation_settings::list),
        )
        .route(
            "/api/admin/settings/moderation/test",
            post(admin::moderation_settings::test),
        )
        .route(
            "/api/admin/settings/moderation/:category",
            get(admin::moderation_settings::get_one),
        )
        .route(
            "/api/admin/settings/moderation/:category",
            put(admin::moderation_settings::update),
        )
        // Escalation settings
        .route(
            "/api/admin/settings/escalation",
            get(admin::escalation_settings::list),
        )
        .route(
            "/api/admin/settings/escalation/test",
            post(admin::escalation_settings::test),
        )
        .route(
            "/api/admin/settings/escalation/:category",
            get(admin::escalation_settings::get_one),
        )
        .route(
            "/api/admin/settings/escalation/:category",
            put(admin::escalation_settings::update),
        )
        // System settings
        .route(
            "/api/admin/settings/system",
            get(admin::system_settings::list),
        )
        .route(
            "/api/admin/settings/system/:key",
            get(admin::system_settings::get_one),
        )
        .route(
            "/api/admin/settings/system/:key",
            put(admin::system_settings::update),
        )
        // Knowledge base
        .route("/api/admin/knowledge-base", get(admin::knowledge::list))
        .route("/api/admin/knowledge-base", post(admin::knowledge::create))
        .route(
            "/api/admin/knowledge-base/search",
            post(admin::knowledge::search),
        )
        .route(
            "/api/admin/knowledge-base/bulk-import",
            post(admin::knowledge::bulk_import),
        )
        .route(
            "/api/admin/knowledge-base/bulk-delete",
            post(admin::knowledge::bulk_delete),
        )
        .route(
            "/api/admin/knowledge-base/:id",
            get(admin::knowledge::get_one),
        )
        .route(
            "/api/admin/knowledge-base/:id",
            put(admin::knowledge::update),
        )
        .route(
            "/api/admin/knowledge-base/:id",
            delete(admin::knowledge::remove),
        );

    chat.merge(admin)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pagination
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const MAX_PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pagination {
    #[serde(default = "d_page")]
    pub page: usize,
    #[serde(default = "d_limit")]
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: d_page(),
            limit: d_limit(),
        }
    }
}

impl Pagination {
    /// 1-based page, limit clamped to `1..=100`.
    pub fn clamped(self) -> (usize, usize) {
        (self.page.max(1), self.limit.clamp(1, MAX_PAGE_LIMIT))
    }
}

fn d_page() -> usize {
    1
}
fn d_limit() -> usize {
    20
}
