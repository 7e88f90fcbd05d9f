use std::sync::Arc;

use pal_domain::config::Config;
use pal_providers::{CompletionProvider, ModerationProvider};
use pal_safety::{ConfigCache, PatternMatcher, RuleEngine};
use pal_store::Store;

use crate::pipeline::conversation_lock::ConversationLockMap;
use crate::pipeline::rate_limit::RateLimiter;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, store, completion provider
/// - **Safety** — policy snapshot cache, rule engine
/// - **Turn control** — per-conversation locks, rate limiter
/// - **Security** — admin key hash (computed once at startup)
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub completion: Arc<dyn CompletionProvider>,
    /// False when no LLM API key was found at startup; chat endpoints
    /// pre-flight on this instead of failing mid-turn.
    pub llm_configured: bool,

    // ── Safety ────────────────────────────────────────────────────────
    pub policy: Arc<ConfigCache>,
    pub engine: Arc<RuleEngine>,
    /// Pattern matcher shared with the engine; used directly by the
    /// admin rule dry-run endpoints.
    pub matcher: Arc<PatternMatcher>,
    /// Moderation provider handle shared with the engine; used directly
    /// by the admin threshold dry-run endpoint.  `None` when disabled.
    pub moderation: Option<Arc<dyn ModerationProvider>>,

    // ── Turn control ──────────────────────────────────────────────────
    pub turn_locks: Arc<ConversationLockMap>,
    pub rate_limiter: Arc<RateLimiter>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the admin key (`ADMIN_KEY`).  `None` = dev mode
    /// (admin endpoints accessible without the header).
    pub admin_key_hash: Option<Vec<u8>>,
}
