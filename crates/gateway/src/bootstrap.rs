//! AppState construction and background-task spawning, shared by the
//! `serve` command and the integration tests.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};

use pal_domain::config::{Config, ConfigSeverity};
use pal_providers::{
    ChatCompletionsProvider, CompletionProvider, HostedModerationProvider, ModerationProvider,
};
use pal_safety::{ConfigCache, PatternMatcher, RuleEngine};
use pal_store::Store;

use crate::pipeline::conversation_lock::ConversationLockMap;
use crate::pipeline::rate_limit::RateLimiter;
use crate::state::AppState;

/// Validate config, initialize every subsystem, and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Store (schema + seed defaults applied on open) ──────────────
    let store = Arc::new(
        Store::open(&config.storage.database_url).context("opening the database")?,
    );
    tracing::info!(database = %config.storage.database_url, "store ready");

    // ── Policy snapshot cache ────────────────────────────────────────
    let policy = Arc::new(ConfigCache::new(store.clone(), &config.safety));
    tracing::info!(
        ttl_ms = config.safety.cache_ttl_ms,
        fallback_to_defaults = config.safety.fallback_to_defaults,
        "policy cache ready"
    );

    // ── Moderation provider ──────────────────────────────────────────
    let moderation: Option<Arc<dyn ModerationProvider>> = if config.moderation.enabled {
        match read_secret(&config.moderation.api_key_env) {
            Some(key) => {
                let provider = HostedModerationProvider::new(&config.moderation, key)
                    .context("initializing the moderation provider")?;
                tracing::info!(
                    base_url = %config.moderation.base_url,
                    timeout_secs = config.moderation.timeout_secs,
                    "moderation provider ready"
                );
                Some(Arc::new(provider))
            }
            None => {
                tracing::warn!(
                    env = %config.moderation.api_key_env,
                    "moderation API key not set — the moderation layer will be skipped"
                );
                None
            }
        }
    } else {
        tracing::info!("moderation layer disabled by config");
        None
    };

    // ── Pattern matcher + rule engine ────────────────────────────────
    let matcher = Arc::new(PatternMatcher::default());
    let engine = Arc::new(RuleEngine::new(matcher.clone(), moderation.clone()));
    tracing::info!("rule engine ready");

    // ── Completion provider ──────────────────────────────────────────
    let llm_key = read_secret(&config.llm.api_key_env);
    let llm_configured = llm_key.is_some();
    if !llm_configured {
        tracing::warn!(
            env = %config.llm.api_key_env,
            "LLM API key not set — chat endpoints will return 503"
        );
    }
    let completion: Arc<dyn CompletionProvider> = Arc::new(
        ChatCompletionsProvider::new(
            &config.llm,
            llm_key.unwrap_or_default(),
            config.safety.budgets.llm_overall_secs,
        )
        .context("initializing the completion provider")?,
    );
    tracing::info!(
        base_url = %config.llm.base_url,
        model = %config.llm.model,
        "completion provider ready"
    );

    // ── Admin key (read once, hashed for constant-time comparison) ──
    let admin_key_hash = match read_secret(&config.admin.key_env) {
        Some(key) => {
            tracing::info!("admin key auth enabled");
            Some(Sha256::digest(key.as_bytes()).to_vec())
        }
        None => {
            tracing::warn!(
                env = %config.admin.key_env,
                "admin key auth DISABLED — admin endpoints are open (dev mode)"
            );
            None
        }
    };

    Ok(AppState {
        config,
        store,
        completion,
        llm_configured,
        policy,
        engine,
        matcher,
        moderation,
        turn_locks: Arc::new(ConversationLockMap::new()),
        rate_limiter: Arc::new(RateLimiter::new()),
        admin_key_hash,
    })
}

fn read_secret(env_var: &str) -> Option<String> {
    std::env::var(env_var).ok().filter(|v| !v.is_empty())
}

/// Spawn the long-running maintenance tasks (lock and rate-window
/// pruning).  Call after [`build_app_state`] when running the server.
pub fn spawn_background_tasks(state: &AppState) {
    let turn_locks = state.turn_locks.clone();
    let rate_limiter = state.rate_limiter.clone();
    let window_secs = state.config.limits.window_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            turn_locks.prune_idle();
            rate_limiter.prune_idle(window_secs);
        }
    });
    tracing::info!("background tasks spawned");
}
