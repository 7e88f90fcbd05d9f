//! The immutable policy snapshot.
//!
//! A snapshot bundles every configuration set used during one evaluation:
//! compiled safety rules, moderation thresholds, escalation categories,
//! system settings, and the knowledge corpus.  Snapshots are built once
//! (by the cache's single refresh writer) and then shared by reference;
//! readers never mutate one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use pal_domain::policy::{
    EscalationSetting, KnowledgeDoc, ModerationSetting, SafetyRule, SystemSetting,
};
use pal_store::PolicyBundle;

use crate::patterns::{CompiledRule, RegexCache};

/// Where a snapshot's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    Store,
    /// Built-in defaults served while persistence is unreachable.
    Defaults,
}

pub struct Snapshot {
    /// Enabled rules with their compiled patterns, priority desc then
    /// rule id asc.  Rules that failed to compile are absent (disabled
    /// in this snapshot).
    pub rules: Vec<CompiledRule>,
    pub moderation: HashMap<String, ModerationSetting>,
    /// Enabled escalation categories, priority desc, category asc ties.
    pub escalation: Vec<EscalationSetting>,
    pub system: HashMap<String, Value>,
    pub knowledge: Arc<Vec<KnowledgeDoc>>,
    pub source: SnapshotSource,
    pub loaded_at: Instant,
}

impl Snapshot {
    /// Compile a snapshot from freshly-loaded policy rows.  Regexes come
    /// from `cache` so unchanged rules are not recompiled across
    /// refreshes.
    pub fn build(bundle: PolicyBundle, cache: &RegexCache, source: SnapshotSource) -> Self {
        let mut rules: Vec<CompiledRule> = bundle
            .rules
            .into_iter()
            .filter(|r| r.enabled)
            .filter_map(|r| cache.compile(r))
            .collect();
        rules.sort_by(|a, b| {
            b.rule
                .priority
                .cmp(&a.rule.priority)
                .then_with(|| a.rule.id.cmp(&b.rule.id))
        });

        let moderation = bundle
            .moderation
            .into_iter()
            .map(|m| (m.category.clone(), m))
            .collect();

        let mut escalation: Vec<EscalationSetting> = bundle
            .escalation
            .into_iter()
            .filter(|e| e.enabled)
            .collect();
        escalation.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.category.cmp(&b.category))
        });

        let system = bundle
            .system
            .into_iter()
            .map(|s| (s.key, s.value))
            .collect();

        Self {
            rules,
            moderation,
            escalation,
            system,
            knowledge: Arc::new(bundle.knowledge),
            source,
            loaded_at: Instant::now(),
        }
    }

    // ── System-setting accessors ───────────────────────────────────

    pub fn system_str(&self, key: &str) -> Option<&str> {
        self.system.get(key).and_then(Value::as_str)
    }

    pub fn system_u64(&self, key: &str) -> Option<u64> {
        self.system.get(key).and_then(Value::as_u64)
    }

    pub fn system_bool(&self, key: &str) -> Option<bool> {
        self.system.get(key).and_then(Value::as_bool)
    }

    pub fn system_prompt(&self) -> &str {
        self.system_str("system_prompt")
            .unwrap_or("You are a helpful assistant.")
    }

    pub fn refusal_message(&self) -> &str {
        self.system_str("refusal_message")
            .unwrap_or("I can't help with that request.")
    }

    /// `(max_messages, window_secs)` for the per-session rate limit.
    pub fn rate_limit(&self, fallback: (usize, u64)) -> (usize, u64) {
        match self.system.get("rate_limit") {
            Some(v) => (
                v.get("max_messages")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize)
                    .unwrap_or(fallback.0),
                v.get("window_secs")
                    .and_then(Value::as_u64)
                    .unwrap_or(fallback.1),
            ),
            None => fallback,
        }
    }

    /// `(k, budget_chars)` overrides for retrieval.
    pub fn rag_params(&self, fallback: (usize, usize)) -> (usize, usize) {
        match self.system.get("rag") {
            Some(v) => (
                v.get("k")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize)
                    .unwrap_or(fallback.0),
                v.get("budget_chars")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize)
                    .unwrap_or(fallback.1),
            ),
            None => fallback,
        }
    }

    pub fn history_window(&self, fallback: usize) -> usize {
        self.system_u64("history_window")
            .map(|n| n as usize)
            .unwrap_or(fallback)
    }

    /// Snapshot TTL override in seconds (`cache_ttl` system setting).
    pub fn cache_ttl_secs(&self) -> Option<u64> {
        self.system_u64("cache_ttl")
    }

    /// Whether the SSE path buffers the full completion before emitting.
    pub fn stream_buffer_full(&self) -> bool {
        self.system_bool("stream_buffer_full").unwrap_or(false)
    }

    /// The raw (uncompiled) view of the active rules, for admin listings.
    pub fn raw_rules(&self) -> Vec<&SafetyRule> {
        self.rules.iter().map(|c| &c.rule).collect()
    }
}

/// Rebuild a snapshot from explicit rows (used by the defaults path and
/// tests).
pub fn snapshot_from_parts(
    rules: Vec<SafetyRule>,
    moderation: Vec<ModerationSetting>,
    escalation: Vec<EscalationSetting>,
    system: Vec<SystemSetting>,
    knowledge: Vec<KnowledgeDoc>,
    cache: &RegexCache,
    source: SnapshotSource,
) -> Snapshot {
    Snapshot::build(
        PolicyBundle {
            rules,
            moderation,
            escalation,
            system,
            knowledge,
        },
        cache,
        source,
    )
}
