use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Safety pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Maximum user-message length in characters (`MAX_INPUT_CHARS`).
    #[serde(default = "d_max_input_chars")]
    pub max_input_chars: usize,
    /// Policy snapshot staleness TTL in milliseconds (`CACHE_TTL_MS`).
    #[serde(default = "d_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    /// When persistence is unreachable and no snapshot survives the stale
    /// grace, serve the built-in seed snapshot instead of failing.
    #[serde(default = "d_true")]
    pub fallback_to_defaults: bool,
    /// How many recent conversation messages go into the LLM prompt.
    #[serde(default = "d_history_window")]
    pub history_window: usize,
    #[serde(default)]
    pub budgets: StageBudgets,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_input_chars: d_max_input_chars(),
            cache_ttl_ms: d_cache_ttl_ms(),
            fallback_to_defaults: true,
            history_window: d_history_window(),
            budgets: StageBudgets::default(),
        }
    }
}

/// Per-stage time budgets.  Exceeding one fails the turn with that stage
/// as the reason class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageBudgets {
    #[serde(default = "d_sanitize_ms")]
    pub sanitize_ms: u64,
    /// Rule-engine resolution budget, excluding the moderation network call.
    #[serde(default = "d_engine_ms")]
    pub rule_engine_ms: u64,
    #[serde(default = "d_rag_ms")]
    pub rag_ms: u64,
    #[serde(default = "d_first_byte_secs")]
    pub llm_first_byte_secs: u64,
    #[serde(default = "d_overall_secs")]
    pub llm_overall_secs: u64,
}

impl Default for StageBudgets {
    fn default() -> Self {
        Self {
            sanitize_ms: d_sanitize_ms(),
            rule_engine_ms: d_engine_ms(),
            rag_ms: d_rag_ms(),
            llm_first_byte_secs: d_first_byte_secs(),
            llm_overall_secs: d_overall_secs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_input_chars() -> usize {
    2000
}
fn d_cache_ttl_ms() -> u64 {
    300_000
}
fn d_history_window() -> usize {
    20
}
fn d_true() -> bool {
    true
}
fn d_sanitize_ms() -> u64 {
    10
}
fn d_engine_ms() -> u64 {
    1000
}
fn d_rag_ms() -> u64 {
    100
}
fn d_first_byte_secs() -> u64 {
    15
}
fn d_overall_secs() -> u64 {
    120
}
