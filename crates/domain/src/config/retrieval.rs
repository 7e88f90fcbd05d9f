use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RAG retrieval
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Maximum number of documents injected into the prompt.
    #[serde(default = "d_k")]
    pub k: usize,
    /// Context block character budget (≈ budget_chars / 4 tokens).
    #[serde(default = "d_budget_chars")]
    pub budget_chars: usize,
    #[serde(default)]
    pub weights: ScoreWeights,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: d_k(),
            budget_chars: d_budget_chars(),
            weights: ScoreWeights::default(),
        }
    }
}

/// Per-field keyword-overlap weights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "d_w_title")]
    pub title: f64,
    #[serde(default = "d_w_keyword")]
    pub keyword: f64,
    #[serde(default = "d_w_content")]
    pub content: f64,
    #[serde(default = "d_w_phrase")]
    pub phrase: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            title: d_w_title(),
            keyword: d_w_keyword(),
            content: d_w_content(),
            phrase: d_w_phrase(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_k() -> usize {
    5
}
fn d_budget_chars() -> usize {
    6000
}
fn d_w_title() -> f64 {
    3.0
}
fn d_w_keyword() -> f64 {
    2.0
}
fn d_w_content() -> f64 {
    1.0
}
fn d_w_phrase() -> f64 {
    2.0
}
