use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Completion provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat completions endpoint.
    #[serde(default = "d_llm_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "d_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_llm_base_url(),
            api_key_env: d_llm_key_env(),
            model: d_model(),
            max_tokens: None,
            temperature: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Moderation provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationClientConfig {
    /// Base URL of an OpenAI-compatible `/moderations` endpoint.
    #[serde(default = "d_mod_base_url")]
    pub base_url: String,
    #[serde(default = "d_mod_key_env")]
    pub api_key_env: String,
    /// Optional moderation model override.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "d_mod_timeout_secs")]
    pub timeout_secs: u64,
    /// Disable to run the pipeline without the hosted moderation layer
    /// (every evaluation records a moderation skip).
    #[serde(default = "d_true")]
    pub enabled: bool,
}

impl Default for ModerationClientConfig {
    fn default() -> Self {
        Self {
            base_url: d_mod_base_url(),
            api_key_env: d_mod_key_env(),
            model: None,
            timeout_secs: d_mod_timeout_secs(),
            enabled: true,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_llm_key_env() -> String {
    "LLM_API_KEY".into()
}
fn d_model() -> String {
    "gpt-4o-mini".into()
}
fn d_mod_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_mod_key_env() -> String {
    "MODERATION_API_KEY".into()
}
fn d_mod_timeout_secs() -> u64 {
    5
}
fn d_true() -> bool {
    true
}
