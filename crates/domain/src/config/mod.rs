mod limits;
mod llm;
mod retrieval;
mod safety;
mod server;
mod storage;

pub use limits::*;
pub use llm::*;
pub use retrieval::*;
pub use safety::*;
pub use server::*;
pub use storage::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub moderation: ModerationClientConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub limits: RateLimitConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Environment variable holding the admin key checked against the
    /// `X-Admin-Key` header.  If the env var is unset, admin endpoints run
    /// unauthenticated (dev mode, loudly warned at startup).
    #[serde(default = "d_admin_key_env")]
    pub key_env: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            key_env: d_admin_key_env(),
        }
    }
}

fn d_admin_key_env() -> String {
    "ADMIN_KEY".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading & env overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Load from a TOML file, falling back to defaults when the file does
    /// not exist.  Environment overrides are applied afterwards either way.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        } else {
            Config::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply the documented environment variables on top of the file
    /// config: `DATABASE_URL`, `PORT`, `MAX_INPUT_CHARS`, `CACHE_TTL_MS`.
    /// (`ADMIN_KEY`, `LLM_API_KEY` and `MODERATION_API_KEY` are secrets
    /// read at bootstrap, not stored here.)
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                self.storage.database_url = url;
            }
        }
        if let Some(port) = env_parse::<u16>("PORT") {
            self.server.port = port;
        }
        if let Some(max) = env_parse::<usize>("MAX_INPUT_CHARS") {
            self.safety.max_input_chars = max;
        }
        if let Some(ttl) = env_parse::<u64>("CACHE_TTL_MS") {
            self.safety.cache_ttl_ms = ttl;
        }
    }

    /// Sanity-check the configuration, returning severity-tagged issues.
    /// Errors abort startup; warnings are only logged.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.safety.max_input_chars == 0 {
            issues.push(ConfigIssue::error(
                "safety.max_input_chars must be greater than zero",
            ));
        }
        if self.safety.cache_ttl_ms == 0 {
            issues.push(ConfigIssue::warning(
                "safety.cache_ttl_ms is zero — every request will refresh the policy cache",
            ));
        }
        if self.limits.max_messages == 0 || self.limits.window_secs == 0 {
            issues.push(ConfigIssue::error(
                "limits.max_messages and limits.window_secs must be greater than zero",
            ));
        }
        if self.retrieval.k == 0 {
            issues.push(ConfigIssue::warning(
                "retrieval.k is zero — RAG context injection is effectively disabled",
            ));
        }
        if self.llm.base_url.is_empty() {
            issues.push(ConfigIssue::error("llm.base_url must not be empty"));
        }
        if self.storage.database_url.is_empty() {
            issues.push(ConfigIssue::error("storage.database_url must not be empty"));
        }

        issues
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    match std::env::var(var) {
        Ok(raw) if !raw.is_empty() => match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(var, value = %raw, "ignoring unparseable environment override");
                None
            }
        },
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        let issues = config.validate();
        assert!(
            !issues
                .iter()
                .any(|i| i.severity == ConfigSeverity::Error),
            "default config must not carry validation errors: {issues:?}"
        );
    }

    #[test]
    fn empty_toml_parses_to_defaults() {
        let config: Config = toml::from_str("").expect("empty config parses");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.safety.max_input_chars, 2000);
        assert_eq!(config.limits.max_messages, 10);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9999

            [safety]
            max_input_chars = 500
            "#,
        )
        .expect("partial config parses");
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.safety.max_input_chars, 500);
        assert_eq!(config.safety.cache_ttl_ms, 300_000);
    }
}
