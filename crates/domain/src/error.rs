/// Shared error type used across all Palisade crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("config: {0}")]
    Config(String),

    /// The policy cache could not produce a snapshot (refresh failed and
    /// the previous snapshot aged past its stale grace).
    #[error("configuration unavailable: {0}")]
    ConfigUnavailable(String),

    #[error("message is empty")]
    InputEmpty,

    #[error("message exceeds the maximum length of {max} characters")]
    InputTooLong { max: usize },

    #[error("rate limit exceeded — try again shortly")]
    RateLimited,

    /// The hosted moderation service could not be reached.  The pipeline
    /// treats this as non-blocking and records the skip in the audit log.
    #[error("moderation unavailable: {0}")]
    ModerationUnavailable(String),

    #[error("completion provider unavailable: {0}")]
    LlmUnavailable(String),

    #[error("completion provider timed out: {0}")]
    LlmTimeout(String),

    /// A pipeline stage overran its budget.  `class` names the stage
    /// (`sanitize`, `rule_engine`, `rag`, `llm_first_byte`, `llm_overall`).
    #[error("stage '{class}' exceeded its time budget")]
    StageTimeout { class: &'static str },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short machine-readable code for API payloads and SSE error frames.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InputEmpty => "input_empty",
            Error::InputTooLong { .. } => "input_too_long",
            Error::RateLimited => "rate_limited",
            Error::ConfigUnavailable(_) => "config_unavailable",
            Error::ModerationUnavailable(_) => "moderation_unavailable",
            Error::LlmUnavailable(_) => "llm_unavailable",
            Error::LlmTimeout(_) | Error::StageTimeout { .. } | Error::Timeout(_) => "timeout",
            Error::Storage(_) => "storage",
            _ => "internal",
        }
    }
}
