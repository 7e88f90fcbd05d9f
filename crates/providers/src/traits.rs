use std::collections::HashMap;

use pal_domain::conversation::Role;
use pal_domain::error::Result;
use pal_domain::stream::{BoxStream, StreamEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One prompt entry: system prompt, RAG context (as a system message),
/// history, or the current user message.
#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A provider-agnostic completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<PromptMessage>,
    /// Model override; `None` uses the provider default.
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A streaming LLM completion provider.
///
/// Implementations translate between our internal types and the wire
/// format of the provider's HTTP API.  Tests substitute deterministic
/// fakes.
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Open a completion in streaming mode.  The stream yields text
    /// chunks and ends with exactly one `Done` event (carrying usage
    /// when the provider reports it).
    async fn stream(
        &self,
        req: CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}

/// Raw category scoring from a hosted moderation service.
///
/// The category set is open: unknown categories are carried through and
/// simply find no threshold during local policy application.
#[derive(Debug, Clone, Default)]
pub struct ModerationOutcome {
    /// Provider-reported flagged bit per category.
    pub flags: HashMap<String, bool>,
    /// Scores per category, finite, in `[0, 1]`.
    pub scores: HashMap<String, f64>,
}

/// A hosted content-moderation provider.
#[async_trait::async_trait]
pub trait ModerationProvider: Send + Sync {
    async fn moderate(&self, text: &str) -> Result<ModerationOutcome>;

    fn provider_id(&self) -> &str;
}
