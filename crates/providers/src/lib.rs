//! Narrow adapters to the hosted LLM services Palisade depends on: a
//! streaming chat-completion provider and a content-moderation provider,
//! both speaking the OpenAI-compatible wire format.

pub mod completion;
pub mod moderation;
pub mod traits;

pub(crate) mod sse;

pub use completion::ChatCompletionsProvider;
pub use moderation::{HostedModerationProvider, ScriptedModerationProvider};
pub use traits::{
    CompletionProvider, CompletionRequest, ModerationOutcome, ModerationProvider, PromptMessage,
};
