//! Turn execution: per-conversation locks, rate limiting, and the
//! orchestrator that drives one user message through the safety
//! pipeline.

pub mod conversation_lock;
pub mod rate_limit;
pub mod turn;

pub use turn::{run_turn, TurnEvent, TurnInput, TurnSummary};

use std::time::Instant;

use pal_domain::conversation::{Message, Role};
use pal_domain::error::{Error, Result};
use pal_providers::PromptMessage;
use pal_safety::Snapshot;

/// Fail the turn when a synchronous stage overran its budget.
pub(crate) fn guard_budget(
    class: &'static str,
    started: Instant,
    budget_ms: u64,
) -> Result<()> {
    if started.elapsed().as_millis() as u64 > budget_ms {
        return Err(Error::StageTimeout { class });
    }
    Ok(())
}

/// Assemble the completion prompt: system prompt, optional RAG context,
/// then the recent conversation window (which already ends with the
/// current user message).
pub(crate) fn build_prompt(
    snapshot: &Snapshot,
    context_block: &str,
    history: &[Message],
) -> Vec<PromptMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(PromptMessage::system(snapshot.system_prompt()));

    if !context_block.is_empty() {
        messages.push(PromptMessage::system(format!(
            "Ground your answers in the following support articles when they are relevant:\n\n{context_block}"
        )));
    }

    for message in history {
        match message.role {
            Role::User => messages.push(PromptMessage::user(message.content.clone())),
            Role::Assistant => messages.push(PromptMessage::assistant(message.content.clone())),
            Role::System => {}
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use pal_safety::{snapshot_from_parts, RegexCache, SnapshotSource};
    use uuid::Uuid;

    #[test]
    fn prompt_carries_system_context_and_history() {
        let snapshot = snapshot_from_parts(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            &RegexCache::new(),
            SnapshotSource::Store,
        );
        let conversation = Uuid::new_v4();
        let history = vec![
            Message::user(conversation, "earlier question"),
            Message::assistant(conversation, "earlier answer"),
            Message::user(conversation, "current question"),
        ];

        let prompt = build_prompt(&snapshot, "### Doc\nbody\n\n", &history);
        assert_eq!(prompt.len(), 5);
        assert_eq!(prompt[0].role, Role::System);
        assert!(prompt[1].content.contains("### Doc"));
        assert_eq!(prompt[4].content, "current question");
    }

    #[test]
    fn empty_context_block_is_omitted() {
        let snapshot = snapshot_from_parts(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            &RegexCache::new(),
            SnapshotSource::Store,
        );
        let prompt = build_prompt(&snapshot, "", &[]);
        assert_eq!(prompt.len(), 1);
    }
}
