//! The turn orchestrator.
//!
//! One call to [`run_turn`] owns a full chat turn: sanitize, persist the
//! user message, pre-check, RAG, streamed generation, post-check, and
//! persistence of the audit artifacts.  Events flow to the caller over a
//! channel; the SSE handler relays them, the non-streaming handler
//! drains them.
//!
//! State machine:
//!
//! ```text
//! Received → Sanitized → PreChecked → (Blocked | Escalated | Generating)
//! Generating → Streaming → PostChecked → (Delivered | BlockedPost | EscalatedPost)
//! Any → Failed (transport or provider error) | Canceled (client gone)
//! ```

use std::time::Instant;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use pal_domain::conversation::{Conversation, Message, ModerationLog};
use pal_domain::error::{Error, Result};
use pal_domain::stream::{estimate_tokens, StreamEvent, Usage};
use pal_providers::CompletionRequest;
use pal_safety::{sanitize, Decision, EngineOutcome, ReasonSource};
use pal_retrieval::Retriever;

use crate::state::AppState;

use super::{build_prompt, guard_budget};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to one chat turn.  The conversation row is pre-loaded (and
/// ownership-checked) by the handler.
pub struct TurnInput {
    pub conversation: Conversation,
    pub session_id: Uuid,
    pub text: String,
}

/// Terminal description of a finished turn, shared by the `done` SSE
/// frame and the non-streaming response body.
#[derive(Debug, Clone)]
pub struct TurnSummary {
    pub user_message: Message,
    pub assistant_message: Message,
    pub blocked: bool,
    pub block_reason: Option<String>,
    /// True when the block came from the post-generation check (the SSE
    /// adapter emits a terminal `error` frame instead of `done`).
    pub post_check_blocked: bool,
    pub escalated: bool,
    pub moderation_skipped: bool,
}

/// Events emitted during a single turn.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// One streamed content chunk.
    Content { content: String },
    /// Terminal success (including pre-check blocks and escalations).
    Done(Box<TurnSummary>),
    /// Terminal failure.
    Error {
        message: String,
        code: &'static str,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State tracking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    Received,
    Sanitized,
    PreChecked,
    Blocked,
    Escalated,
    Generating,
    Streaming,
    PostChecked,
    Delivered,
    BlockedPost,
    EscalatedPost,
    Failed,
    Canceled,
}

struct TurnTracker(TurnState);

impl TurnTracker {
    fn advance(&mut self, next: TurnState) {
        tracing::debug!(from = ?self.0, to = ?next, "turn transition");
        self.0 = next;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one chat turn.  Returns the event receiver; the turn itself runs
/// on a spawned task and always terminates the channel with exactly one
/// `Done` or `Error` event (or silently on client cancellation).
pub fn run_turn(state: AppState, input: TurnInput) -> mpsc::Receiver<TurnEvent> {
    let (tx, rx) = mpsc::channel::<TurnEvent>(64);

    let span = tracing::info_span!(
        "turn",
        conversation_id = %input.conversation.id,
        session_id = %input.session_id,
    );
    tokio::spawn(
        async move {
            if let Err(e) = run_turn_inner(state, input, tx.clone()).await {
                let code = e.code();
                tracing::warn!(error = %e, code, "turn failed");
                let _ = tx
                    .send(TurnEvent::Error {
                        message: user_facing_message(&e),
                        code,
                    })
                    .await;
            }
        }
        .instrument(span),
    );

    rx
}

/// Client errors keep their text; provider/internal failures get a
/// neutral message.
fn user_facing_message(e: &Error) -> String {
    match e {
        Error::InputEmpty
        | Error::InputTooLong { .. }
        | Error::RateLimited
        | Error::ConfigUnavailable(_) => e.to_string(),
        Error::LlmUnavailable(_) | Error::LlmTimeout(_) => {
            "The assistant is temporarily unavailable — please try again.".to_string()
        }
        _ => "Something went wrong handling this message.".to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_turn_inner(
    state: AppState,
    input: TurnInput,
    tx: mpsc::Sender<TurnEvent>,
) -> Result<()> {
    let mut tracker = TurnTracker(TurnState::Received);
    let turn_started = Instant::now();
    let budgets = &state.config.safety.budgets;
    let conversation = input.conversation;

    // Serialize turns within the conversation.
    let _permit = state.turn_locks.acquire(conversation.id).await;

    let snapshot = state.policy.snapshot().await?;

    // ── 1. Sanitize ──────────────────────────────────────────────────
    let stage = Instant::now();
    let text = sanitize(&input.text, state.config.safety.max_input_chars)?;
    guard_budget("sanitize", stage, budgets.sanitize_ms)?;
    tracker.advance(TurnState::Sanitized);

    // ── 2. Persist the user message (tentatively unflagged) ─────────
    let user_message = Message::user(conversation.id, text.clone());
    state.store.insert_message(&user_message)?;

    // ── 3. Pre-LLM rule engine ───────────────────────────────────────
    let engine_deadline = std::time::Duration::from_millis(budgets.rule_engine_ms)
        + std::time::Duration::from_secs(state.config.moderation.timeout_secs);
    let pre = tokio::time::timeout(engine_deadline, state.engine.evaluate(&text, &snapshot))
        .await
        .map_err(|_| Error::StageTimeout {
            class: "rule_engine",
        })?;
    tracker.advance(TurnState::PreChecked);

    match &pre.decision {
        Decision::Block { category, .. } => {
            tracker.advance(TurnState::Blocked);
            let log = build_log(user_message.id, &pre, true);
            state
                .store
                .finalize_user_check(user_message.id, true, Some(&log))?;

            let mut refusal =
                Message::assistant(conversation.id, snapshot.refusal_message());
            refusal.flagged = true;
            refusal.response_time_ms = Some(turn_started.elapsed().as_millis() as i64);
            state.store.record_assistant_turn(&refusal, None, None)?;

            let mut user_message = user_message;
            user_message.flagged = true;
            let _ = tx
                .send(TurnEvent::Done(Box::new(TurnSummary {
                    user_message,
                    assistant_message: refusal,
                    blocked: true,
                    block_reason: Some(category.clone()),
                    post_check_blocked: false,
                    escalated: false,
                    moderation_skipped: pre.moderation_skipped,
                })))
                .await;
            return Ok(());
        }
        Decision::Escalate {
            category,
            response_template,
            ..
        } => {
            tracker.advance(TurnState::Escalated);
            let log = build_log(user_message.id, &pre, false);
            state
                .store
                .finalize_user_check(user_message.id, false, Some(&log))?;

            let mut reply = Message::assistant(conversation.id, response_template.clone());
            reply.response_time_ms = Some(turn_started.elapsed().as_millis() as i64);
            state
                .store
                .record_assistant_turn(&reply, None, Some(category.as_str()))?;

            let _ = tx
                .send(TurnEvent::Done(Box::new(TurnSummary {
                    user_message,
                    assistant_message: reply,
                    blocked: false,
                    block_reason: None,
                    post_check_blocked: false,
                    escalated: true,
                    moderation_skipped: pre.moderation_skipped,
                })))
                .await;
            return Ok(());
        }
        Decision::Warn { .. } | Decision::Flag { .. } | Decision::Allow => {
            let flagged = matches!(pre.decision, Decision::Flag { .. });
            let log = build_log(user_message.id, &pre, flagged);
            state
                .store
                .finalize_user_check(user_message.id, flagged, Some(&log))?;
        }
    }

    // ── 4. RAG context ───────────────────────────────────────────────
    let stage = Instant::now();
    let (k, budget_chars) = snapshot.rag_params((
        state.config.retrieval.k,
        state.config.retrieval.budget_chars,
    ));
    let retrieval_cfg = pal_domain::config::RetrievalConfig {
        k,
        budget_chars,
        weights: state.config.retrieval.weights,
    };
    let retrieval = Retriever::new(&retrieval_cfg).retrieve(&text, &snapshot.knowledge);
    guard_budget("rag", stage, budgets.rag_ms)?;

    // ── 5. Build the prompt ──────────────────────────────────────────
    let window = snapshot.history_window(state.config.safety.history_window);
    let history = state.store.recent_messages(conversation.id, window)?;
    let prompt = build_prompt(&snapshot, &retrieval.context_block, &history);

    // ── 6. Stream the completion ─────────────────────────────────────
    tracker.advance(TurnState::Generating);
    // The assistant message ID exists before the first chunk so the turn
    // is resumable by ID.
    let assistant_id = Uuid::new_v4();
    let buffer_full = snapshot.stream_buffer_full();
    let generation_started = Instant::now();

    let mut stream = state
        .completion
        .stream(CompletionRequest {
            messages: prompt,
            model: None,
            max_tokens: state.config.llm.max_tokens,
            temperature: state.config.llm.temperature,
        })
        .await?;
    tracker.advance(TurnState::Streaming);

    let overall_deadline = tokio::time::Instant::now()
        + std::time::Duration::from_secs(budgets.llm_overall_secs);
    let mut first_byte = true;
    let mut accumulated = String::new();
    let mut usage: Option<Usage> = None;

    loop {
        let next = if first_byte {
            let first_byte_budget =
                std::time::Duration::from_secs(budgets.llm_first_byte_secs);
            tokio::time::timeout(first_byte_budget, stream.next())
                .await
                .map_err(|_| Error::LlmTimeout("no first byte within budget".into()))?
        } else {
            tokio::time::timeout_at(overall_deadline, stream.next())
                .await
                .map_err(|_| Error::LlmTimeout("stream exceeded overall budget".into()))?
        };
        first_byte = false;

        match next {
            Some(Ok(StreamEvent::Token { text })) => {
                accumulated.push_str(&text);
                if !buffer_full {
                    if tx.send(TurnEvent::Content { content: text }).await.is_err() {
                        return cancel_turn(
                            &state,
                            &mut tracker,
                            conversation.id,
                            assistant_id,
                            accumulated,
                            generation_started,
                        );
                    }
                } else if tx.is_closed() {
                    return cancel_turn(
                        &state,
                        &mut tracker,
                        conversation.id,
                        assistant_id,
                        accumulated,
                        generation_started,
                    );
                }
            }
            Some(Ok(StreamEvent::Done { usage: u, .. })) => {
                usage = u;
            }
            Some(Err(e)) => {
                tracker.advance(TurnState::Failed);
                return Err(e);
            }
            None => break,
        }
    }

    // ── 7. Post-LLM rule engine ──────────────────────────────────────
    let post = tokio::time::timeout(
        engine_deadline,
        state.engine.evaluate(&accumulated, &snapshot),
    )
    .await
    .map_err(|_| Error::StageTimeout {
        class: "rule_engine",
    })?;
    tracker.advance(TurnState::PostChecked);

    let response_time_ms = generation_started.elapsed().as_millis() as i64;
    let token_count = usage
        .map(|u| u.output_tokens as i64)
        .unwrap_or_else(|| estimate_tokens(&accumulated) as i64);
    let moderation_skipped = pre.moderation_skipped || post.moderation_skipped;

    let mut assistant_message = Message::assistant(conversation.id, accumulated);
    assistant_message.id = assistant_id;
    assistant_message.response_time_ms = Some(response_time_ms);
    assistant_message.token_count = Some(token_count);

    let summary = match &post.decision {
        Decision::Block { category, .. } => {
            tracker.advance(TurnState::BlockedPost);
            // The streamed text is discarded from persistence and
            // replaced by the refusal.
            assistant_message.content = snapshot.refusal_message().to_string();
            assistant_message.flagged = true;
            let log = build_log(assistant_message.id, &post, true);
            state
                .store
                .record_assistant_turn(&assistant_message, Some(&log), None)?;
            TurnSummary {
                user_message,
                assistant_message,
                blocked: true,
                block_reason: Some(category.clone()),
                post_check_blocked: true,
                escalated: false,
                moderation_skipped,
            }
        }
        Decision::Escalate {
            category,
            response_template,
            ..
        } => {
            tracker.advance(TurnState::EscalatedPost);
            assistant_message.content = response_template.clone();
            let log = build_log(assistant_message.id, &post, false);
            state.store.record_assistant_turn(
                &assistant_message,
                Some(&log),
                Some(category.as_str()),
            )?;
            TurnSummary {
                user_message,
                assistant_message,
                blocked: false,
                block_reason: None,
                post_check_blocked: false,
                escalated: true,
                moderation_skipped,
            }
        }
        Decision::Warn { .. } | Decision::Flag { .. } | Decision::Allow => {
            let flagged = matches!(post.decision, Decision::Flag { .. });
            assistant_message.flagged = flagged;
            let log = build_log(assistant_message.id, &post, flagged);
            state
                .store
                .record_assistant_turn(&assistant_message, Some(&log), None)?;
            tracker.advance(TurnState::Delivered);
            TurnSummary {
                user_message,
                assistant_message,
                blocked: false,
                block_reason: None,
                post_check_blocked: false,
                escalated: false,
                moderation_skipped,
            }
        }
    };

    // In buffered mode the client saw nothing yet: deliver the final
    // (possibly rewritten) content as one chunk before the terminal
    // frame, unless the turn was post-blocked.
    if buffer_full && !summary.post_check_blocked {
        let _ = tx
            .send(TurnEvent::Content {
                content: summary.assistant_message.content.clone(),
            })
            .await;
    }

    let _ = tx.send(TurnEvent::Done(Box::new(summary))).await;
    Ok(())
}

/// Client disconnected mid-stream: abort generation (dropping the stream
/// cancels the upstream request) and persist whatever was buffered with
/// the `canceled` tag.
fn cancel_turn(
    state: &AppState,
    tracker: &mut TurnTracker,
    conversation_id: Uuid,
    assistant_id: Uuid,
    buffered: String,
    generation_started: Instant,
) -> Result<()> {
    tracker.advance(TurnState::Canceled);
    let mut message = Message::assistant(conversation_id, buffered);
    message.id = assistant_id;
    message.canceled = true;
    message.response_time_ms = Some(generation_started.elapsed().as_millis() as i64);
    message.token_count = Some(estimate_tokens(&message.content) as i64);
    state.store.record_assistant_turn(&message, None, None)?;
    tracing::info!(assistant_message_id = %assistant_id, "turn canceled by client");
    Ok(())
}

/// Build the audit record for one evaluation.
///
/// Moderation ran: local category flags + raw scores.  Moderation
/// skipped: the `moderation_skipped` marker.  Either way, pattern and
/// escalation reasons ride along as `rule:`/`escalation:` markers so the
/// log captures the complete reason list.
fn build_log(message_id: Uuid, outcome: &EngineOutcome, flagged: bool) -> ModerationLog {
    let mut log = match &outcome.moderation {
        Some(moderation) => ModerationLog::new(
            message_id,
            outcome.local_flags.clone(),
            moderation.scores.clone(),
            flagged,
        ),
        None => {
            let mut log = ModerationLog::skipped(message_id);
            log.flagged = flagged;
            log
        }
    };

    for reason in outcome.decision.reasons() {
        let prefix = match reason.source {
            ReasonSource::Pattern => "rule",
            ReasonSource::Escalation => "escalation",
            ReasonSource::Moderation => continue,
        };
        log.categories
            .insert(format!("{prefix}:{}", reason.category), true);
    }

    log
}
