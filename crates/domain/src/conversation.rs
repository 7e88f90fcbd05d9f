//! Persisted chat entities: sessions, conversations, messages, and
//! per-message moderation audit records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session / Conversation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A client-identified request-origin scope.  The ID is minted by the
/// client (a UUID in the `X-Session-Id` header); the server only records
/// first/last contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub session_id: Uuid,
    /// Latches true once a turn escalates; never reset.
    pub escalated: bool,
    pub escalation_category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single utterance within a conversation.  Immutable once written,
/// except that a post-generation safety check may overwrite the content
/// of an assistant message before the turn completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    pub flagged: bool,
    /// Set when the client disconnected mid-stream and only the buffered
    /// prefix was persisted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub canceled: bool,
    /// Wall-clock generation time; assistant messages only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<i64>,
    /// Completion token count; assistant messages only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A fresh user message, unflagged.  The ID is assigned here, before
    /// any LLM I/O, so downstream stages can reference it.
    pub fn user(conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::User, content)
    }

    pub fn assistant(conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::Assistant, content)
    }

    fn new(conversation_id: Uuid, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            role,
            content: content.into(),
            flagged: false,
            canceled: false,
            response_time_ms: None,
            token_count: None,
            created_at: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Moderation audit record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append-only audit record for one safety evaluation of one message.
///
/// `categories` holds the locally-thresholded flag per category plus any
/// audit markers (e.g. `moderation_skipped`); `scores` holds the raw
/// provider scores, all finite in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationLog {
    pub id: Uuid,
    pub message_id: Uuid,
    pub categories: HashMap<String, bool>,
    pub scores: HashMap<String, f64>,
    pub flagged: bool,
    pub created_at: DateTime<Utc>,
}

impl ModerationLog {
    pub fn new(
        message_id: Uuid,
        categories: HashMap<String, bool>,
        scores: HashMap<String, f64>,
        flagged: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_id,
            categories,
            scores,
            flagged,
            created_at: Utc::now(),
        }
    }

    /// Marker record written when the moderation layer was skipped
    /// (provider outage).
    pub fn skipped(message_id: Uuid) -> Self {
        let mut categories = HashMap::new();
        categories.insert("moderation_skipped".to_string(), true);
        Self::new(message_id, categories, HashMap::new(), false)
    }
}
