//! Configuration entities owned by the admin surface: safety rules,
//! moderation thresholds, escalation categories, system settings, and the
//! knowledge corpus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rule vocabulary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// `value` is a raw regex, evaluated case-insensitively.
    RegexPattern,
    /// `value` is a literal matched as a case-insensitive substring.
    BlockedKeyword,
    /// Like `BlockedKeyword` but conventionally paired with `escalate`.
    EscalationKeyword,
    /// Informational only; carries no matching semantics.
    AllowedTopic,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::RegexPattern => "regex_pattern",
            RuleType::BlockedKeyword => "blocked_keyword",
            RuleType::EscalationKeyword => "escalation_keyword",
            RuleType::AllowedTopic => "allowed_topic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "regex_pattern" => Some(RuleType::RegexPattern),
            "blocked_keyword" => Some(RuleType::BlockedKeyword),
            "escalation_keyword" => Some(RuleType::EscalationKeyword),
            "allowed_topic" => Some(RuleType::AllowedTopic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Block,
    Escalate,
    Flag,
    Warn,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Block => "block",
            RuleAction::Escalate => "escalate",
            RuleAction::Flag => "flag",
            RuleAction::Warn => "warn",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "block" => Some(RuleAction::Block),
            "escalate" => Some(RuleAction::Escalate),
            "flag" => Some(RuleAction::Flag),
            "warn" => Some(RuleAction::Warn),
            _ => None,
        }
    }
}

/// How urgent an escalation hand-off is, derived from its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Normal,
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// Category → urgency mapping.
    pub fn for_category(category: &str) -> Self {
        match category {
            "crisis" => Urgency::Critical,
            "legal" => Urgency::High,
            "complaint" | "sentiment" => Urgency::Medium,
            _ => Urgency::Normal,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persisted policy rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyRule {
    pub id: i64,
    pub rule_type: RuleType,
    pub category: String,
    /// Regex source or literal keyword, depending on `rule_type`.
    pub value: String,
    pub action: RuleAction,
    /// Higher priority matches are reported (and win ties) first.
    pub priority: i32,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationSetting {
    pub category: String,
    pub enabled: bool,
    /// Local override for the provider's flagged bit: a score at or above
    /// this value flags the category.  Lowering it strictly widens matches.
    pub threshold: f64,
    pub action: RuleAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationSetting {
    pub category: String,
    pub enabled: bool,
    pub keywords: Vec<String>,
    /// Canned assistant reply delivered verbatim on escalation.
    pub response_template: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSetting {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Knowledge corpus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeDoc {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub content: String,
    pub keywords: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Post-parse contract for one bulk-imported knowledge entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeImport {
    pub title: String,
    pub category: String,
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}
