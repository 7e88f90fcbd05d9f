//! Built-in policy defaults.
//!
//! Inserted `INSERT OR IGNORE` on first boot so a fresh database serves a
//! sensible safety posture, and also used verbatim as the degraded-mode
//! fallback snapshot when persistence is unreachable.

use rusqlite::params;
use serde_json::json;

use pal_domain::error::Result;
use pal_domain::policy::{
    EscalationSetting, ModerationSetting, RuleAction, RuleType, SafetyRule, SystemSetting,
};

use crate::store::{db_err, Store};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Default sets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RuleSeed {
    rule_type: RuleType,
    category: &'static str,
    value: &'static str,
    action: RuleAction,
    priority: i32,
    description: &'static str,
}

const RULE_SEEDS: &[RuleSeed] = &[
    RuleSeed {
        rule_type: RuleType::RegexPattern,
        category: "injection",
        value: r"ignore\s+(all\s+|previous\s+)*instructions",
        action: RuleAction::Block,
        priority: 100,
        description: "Prompt injection: instruction override",
    },
    RuleSeed {
        rule_type: RuleType::RegexPattern,
        category: "injection",
        value: r"(reveal|show|print|repeat)\s+(me\s+)?(your|the)\s+system\s+prompt",
        action: RuleAction::Block,
        priority: 100,
        description: "Prompt injection: system prompt exfiltration",
    },
    RuleSeed {
        rule_type: RuleType::RegexPattern,
        category: "injection",
        value: r"you\s+are\s+now\s+(in\s+)?(dan|developer)\s+mode",
        action: RuleAction::Block,
        priority: 90,
        description: "Prompt injection: jailbreak persona",
    },
    RuleSeed {
        rule_type: RuleType::RegexPattern,
        category: "injection",
        value: r"disregard\s+(your|all)\s+(guidelines|rules|training)",
        action: RuleAction::Block,
        priority: 90,
        description: "Prompt injection: guideline override",
    },
    RuleSeed {
        rule_type: RuleType::RegexPattern,
        category: "complaint",
        value: r"(demand|want)\s+(a\s+)?(full\s+)?refund\s+(now|immediately)",
        action: RuleAction::Escalate,
        priority: 50,
        description: "Urgent refund demands go to a human",
    },
    RuleSeed {
        rule_type: RuleType::BlockedKeyword,
        category: "profanity",
        value: "fuck",
        action: RuleAction::Flag,
        priority: 10,
        description: "Profanity is flagged for review, not blocked",
    },
    RuleSeed {
        rule_type: RuleType::BlockedKeyword,
        category: "profanity",
        value: "shit",
        action: RuleAction::Flag,
        priority: 10,
        description: "Profanity is flagged for review, not blocked",
    },
];

pub fn default_rules() -> Vec<SafetyRule> {
    RULE_SEEDS
        .iter()
        .enumerate()
        .map(|(i, seed)| SafetyRule {
            id: (i + 1) as i64,
            rule_type: seed.rule_type,
            category: seed.category.to_string(),
            value: seed.value.to_string(),
            action: seed.action,
            priority: seed.priority,
            enabled: true,
            description: Some(seed.description.to_string()),
        })
        .collect()
}

pub fn default_moderation_settings() -> Vec<ModerationSetting> {
    let mut settings = Vec::new();
    for category in ["harassment", "hate", "sexual", "violence"] {
        settings.push(ModerationSetting {
            category: category.to_string(),
            enabled: true,
            threshold: 0.7,
            action: RuleAction::Block,
        });
    }
    settings.push(ModerationSetting {
        category: "self-harm".to_string(),
        enabled: true,
        threshold: 0.5,
        action: RuleAction::Block,
    });
    settings.push(ModerationSetting {
        category: "self-harm/intent".to_string(),
        enabled: true,
        threshold: 0.3,
        action: RuleAction::Block,
    });
    settings
}

pub fn default_escalation_settings() -> Vec<EscalationSetting> {
    vec![
        EscalationSetting {
            category: "crisis".to_string(),
            enabled: true,
            keywords: [
                "end my life",
                "kill myself",
                "suicide",
                "hurt myself",
                "self harm",
                "want to die",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            response_template: "I'm really concerned about what you've shared. You deserve \
                                support from a real person right now — please reach out to a \
                                crisis line such as 988 (US) or your local emergency number. \
                                I've flagged this conversation so a human can follow up."
                .to_string(),
            priority: 100,
        },
        EscalationSetting {
            category: "legal".to_string(),
            enabled: true,
            keywords: ["lawsuit", "sue you", "my lawyer", "legal action", "attorney"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            response_template: "Thanks for letting us know. Questions involving legal matters \
                                are handled by our team directly — I've escalated this \
                                conversation and someone will be in touch."
                .to_string(),
            priority: 80,
        },
        EscalationSetting {
            category: "complaint".to_string(),
            enabled: true,
            keywords: [
                "speak to a manager",
                "file a complaint",
                "this is unacceptable",
                "worst service",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            response_template: "I'm sorry this hasn't gone well. I've escalated your complaint \
                                to our support team, and a person will review this conversation \
                                and get back to you."
                .to_string(),
            priority: 60,
        },
        EscalationSetting {
            category: "sentiment".to_string(),
            enabled: true,
            keywords: ["i hate this", "absolutely furious", "beyond frustrated"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            response_template: "I hear your frustration, and I'm sorry. I've asked a member of \
                                our team to take over this conversation personally."
                .to_string(),
            priority: 40,
        },
    ]
}

pub fn default_system_settings() -> Vec<SystemSetting> {
    vec![
        SystemSetting {
            key: "system_prompt".to_string(),
            value: json!(
                "You are a helpful, concise customer assistant. Answer from the provided \
                 context when it is relevant; say so when you do not know."
            ),
            description: Some("Base system prompt prepended to every completion".to_string()),
        },
        SystemSetting {
            key: "refusal_message".to_string(),
            value: json!("I can't help with that request."),
            description: Some("Fixed reply delivered when a message is blocked".to_string()),
        },
        SystemSetting {
            key: "rate_limit".to_string(),
            value: json!({ "max_messages": 10, "window_secs": 60 }),
            description: Some("Per-session sliding-window message limit".to_string()),
        },
        SystemSetting {
            key: "rag".to_string(),
            value: json!({ "k": 5, "budget_chars": 6000 }),
            description: Some("Retrieval limits for context injection".to_string()),
        },
        SystemSetting {
            key: "history_window".to_string(),
            value: json!(20),
            description: Some("Recent messages included in the LLM prompt".to_string()),
        },
        SystemSetting {
            key: "stream_buffer_full".to_string(),
            value: json!(false),
            description: Some(
                "Buffer the whole completion until the post-check passes instead of \
                 relaying chunks live"
                    .to_string(),
            ),
        },
        SystemSetting {
            key: "cache_ttl".to_string(),
            value: json!(300),
            description: Some("Policy snapshot TTL in seconds".to_string()),
        },
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Database seeding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Insert the default policy rows, skipping any that already exist.
pub(crate) fn seed_defaults(store: &Store) -> Result<()> {
    let mut conn = store.lock();
    let tx = conn.transaction().map_err(db_err)?;

    for rule in default_rules() {
        tx.execute(
            "INSERT OR IGNORE INTO safety_rules
             (rule_type, category, value, action, priority, enabled, description)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![
                rule.rule_type.as_str(),
                rule.category,
                rule.value,
                rule.action.as_str(),
                rule.priority,
                rule.description,
            ],
        )
        .map_err(db_err)?;
    }

    for setting in default_moderation_settings() {
        tx.execute(
            "INSERT OR IGNORE INTO moderation_settings (category, enabled, threshold, action)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                setting.category,
                setting.enabled as i64,
                setting.threshold,
                setting.action.as_str(),
            ],
        )
        .map_err(db_err)?;
    }

    for setting in default_escalation_settings() {
        tx.execute(
            "INSERT OR IGNORE INTO escalation_settings
             (category, enabled, keywords, response_template, priority)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                setting.category,
                setting.enabled as i64,
                serde_json::to_string(&setting.keywords).unwrap_or_else(|_| "[]".into()),
                setting.response_template,
                setting.priority,
            ],
        )
        .map_err(db_err)?;
    }

    for setting in default_system_settings() {
        tx.execute(
            "INSERT OR IGNORE INTO system_settings (key, value, description)
             VALUES (?1, ?2, ?3)",
            params![
                setting.key,
                serde_json::to_string(&setting.value).unwrap_or_else(|_| "null".into()),
                setting.description,
            ],
        )
        .map_err(db_err)?;
    }

    tx.commit().map_err(db_err)?;
    tracing::debug!("policy seed defaults ensured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let before = store.list_rules().unwrap().len();
        seed_defaults(&store).unwrap();
        assert_eq!(store.list_rules().unwrap().len(), before);
    }

    #[test]
    fn seed_rules_all_compile() {
        for rule in default_rules() {
            if rule.rule_type == RuleType::RegexPattern {
                assert!(
                    regex::Regex::new(&rule.value).is_ok(),
                    "seed regex must compile: {}",
                    rule.value
                );
            }
        }
    }

    #[test]
    fn escalation_defaults_are_priority_ordered() {
        let settings = default_escalation_settings();
        assert_eq!(settings[0].category, "crisis");
        assert!(settings.windows(2).all(|w| w[0].priority >= w[1].priority));
    }
}
