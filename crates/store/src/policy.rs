//! Policy-table queries: safety rules, moderation/escalation/system
//! settings, and the knowledge corpus.
//!
//! The admin API is the only writer; the policy cache reads everything in
//! one transaction via [`Store::load_policy_bundle`].

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use pal_domain::error::{Error, Result};
use pal_domain::policy::{
    EscalationSetting, KnowledgeDoc, KnowledgeImport, ModerationSetting, RuleAction, RuleType,
    SafetyRule, SystemSetting,
};

use crate::store::{db_err, fmt_ts, parse_json, parse_ts, Store};

/// Everything the policy cache loads in one refresh.
#[derive(Debug, Clone, Default)]
pub struct PolicyBundle {
    pub rules: Vec<SafetyRule>,
    pub moderation: Vec<ModerationSetting>,
    pub escalation: Vec<EscalationSetting>,
    pub system: Vec<SystemSetting>,
    pub knowledge: Vec<KnowledgeDoc>,
}

/// Mutable fields of a safety rule (everything but the id).
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDraft {
    pub rule_type: RuleType,
    pub category: String,
    pub value: String,
    pub action: RuleAction,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
}

fn d_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<SafetyRule> {
    let rule_type: String = row.get(1)?;
    let action: String = row.get(4)?;
    Ok(SafetyRule {
        id: row.get(0)?,
        rule_type: RuleType::parse(&rule_type).unwrap_or(RuleType::BlockedKeyword),
        category: row.get(2)?,
        value: row.get(3)?,
        action: RuleAction::parse(&action).unwrap_or(RuleAction::Flag),
        priority: row.get(5)?,
        enabled: row.get::<_, i64>(6)? != 0,
        description: row.get(7)?,
    })
}

const RULE_COLS: &str = "id, rule_type, category, value, action, priority, enabled, description";

fn moderation_from_row(row: &Row<'_>) -> rusqlite::Result<ModerationSetting> {
    let action: String = row.get(3)?;
    Ok(ModerationSetting {
        category: row.get(0)?,
        enabled: row.get::<_, i64>(1)? != 0,
        threshold: row.get(2)?,
        action: RuleAction::parse(&action).unwrap_or(RuleAction::Flag),
    })
}

fn escalation_from_row(row: &Row<'_>) -> rusqlite::Result<EscalationSetting> {
    let keywords: String = row.get(2)?;
    Ok(EscalationSetting {
        category: row.get(0)?,
        enabled: row.get::<_, i64>(1)? != 0,
        keywords: parse_json(&keywords),
        response_template: row.get(3)?,
        priority: row.get(4)?,
    })
}

fn system_from_row(row: &Row<'_>) -> rusqlite::Result<SystemSetting> {
    let value: String = row.get(1)?;
    Ok(SystemSetting {
        key: row.get(0)?,
        value: serde_json::from_str(&value).unwrap_or(serde_json::Value::Null),
        description: row.get(2)?,
    })
}

fn knowledge_from_row(row: &Row<'_>) -> rusqlite::Result<KnowledgeDoc> {
    let keywords: String = row.get(4)?;
    Ok(KnowledgeDoc {
        id: row.get(0)?,
        title: row.get(1)?,
        category: row.get(2)?,
        content: row.get(3)?,
        keywords: parse_json(&keywords),
        updated_at: parse_ts(5, row.get(5)?)?,
    })
}

const KNOWLEDGE_COLS: &str = "id, title, category, content, keywords, updated_at";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bundle load (cache refresh path)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Store {
    /// Load every policy set in a single read transaction so the cache
    /// publishes a mutually-consistent snapshot.
    pub fn load_policy_bundle(&self) -> Result<PolicyBundle> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let rules = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {RULE_COLS} FROM safety_rules ORDER BY priority DESC, id"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], rule_from_row)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            rows
        };

        let moderation = {
            let mut stmt = tx
                .prepare(
                    "SELECT category, enabled, threshold, action
                     FROM moderation_settings ORDER BY category",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], moderation_from_row)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            rows
        };

        let escalation = {
            let mut stmt = tx
                .prepare(
                    "SELECT category, enabled, keywords, response_template, priority
                     FROM escalation_settings ORDER BY priority DESC, category",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], escalation_from_row)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            rows
        };

        let system = {
            let mut stmt = tx
                .prepare("SELECT key, value, description FROM system_settings ORDER BY key")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], system_from_row)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            rows
        };

        let knowledge = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {KNOWLEDGE_COLS} FROM knowledge_documents ORDER BY updated_at DESC, id"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], knowledge_from_row)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            rows
        };

        tx.commit().map_err(db_err)?;

        Ok(PolicyBundle {
            rules,
            moderation,
            escalation,
            system,
            knowledge,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Safety rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Store {
    pub fn list_rules(&self) -> Result<Vec<SafetyRule>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RULE_COLS} FROM safety_rules ORDER BY priority DESC, id"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], rule_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn get_rule(&self, id: i64) -> Result<Option<SafetyRule>> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {RULE_COLS} FROM safety_rules WHERE id = ?1"),
            params![id],
            rule_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn insert_rule(&self, draft: &RuleDraft) -> Result<SafetyRule> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO safety_rules (rule_type, category, value, action, priority, enabled, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                draft.rule_type.as_str(),
                draft.category,
                draft.value,
                draft.action.as_str(),
                draft.priority,
                draft.enabled as i64,
                draft.description,
            ],
        )
        .map_err(db_err)?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {RULE_COLS} FROM safety_rules WHERE id = ?1"),
            params![id],
            rule_from_row,
        )
        .map_err(db_err)
    }

    pub fn update_rule(&self, id: i64, draft: &RuleDraft) -> Result<Option<SafetyRule>> {
        let conn = self.lock();
        let changed = conn
            .execute(
                "UPDATE safety_rules
                 SET rule_type = ?2, category = ?3, value = ?4, action = ?5,
                     priority = ?6, enabled = ?7, description = ?8
                 WHERE id = ?1",
                params![
                    id,
                    draft.rule_type.as_str(),
                    draft.category,
                    draft.value,
                    draft.action.as_str(),
                    draft.priority,
                    draft.enabled as i64,
                    draft.description,
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Ok(None);
        }
        conn.query_row(
            &format!("SELECT {RULE_COLS} FROM safety_rules WHERE id = ?1"),
            params![id],
            rule_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn delete_rule(&self, id: i64) -> Result<bool> {
        let conn = self.lock();
        let changed = conn
            .execute("DELETE FROM safety_rules WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(changed > 0)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Moderation / escalation / system settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Store {
    pub fn list_moderation_settings(&self) -> Result<Vec<ModerationSetting>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT category, enabled, threshold, action
                 FROM moderation_settings ORDER BY category",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], moderation_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn get_moderation_setting(&self, category: &str) -> Result<Option<ModerationSetting>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT category, enabled, threshold, action
             FROM moderation_settings WHERE category = ?1",
            params![category],
            moderation_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn upsert_moderation_setting(&self, setting: &ModerationSetting) -> Result<()> {
        if !(0.0..=1.0).contains(&setting.threshold) || !setting.threshold.is_finite() {
            return Err(Error::Config(format!(
                "threshold {} out of range [0, 1]",
                setting.threshold
            )));
        }
        let conn = self.lock();
        conn.execute(
            "INSERT INTO moderation_settings (category, enabled, threshold, action)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(category) DO UPDATE
             SET enabled = ?2, threshold = ?3, action = ?4",
            params![
                setting.category,
                setting.enabled as i64,
                setting.threshold,
                setting.action.as_str(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn list_escalation_settings(&self) -> Result<Vec<EscalationSetting>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT category, enabled, keywords, response_template, priority
                 FROM escalation_settings ORDER BY priority DESC, category",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], escalation_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn get_escalation_setting(&self, category: &str) -> Result<Option<EscalationSetting>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT category, enabled, keywords, response_template, priority
             FROM escalation_settings WHERE category = ?1",
            params![category],
            escalation_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn upsert_escalation_setting(&self, setting: &EscalationSetting) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO escalation_settings (category, enabled, keywords, response_template, priority)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(category) DO UPDATE
             SET enabled = ?2, keywords = ?3, response_template = ?4, priority = ?5",
            params![
                setting.category,
                setting.enabled as i64,
                serde_json::to_string(&setting.keywords).unwrap_or_else(|_| "[]".into()),
                setting.response_template,
                setting.priority,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn list_system_settings(&self) -> Result<Vec<SystemSetting>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT key, value, description FROM system_settings ORDER BY key")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], system_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn get_system_setting(&self, key: &str) -> Result<Option<SystemSetting>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT key, value, description FROM system_settings WHERE key = ?1",
            params![key],
            system_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn upsert_system_setting(&self, setting: &SystemSetting) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO system_settings (key, value, description)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE
             SET value = ?2,
                 description = COALESCE(?3, system_settings.description)",
            params![
                setting.key,
                serde_json::to_string(&setting.value).unwrap_or_else(|_| "null".into()),
                setting.description,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Knowledge corpus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Store {
    pub fn list_knowledge(&self) -> Result<Vec<KnowledgeDoc>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {KNOWLEDGE_COLS} FROM knowledge_documents ORDER BY updated_at DESC, id"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], knowledge_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn get_knowledge(&self, id: i64) -> Result<Option<KnowledgeDoc>> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {KNOWLEDGE_COLS} FROM knowledge_documents WHERE id = ?1"),
            params![id],
            knowledge_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn insert_knowledge(&self, entry: &KnowledgeImport) -> Result<KnowledgeDoc> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO knowledge_documents (title, category, content, keywords, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.title,
                entry.category,
                entry.content,
                serde_json::to_string(&entry.keywords).unwrap_or_else(|_| "[]".into()),
                fmt_ts(&Utc::now()),
            ],
        )
        .map_err(db_err)?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {KNOWLEDGE_COLS} FROM knowledge_documents WHERE id = ?1"),
            params![id],
            knowledge_from_row,
        )
        .map_err(db_err)
    }

    pub fn update_knowledge(&self, id: i64, entry: &KnowledgeImport) -> Result<Option<KnowledgeDoc>> {
        let conn = self.lock();
        let changed = conn
            .execute(
                "UPDATE knowledge_documents
                 SET title = ?2, category = ?3, content = ?4, keywords = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    id,
                    entry.title,
                    entry.category,
                    entry.content,
                    serde_json::to_string(&entry.keywords).unwrap_or_else(|_| "[]".into()),
                    fmt_ts(&Utc::now()),
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Ok(None);
        }
        conn.query_row(
            &format!("SELECT {KNOWLEDGE_COLS} FROM knowledge_documents WHERE id = ?1"),
            params![id],
            knowledge_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn delete_knowledge(&self, id: i64) -> Result<bool> {
        let conn = self.lock();
        let changed = conn
            .execute("DELETE FROM knowledge_documents WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Delete many documents in one transaction; returns how many rows
    /// actually existed.
    pub fn delete_knowledge_bulk(&self, ids: &[i64]) -> Result<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let mut deleted = 0;
        for id in ids {
            deleted += tx
                .execute("DELETE FROM knowledge_documents WHERE id = ?1", params![id])
                .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(deleted)
    }
}
