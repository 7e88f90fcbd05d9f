//! Chat-side queries: sessions, conversations, messages, moderation logs.
//!
//! The orchestrator is the only writer of conversations and messages; the
//! paired writes it needs (message + moderation log, assistant message +
//! escalation latch) are wrapped in explicit transactions here.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row, Transaction};
use uuid::Uuid;

use pal_domain::conversation::{Conversation, Message, ModerationLog, Role, Session};
use pal_domain::error::Result;

use crate::store::{db_err, fmt_ts, parse_json, parse_ts, parse_uuid, Store};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Store {
    /// Record contact from a session: insert on first sight, bump
    /// `last_seen` otherwise.
    pub fn touch_session(&self, id: Uuid) -> Result<Session> {
        let conn = self.lock();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO sessions (id, first_seen, last_seen) VALUES (?1, ?2, ?2)
             ON CONFLICT(id) DO UPDATE SET last_seen = ?2",
            params![id.to_string(), fmt_ts(&now)],
        )
        .map_err(db_err)?;

        conn.query_row(
            "SELECT id, first_seen, last_seen FROM sessions WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok(Session {
                    id: parse_uuid(0, row.get(0)?)?,
                    first_seen: parse_ts(1, row.get(1)?)?,
                    last_seen: parse_ts(2, row.get(2)?)?,
                })
            },
        )
        .map_err(db_err)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: parse_uuid(0, row.get(0)?)?,
        session_id: parse_uuid(1, row.get(1)?)?,
        escalated: row.get::<_, i64>(2)? != 0,
        escalation_category: row.get(3)?,
        created_at: parse_ts(4, row.get(4)?)?,
        updated_at: parse_ts(5, row.get(5)?)?,
    })
}

const CONVERSATION_COLS: &str =
    "id, session_id, escalated, escalation_category, created_at, updated_at";

impl Store {
    pub fn create_conversation(&self, session_id: Uuid) -> Result<Conversation> {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            session_id,
            escalated: false,
            escalation_category: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let conn = self.lock();
        conn.execute(
            "INSERT INTO conversations (id, session_id, escalated, escalation_category, created_at, updated_at)
             VALUES (?1, ?2, 0, NULL, ?3, ?3)",
            params![
                conversation.id.to_string(),
                session_id.to_string(),
                fmt_ts(&conversation.created_at),
            ],
        )
        .map_err(db_err)?;
        Ok(conversation)
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE id = ?1"),
            params![id.to_string()],
            conversation_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    /// Paginated conversations for one session, newest first.
    pub fn list_conversations(
        &self,
        session_id: Uuid,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<Conversation>, u64)> {
        let conn = self.lock();
        let total: u64 = conn
            .query_row(
                "SELECT COUNT(*) FROM conversations WHERE session_id = ?1",
                params![session_id.to_string()],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CONVERSATION_COLS} FROM conversations
                 WHERE session_id = ?1
                 ORDER BY updated_at DESC, id
                 LIMIT ?2 OFFSET ?3"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![
                    session_id.to_string(),
                    limit as i64,
                    (page.saturating_sub(1) * limit) as i64
                ],
                conversation_from_row,
            )
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok((rows, total))
    }

    /// Escalated conversations, most recently updated first.
    pub fn list_escalations(
        &self,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<Conversation>, u64)> {
        let conn = self.lock();
        let total: u64 = conn
            .query_row(
                "SELECT COUNT(*) FROM conversations WHERE escalated = 1",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CONVERSATION_COLS} FROM conversations
                 WHERE escalated = 1
                 ORDER BY updated_at DESC, id
                 LIMIT ?1 OFFSET ?2"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![limit as i64, (page.saturating_sub(1) * limit) as i64],
                conversation_from_row,
            )
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok((rows, total))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    Ok(Message {
        id: parse_uuid(0, row.get(0)?)?,
        conversation_id: parse_uuid(1, row.get(1)?)?,
        role: Role::parse(&role).unwrap_or(Role::System),
        content: row.get(3)?,
        flagged: row.get::<_, i64>(4)? != 0,
        canceled: row.get::<_, i64>(5)? != 0,
        response_time_ms: row.get(6)?,
        token_count: row.get(7)?,
        created_at: parse_ts(8, row.get(8)?)?,
    })
}

const MESSAGE_COLS: &str =
    "id, conversation_id, role, content, flagged, canceled, response_time_ms, token_count, created_at";

fn insert_message_tx(tx: &Transaction<'_>, message: &Message) -> rusqlite::Result<()> {
    tx.execute(
        &format!(
            "INSERT INTO messages ({MESSAGE_COLS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ),
        params![
            message.id.to_string(),
            message.conversation_id.to_string(),
            message.role.as_str(),
            message.content,
            message.flagged as i64,
            message.canceled as i64,
            message.response_time_ms,
            message.token_count,
            fmt_ts(&message.created_at),
        ],
    )?;
    tx.execute(
        "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
        params![message.conversation_id.to_string(), fmt_ts(&Utc::now())],
    )?;
    Ok(())
}

fn insert_log_tx(tx: &Transaction<'_>, log: &ModerationLog) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO moderation_logs (id, message_id, categories, scores, flagged, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            log.id.to_string(),
            log.message_id.to_string(),
            serde_json::to_string(&log.categories).unwrap_or_else(|_| "{}".into()),
            serde_json::to_string(&log.scores).unwrap_or_else(|_| "{}".into()),
            log.flagged as i64,
            fmt_ts(&log.created_at),
        ],
    )?;
    Ok(())
}

impl Store {
    /// Persist a freshly-received user message (tentatively unflagged).
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(db_err)?;
        insert_message_tx(&tx, message).map_err(db_err)?;
        tx.commit().map_err(db_err)
    }

    /// Atomically record the pre-check outcome for a user message: the
    /// flag update and the moderation log commit together.
    pub fn finalize_user_check(
        &self,
        message_id: Uuid,
        flagged: bool,
        log: Option<&ModerationLog>,
    ) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "UPDATE messages SET flagged = ?2 WHERE id = ?1",
            params![message_id.to_string(), flagged as i64],
        )
        .map_err(db_err)?;
        if let Some(log) = log {
            insert_log_tx(&tx, log).map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }

    /// Atomically persist the terminal state of a turn's assistant side:
    /// the assistant message, its moderation log, and (when the turn
    /// escalated) the conversation's escalation latch.
    ///
    /// The latch only moves false→true; the category set by the first
    /// escalation is preserved.
    pub fn record_assistant_turn(
        &self,
        message: &Message,
        log: Option<&ModerationLog>,
        escalation_category: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(db_err)?;
        insert_message_tx(&tx, message).map_err(db_err)?;
        if let Some(log) = log {
            insert_log_tx(&tx, log).map_err(db_err)?;
        }
        if let Some(category) = escalation_category {
            tx.execute(
                "UPDATE conversations
                 SET escalated = 1, escalation_category = ?2, updated_at = ?3
                 WHERE id = ?1 AND escalated = 0",
                params![
                    message.conversation_id.to_string(),
                    category,
                    fmt_ts(&Utc::now())
                ],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }

    /// All messages of a conversation in insertion order (created_at,
    /// ties broken by id).
    pub fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLS} FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at, id"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![conversation_id.to_string()], message_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    /// The most recent `n` messages, returned in chronological order.
    pub fn recent_messages(&self, conversation_id: Uuid, n: usize) -> Result<Vec<Message>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLS} FROM (
                     SELECT {MESSAGE_COLS} FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?2
                 ) ORDER BY created_at, id"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![conversation_id.to_string(), n as i64],
                message_from_row,
            )
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"),
            params![id.to_string()],
            message_from_row,
        )
        .optional()
        .map_err(db_err)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Moderation logs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<ModerationLog> {
    let categories: String = row.get(2)?;
    let scores: String = row.get(3)?;
    Ok(ModerationLog {
        id: parse_uuid(0, row.get(0)?)?,
        message_id: parse_uuid(1, row.get(1)?)?,
        categories: parse_json(&categories),
        scores: parse_json(&scores),
        flagged: row.get::<_, i64>(4)? != 0,
        created_at: parse_ts(5, row.get(5)?)?,
    })
}

impl Store {
    pub fn list_moderation_logs(
        &self,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<ModerationLog>, u64)> {
        let conn = self.lock();
        let total: u64 = conn
            .query_row("SELECT COUNT(*) FROM moderation_logs", [], |row| row.get(0))
            .map_err(db_err)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, message_id, categories, scores, flagged, created_at
                 FROM moderation_logs
                 ORDER BY created_at DESC, id
                 LIMIT ?1 OFFSET ?2",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![limit as i64, (page.saturating_sub(1) * limit) as i64],
                log_from_row,
            )
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok((rows, total))
    }

    pub fn logs_for_message(&self, message_id: Uuid) -> Result<Vec<ModerationLog>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, message_id, categories, scores, flagged, created_at
                 FROM moderation_logs WHERE message_id = ?1 ORDER BY created_at",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![message_id.to_string()], log_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn store_with_conversation() -> (Store, Conversation) {
        let store = Store::open_in_memory().unwrap();
        let session = Uuid::new_v4();
        store.touch_session(session).unwrap();
        let conversation = store.create_conversation(session).unwrap();
        (store, conversation)
    }

    #[test]
    fn session_first_seen_is_stable() {
        let store = Store::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        let first = store.touch_session(id).unwrap();
        let second = store.touch_session(id).unwrap();
        assert_eq!(first.first_seen, second.first_seen);
        assert!(second.last_seen >= first.last_seen);
    }

    #[test]
    fn messages_keep_insertion_order() {
        let (store, conversation) = store_with_conversation();
        for i in 0..5 {
            store
                .insert_message(&Message::user(conversation.id, format!("m{i}")))
                .unwrap();
        }
        let messages = store.list_messages(conversation.id).unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn recent_messages_returns_chronological_tail() {
        let (store, conversation) = store_with_conversation();
        for i in 0..6 {
            store
                .insert_message(&Message::user(conversation.id, format!("m{i}")))
                .unwrap();
        }
        let recent = store.recent_messages(conversation.id, 3).unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4", "m5"]);
    }

    #[test]
    fn escalation_latch_never_resets() {
        let (store, conversation) = store_with_conversation();

        let reply = Message::assistant(conversation.id, "please hold for a specialist");
        store
            .record_assistant_turn(&reply, None, Some("crisis"))
            .unwrap();

        // A later escalation in a different category must not overwrite
        // the original latch.
        let later = Message::assistant(conversation.id, "second reply");
        store
            .record_assistant_turn(&later, None, Some("legal"))
            .unwrap();

        let loaded = store.get_conversation(conversation.id).unwrap().unwrap();
        assert!(loaded.escalated);
        assert_eq!(loaded.escalation_category.as_deref(), Some("crisis"));
    }

    #[test]
    fn finalize_pairs_flag_and_log() {
        let (store, conversation) = store_with_conversation();
        let message = Message::user(conversation.id, "hello");
        store.insert_message(&message).unwrap();

        let mut scores = HashMap::new();
        scores.insert("harassment".to_string(), 0.91);
        let mut categories = HashMap::new();
        categories.insert("harassment".to_string(), true);
        let log = ModerationLog::new(message.id, categories, scores, true);

        store
            .finalize_user_check(message.id, true, Some(&log))
            .unwrap();

        let loaded = store.get_message(message.id).unwrap().unwrap();
        assert!(loaded.flagged);
        let logs = store.logs_for_message(message.id).unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].flagged);
        assert_eq!(logs[0].scores.get("harassment"), Some(&0.91));
    }

    #[test]
    fn conversation_listing_scoped_to_session() {
        let store = Store::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.touch_session(a).unwrap();
        store.touch_session(b).unwrap();
        store.create_conversation(a).unwrap();
        store.create_conversation(a).unwrap();
        store.create_conversation(b).unwrap();

        let (list, total) = store.list_conversations(a, 1, 10).unwrap();
        assert_eq!(total, 2);
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|c| c.session_id == a));
    }
}
