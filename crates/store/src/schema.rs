//! SQLite DDL for the Palisade database.
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation.

use rusqlite::Connection;

/// Complete DDL, idempotent via `IF NOT EXISTS`.
pub(crate) const SCHEMA_SQL: &str = r#"
-- WAL keeps reads cheap while a turn transaction commits.
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sessions (
    id         TEXT PRIMARY KEY,
    first_seen TEXT NOT NULL,
    last_seen  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversations (
    id                  TEXT PRIMARY KEY,
    session_id          TEXT NOT NULL REFERENCES sessions(id),
    escalated           INTEGER NOT NULL DEFAULT 0,
    escalation_category TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_session ON conversations(session_id);
CREATE INDEX IF NOT EXISTS idx_conversations_escalated ON conversations(escalated);

CREATE TABLE IF NOT EXISTS messages (
    id               TEXT PRIMARY KEY,
    conversation_id  TEXT NOT NULL REFERENCES conversations(id),
    role             TEXT NOT NULL,
    content          TEXT NOT NULL,
    flagged          INTEGER NOT NULL DEFAULT 0,
    canceled         INTEGER NOT NULL DEFAULT 0,
    response_time_ms INTEGER,
    token_count      INTEGER,
    created_at       TEXT NOT NULL
);

-- Message order within a conversation: created_at, then id for ties.
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at, id);

CREATE TABLE IF NOT EXISTS moderation_logs (
    id         TEXT PRIMARY KEY,
    message_id TEXT NOT NULL REFERENCES messages(id),
    categories TEXT NOT NULL DEFAULT '{}',  -- JSON map category -> bool
    scores     TEXT NOT NULL DEFAULT '{}',  -- JSON map category -> score
    flagged    INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_moderation_logs_message ON moderation_logs(message_id);
CREATE INDEX IF NOT EXISTS idx_moderation_logs_created ON moderation_logs(created_at);

CREATE TABLE IF NOT EXISTS safety_rules (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_type   TEXT NOT NULL,
    category    TEXT NOT NULL,
    value       TEXT NOT NULL,
    action      TEXT NOT NULL,
    priority    INTEGER NOT NULL DEFAULT 0,
    enabled     INTEGER NOT NULL DEFAULT 1,
    description TEXT,
    UNIQUE(rule_type, value)
);

CREATE TABLE IF NOT EXISTS moderation_settings (
    category  TEXT PRIMARY KEY,
    enabled   INTEGER NOT NULL DEFAULT 1,
    threshold REAL NOT NULL,
    action    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS escalation_settings (
    category          TEXT PRIMARY KEY,
    enabled           INTEGER NOT NULL DEFAULT 1,
    keywords          TEXT NOT NULL DEFAULT '[]',  -- JSON array of strings
    response_template TEXT NOT NULL,
    priority          INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS system_settings (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,  -- JSON
    description TEXT
);

CREATE TABLE IF NOT EXISTS knowledge_documents (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    title      TEXT NOT NULL,
    category   TEXT NOT NULL,
    content    TEXT NOT NULL,
    keywords   TEXT NOT NULL DEFAULT '[]',  -- JSON array of strings
    updated_at TEXT NOT NULL
);
"#;

/// Apply the full schema to an open connection.  Safe to call repeatedly.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
