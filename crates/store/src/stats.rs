//! Aggregate queries backing `GET /api/admin/stats`.

use rusqlite::params;
use serde::Serialize;

use pal_domain::error::Result;

use crate::store::{db_err, Store};

/// Snapshot of gateway-wide totals for the admin dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    pub conversations: u64,
    pub messages: u64,
    pub escalated_conversations: u64,
    pub flagged_messages: u64,
    pub moderation_logs: u64,
    /// Mean assistant generation time; `None` until an assistant message
    /// with a recorded duration exists.
    pub avg_response_ms: Option<f64>,
    /// Mean completion token count (provider usage, else chars/4).
    pub avg_tokens_used: Option<f64>,
    pub safety_rules: u64,
    pub knowledge_docs: u64,
}

impl Store {
    pub fn gateway_stats(&self) -> Result<GatewayStats> {
        let conn = self.lock();

        let count = |sql: &str| -> Result<u64> {
            conn.query_row(sql, [], |row| row.get(0)).map_err(db_err)
        };

        let conversations = count("SELECT COUNT(*) FROM conversations")?;
        let messages = count("SELECT COUNT(*) FROM messages")?;
        let escalated_conversations =
            count("SELECT COUNT(*) FROM conversations WHERE escalated = 1")?;
        let flagged_messages = count("SELECT COUNT(*) FROM messages WHERE flagged = 1")?;
        let moderation_logs = count("SELECT COUNT(*) FROM moderation_logs")?;
        let safety_rules = count("SELECT COUNT(*) FROM safety_rules")?;
        let knowledge_docs = count("SELECT COUNT(*) FROM knowledge_documents")?;

        let avg_response_ms: Option<f64> = conn
            .query_row(
                "SELECT AVG(response_time_ms) FROM messages
                 WHERE role = ?1 AND response_time_ms IS NOT NULL",
                params!["assistant"],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        let avg_tokens_used: Option<f64> = conn
            .query_row(
                "SELECT AVG(token_count) FROM messages
                 WHERE role = ?1 AND token_count IS NOT NULL",
                params!["assistant"],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        Ok(GatewayStats {
            conversations,
            messages,
            escalated_conversations,
            flagged_messages,
            moderation_logs,
            avg_response_ms,
            avg_tokens_used,
            safety_rules,
            knowledge_docs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pal_domain::conversation::Message;
    use uuid::Uuid;

    #[test]
    fn stats_reflect_writes() {
        let store = Store::open_in_memory().unwrap();
        let session = Uuid::new_v4();
        store.touch_session(session).unwrap();
        let conversation = store.create_conversation(session).unwrap();

        store
            .insert_message(&Message::user(conversation.id, "hi"))
            .unwrap();
        let mut reply = Message::assistant(conversation.id, "hello");
        reply.response_time_ms = Some(120);
        reply.token_count = Some(8);
        store
            .record_assistant_turn(&reply, None, Some("crisis"))
            .unwrap();

        let stats = store.gateway_stats().unwrap();
        assert_eq!(stats.conversations, 1);
        assert_eq!(stats.messages, 2);
        assert_eq!(stats.escalated_conversations, 1);
        assert_eq!(stats.avg_response_ms, Some(120.0));
        assert_eq!(stats.avg_tokens_used, Some(8.0));
        assert!(stats.safety_rules > 0, "seed rules expected");
    }
}
