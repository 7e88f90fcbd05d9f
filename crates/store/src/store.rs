use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use uuid::Uuid;

use pal_domain::error::{Error, Result};

use crate::schema::apply_schema;
use crate::seed;

/// SQLite-backed store.
///
/// Thread-safe via an internal `Mutex<Connection>`.  All writes are
/// serialized; WAL mode keeps concurrent readers cheap on the SQLite side,
/// though we still take the mutex for simplicity.
pub struct Store {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) the database at `database_url` and apply the
    /// schema plus seed defaults.  `:memory:` yields an ephemeral store.
    pub fn open(database_url: &str) -> Result<Self> {
        let conn = if database_url == ":memory:" {
            Connection::open_in_memory().map_err(db_err)?
        } else {
            if let Some(parent) = Path::new(database_url).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open(database_url).map_err(db_err)?
        };

        apply_schema(&conn).map_err(db_err)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        seed::seed_defaults(&store)?;
        Ok(store)
    }

    /// Ephemeral store for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row-mapping helpers shared by the query modules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

pub(crate) fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

pub(crate) fn parse_uuid(idx: usize, raw: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned + Default>(raw: &str) -> T {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_parent_directories_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("palisade.db");
        let store = Store::open(path.to_str().unwrap()).unwrap();
        store.touch_session(Uuid::new_v4()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn in_memory_store_is_seeded() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.list_rules().unwrap().is_empty());
        assert!(!store.list_escalation_settings().unwrap().is_empty());
        assert!(store
            .get_system_setting("refusal_message")
            .unwrap()
            .is_some());
    }
}
