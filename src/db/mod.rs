//! Persisted state (§6): keys_config, apps, rules, requests, logs,
//! admin_logs, connection_tokens, dead_man_switch — all behind one
//! `Db` handle guarding a single rusqlite connection.
//!
//! Grounded on engine/sessions/mod.rs's `SessionStore` (a
//! `parking_lot::Mutex<Connection>` opened with WAL + anti-forensic
//! PRAGMAs) and engine/sessions/sessions.rs's CRUD method style.

pub mod admin_logs;
pub mod apps;
pub mod connection_tokens;
pub mod dead_man_switch;
pub mod keys;
pub mod logs;
pub mod requests;
pub mod rules;
pub mod schema;

use crate::atoms::error::SignetResult;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

pub struct Db {
    pub(crate) conn: Mutex<Connection>,
}

impl Db {
    pub fn open(path: &Path) -> SignetResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        // Anti-forensic: key material passes through this database (as
        // ciphertext) even though plaintext never does. Keep freed pages
        // zeroed and disable the rollback-journal size heuristic that can
        // otherwise leave stale ciphertext copies on disk.
        conn.pragma_update(None, "secure_delete", "ON")?;
        conn.pragma_update(None, "auto_vacuum", "INCREMENTAL")?;
        schema::run_migrations(&conn)?;
        Ok(Db { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> SignetResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(Db { conn: Mutex::new(conn) })
    }
}

pub(crate) fn parse_ts(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| {
            // SQLite `datetime('now')` default values are space-separated,
            // not RFC3339 — fall back to naive parsing for those rows.
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| chrono::DateTime::from_naive_utc_and_offset(ndt, chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now())
        })
}

pub(crate) fn fmt_ts(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339()
}
