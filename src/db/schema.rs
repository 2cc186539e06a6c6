// ── Persisted schema & migrations ──────────────────────────────────────────
//
// Grounded on engine/sessions/schema.rs's idempotent migration pattern:
// one `execute_batch` of `CREATE TABLE IF NOT EXISTS` for the baseline
// schema, kept safe to re-run on every startup.

use crate::atoms::error::SignetResult;
use rusqlite::Connection;

pub fn run_migrations(conn: &Connection) -> SignetResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS keys_config (
            name        TEXT PRIMARY KEY,
            npub        TEXT NOT NULL,
            encryption  TEXT NOT NULL,       -- none | nip49 | legacy
            ciphertext  TEXT,                -- null iff encryption = none
            plaintext   TEXT,                -- only set when encryption = none
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS apps (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            key_name       TEXT NOT NULL REFERENCES keys_config(name) ON DELETE CASCADE,
            client_pubkey  TEXT NOT NULL,
            description    TEXT,
            trust_level    TEXT NOT NULL DEFAULT 'paranoid',
            created_at     TEXT NOT NULL DEFAULT (datetime('now')),
            last_used_at   TEXT,
            revoked_at     TEXT,
            suspended_at   TEXT,
            suspend_until  TEXT,
            UNIQUE(key_name, client_pubkey)
        );
        CREATE INDEX IF NOT EXISTS idx_apps_key_name ON apps(key_name);

        CREATE TABLE IF NOT EXISTS rules (
            id       INTEGER PRIMARY KEY AUTOINCREMENT,
            app_id   INTEGER NOT NULL REFERENCES apps(id) ON DELETE CASCADE,
            method   TEXT NOT NULL,
            kind     TEXT,
            allowed  INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rules_app_id ON rules(app_id);

        CREATE TABLE IF NOT EXISTS requests (
            id                    TEXT PRIMARY KEY,
            key_name              TEXT NOT NULL,
            method                TEXT NOT NULL,
            params                TEXT NOT NULL,
            remote_pubkey         TEXT NOT NULL,
            created_at            TEXT NOT NULL,
            expires_at            TEXT NOT NULL,
            allowed               INTEGER,           -- null | 0 | 1
            processed_at          TEXT,
            requires_password     INTEGER NOT NULL DEFAULT 0,
            connect_response_sent INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_requests_key_name ON requests(key_name);
        CREATE INDEX IF NOT EXISTS idx_requests_allowed ON requests(allowed);

        CREATE TABLE IF NOT EXISTS logs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp       TEXT NOT NULL DEFAULT (datetime('now')),
            entry_type      TEXT NOT NULL,
            method          TEXT,
            event_kind      INTEGER,
            key_name        TEXT,
            user_pubkey     TEXT,
            app_name        TEXT,
            auto_approved   INTEGER NOT NULL DEFAULT 0,
            approval_type   TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);

        CREATE TABLE IF NOT EXISTS admin_logs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type      TEXT NOT NULL,
            key_name        TEXT,
            app_id          INTEGER,
            app_name        TEXT,
            client_name     TEXT,
            client_version  TEXT,
            client_ip       TEXT,
            user_agent      TEXT,
            command         TEXT,
            command_result  TEXT,
            timestamp       TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_admin_logs_timestamp ON admin_logs(timestamp);

        CREATE TABLE IF NOT EXISTS connection_tokens (
            token       TEXT PRIMARY KEY,
            key_name    TEXT NOT NULL,
            expires_at  TEXT NOT NULL,
            used_at     TEXT
        );

        CREATE TABLE IF NOT EXISTS dead_man_switch (
            id                 INTEGER PRIMARY KEY CHECK (id = 1),
            enabled            INTEGER NOT NULL DEFAULT 0,
            timeframe_sec      INTEGER NOT NULL DEFAULT 86400,
            last_reset_at      TEXT NOT NULL DEFAULT (datetime('now')),
            panic_triggered_at TEXT,
            failed_attempts    INTEGER NOT NULL DEFAULT 0,
            lockout_until      TEXT
        );
        INSERT OR IGNORE INTO dead_man_switch (id) VALUES (1);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn open_memory() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn migrations_run_cleanly() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();
    }

    #[test]
    fn migrations_idempotent() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
    }

    #[test]
    fn core_tables_created() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN \
                 ('keys_config','apps','rules','requests','logs','admin_logs','connection_tokens','dead_man_switch')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 8);
    }

    #[test]
    fn dead_man_switch_seeded() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();
        let enabled: i64 = conn
            .query_row("SELECT enabled FROM dead_man_switch WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(enabled, 0);
    }
}
