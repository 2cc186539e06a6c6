use super::{fmt_ts, parse_ts, Db};
use crate::atoms::error::SignetResult;
use crate::atoms::types::{App, TrustLevel};
use rusqlite::{params, OptionalExtension, Row};

fn row_to_app(row: &Row) -> rusqlite::Result<App> {
    let trust_level: String = row.get(4)?;
    Ok(App {
        id: row.get(0)?,
        key_name: row.get(1)?,
        client_pubkey: row.get(2)?,
        description: row.get(3)?,
        trust_level: TrustLevel::parse(&trust_level).unwrap_or(TrustLevel::Paranoid),
        created_at: parse_ts(&row.get::<_, String>(5)?),
        last_used_at: row.get::<_, Option<String>>(6)?.map(|s| parse_ts(&s)),
        revoked_at: row.get::<_, Option<String>>(7)?.map(|s| parse_ts(&s)),
        suspended_at: row.get::<_, Option<String>>(8)?.map(|s| parse_ts(&s)),
        suspend_until: row.get::<_, Option<String>>(9)?.map(|s| parse_ts(&s)),
    })
}

const APP_COLUMNS: &str =
    "id, key_name, client_pubkey, description, trust_level, created_at, last_used_at, revoked_at, suspended_at, suspend_until";

impl Db {
    pub fn create_app(&self, key_name: &str, client_pubkey: &str, description: Option<&str>) -> SignetResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO apps (key_name, client_pubkey, description, trust_level) VALUES (?1, ?2, ?3, 'paranoid')
             ON CONFLICT(key_name, client_pubkey) DO NOTHING",
            params![key_name, client_pubkey, description],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM apps WHERE key_name = ?1 AND client_pubkey = ?2",
            params![key_name, client_pubkey],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn get_app(&self, id: i64) -> SignetResult<Option<App>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {APP_COLUMNS} FROM apps WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], row_to_app).optional()?)
    }

    pub fn find_app(&self, key_name: &str, client_pubkey: &str) -> SignetResult<Option<App>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {APP_COLUMNS} FROM apps WHERE key_name = ?1 AND client_pubkey = ?2");
        Ok(conn.query_row(&sql, params![key_name, client_pubkey], row_to_app).optional()?)
    }

    pub fn list_apps_for_key(&self, key_name: &str) -> SignetResult<Vec<App>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {APP_COLUMNS} FROM apps WHERE key_name = ?1 ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let apps = stmt.query_map(params![key_name], row_to_app)?.filter_map(|r| r.ok()).collect();
        Ok(apps)
    }

    pub fn touch_app_last_used(&self, id: i64, at: chrono::DateTime<chrono::Utc>) -> SignetResult<()> {
        let conn = self.conn.lock();
        conn.execute("UPDATE apps SET last_used_at = ?1 WHERE id = ?2", params![fmt_ts(at), id])?;
        Ok(())
    }

    pub fn set_app_trust_level(&self, id: i64, trust_level: TrustLevel) -> SignetResult<()> {
        let conn = self.conn.lock();
        conn.execute("UPDATE apps SET trust_level = ?1 WHERE id = ?2", params![trust_level.as_str(), id])?;
        Ok(())
    }

    pub fn revoke_app(&self, id: i64, at: chrono::DateTime<chrono::Utc>) -> SignetResult<()> {
        let conn = self.conn.lock();
        conn.execute("UPDATE apps SET revoked_at = ?1 WHERE id = ?2", params![fmt_ts(at), id])?;
        Ok(())
    }

    pub fn suspend_app(
        &self,
        id: i64,
        at: chrono::DateTime<chrono::Utc>,
        until: Option<chrono::DateTime<chrono::Utc>>,
    ) -> SignetResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE apps SET suspended_at = ?1, suspend_until = ?2 WHERE id = ?3",
            params![fmt_ts(at), until.map(fmt_ts), id],
        )?;
        Ok(())
    }

    pub fn unsuspend_app(&self, id: i64) -> SignetResult<()> {
        let conn = self.conn.lock();
        conn.execute("UPDATE apps SET suspended_at = NULL, suspend_until = NULL WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn delete_app(&self, id: i64) -> SignetResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM apps WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Finds an app by its description ("app name") or by a prefix of its
    /// client pubkey — the two handles the kill switch's `suspend <app>`
    /// command accepts.
    pub fn find_app_by_name_or_prefix(&self, needle: &str) -> SignetResult<Option<App>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {APP_COLUMNS} FROM apps WHERE description = ?1 OR client_pubkey LIKE ?2 ORDER BY id LIMIT 1"
        );
        let prefix_pattern = format!("{needle}%");
        Ok(conn.query_row(&sql, params![needle, prefix_pattern], row_to_app).optional()?)
    }

    pub fn suspend_all_apps(&self, at: chrono::DateTime<chrono::Utc>) -> SignetResult<usize> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE apps SET suspended_at = ?1, suspend_until = NULL WHERE revoked_at IS NULL AND suspended_at IS NULL",
            params![fmt_ts(at)],
        )?;
        Ok(n)
    }

    pub fn resume_all_apps(&self) -> SignetResult<usize> {
        let conn = self.conn.lock();
        let n = conn.execute("UPDATE apps SET suspended_at = NULL, suspend_until = NULL WHERE revoked_at IS NULL", [])?;
        Ok(n)
    }

    pub fn suspend_apps_for_key(&self, key_name: &str, at: chrono::DateTime<chrono::Utc>) -> SignetResult<usize> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE apps SET suspended_at = ?1, suspend_until = NULL
             WHERE key_name = ?2 AND revoked_at IS NULL AND suspended_at IS NULL",
            params![fmt_ts(at), key_name],
        )?;
        Ok(n)
    }

    pub fn resume_apps_for_key(&self, key_name: &str) -> SignetResult<usize> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE apps SET suspended_at = NULL, suspend_until = NULL WHERE key_name = ?1 AND revoked_at IS NULL",
            params![key_name],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::KeyEncryption;

    fn seeded_db() -> Db {
        let db = Db::open_in_memory().unwrap();
        db.insert_key("alice", "npub1abc", KeyEncryption::None, None, None).unwrap();
        db
    }

    #[test]
    fn create_app_is_idempotent_on_conflict() {
        let db = seeded_db();
        let id1 = db.create_app("alice", "pub1", None).unwrap();
        let id2 = db.create_app("alice", "pub1", Some("second call")).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn suspend_and_unsuspend_roundtrip() {
        let db = seeded_db();
        let id = db.create_app("alice", "pub1", None).unwrap();
        let now = chrono::Utc::now();
        db.suspend_app(id, now, None).unwrap();
        let app = db.get_app(id).unwrap().unwrap();
        assert!(app.is_suspended(now));
        db.unsuspend_app(id).unwrap();
        let app = db.get_app(id).unwrap().unwrap();
        assert!(!app.is_suspended(now));
    }

    #[test]
    fn revoke_marks_app_revoked() {
        let db = seeded_db();
        let id = db.create_app("alice", "pub1", None).unwrap();
        db.revoke_app(id, chrono::Utc::now()).unwrap();
        let app = db.get_app(id).unwrap().unwrap();
        assert!(app.is_revoked());
    }

    #[test]
    fn suspend_all_apps_skips_revoked() {
        let db = seeded_db();
        let id1 = db.create_app("alice", "pub1", None).unwrap();
        let id2 = db.create_app("alice", "pub2", None).unwrap();
        db.revoke_app(id2, chrono::Utc::now()).unwrap();
        let n = db.suspend_all_apps(chrono::Utc::now()).unwrap();
        assert_eq!(n, 1);
        assert!(db.get_app(id1).unwrap().unwrap().is_suspended(chrono::Utc::now()));
        assert!(!db.get_app(id2).unwrap().unwrap().is_suspended(chrono::Utc::now()));
    }

    #[test]
    fn find_app_by_name_or_prefix_matches_pubkey_prefix() {
        let db = seeded_db();
        db.create_app("alice", "pub1deadbeef", Some("MyWallet")).unwrap();
        assert!(db.find_app_by_name_or_prefix("MyWallet").unwrap().is_some());
        assert!(db.find_app_by_name_or_prefix("pub1dead").unwrap().is_some());
        assert!(db.find_app_by_name_or_prefix("nomatch").unwrap().is_none());
    }
}
