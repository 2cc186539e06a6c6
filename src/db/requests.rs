use super::{fmt_ts, parse_ts, Db};
use crate::atoms::error::SignetResult;
use crate::atoms::types::PendingRequest;
use rusqlite::{params, OptionalExtension, Row};

fn row_to_request(row: &Row) -> rusqlite::Result<PendingRequest> {
    Ok(PendingRequest {
        id: row.get(0)?,
        key_name: row.get(1)?,
        method: row.get(2)?,
        params: row.get(3)?,
        remote_pubkey: row.get(4)?,
        created_at: parse_ts(&row.get::<_, String>(5)?),
        expires_at: parse_ts(&row.get::<_, String>(6)?),
        allowed: row.get::<_, Option<i64>>(7)?.map(|v| v != 0),
        processed_at: row.get::<_, Option<String>>(8)?.map(|s| parse_ts(&s)),
        requires_password: row.get::<_, i64>(9)? != 0,
        connect_response_sent: row.get::<_, Option<i64>>(10)?.map(|v| v != 0),
    })
}

const REQUEST_COLUMNS: &str = "id, key_name, method, params, remote_pubkey, created_at, expires_at, \
     allowed, processed_at, requires_password, connect_response_sent";

#[allow(clippy::too_many_arguments)]
impl Db {
    pub fn insert_request(
        &self,
        id: &str,
        key_name: &str,
        method: &str,
        params_json: &str,
        remote_pubkey: &str,
        created_at: chrono::DateTime<chrono::Utc>,
        expires_at: chrono::DateTime<chrono::Utc>,
        requires_password: bool,
    ) -> SignetResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO requests (id, key_name, method, params, remote_pubkey, created_at, expires_at, requires_password)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                key_name,
                method,
                params_json,
                remote_pubkey,
                fmt_ts(created_at),
                fmt_ts(expires_at),
                requires_password as i64
            ],
        )?;
        Ok(())
    }

    pub fn get_request(&self, id: &str) -> SignetResult<Option<PendingRequest>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], row_to_request).optional()?)
    }

    pub fn list_pending_requests(&self) -> SignetResult<Vec<PendingRequest>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE allowed IS NULL ORDER BY created_at");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_request)?.filter_map(|r| r.ok()).collect();
        Ok(rows)
    }

    /// CAS update: only flips a still-pending row. Returns the number of
    /// rows affected (0 or 1) so callers can tell a genuine no-op update
    /// apart from a race lost to a concurrent decision on the same row.
    pub fn decide_request(
        &self,
        id: &str,
        allowed: bool,
        processed_at: chrono::DateTime<chrono::Utc>,
    ) -> SignetResult<usize> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE requests SET allowed = ?1, processed_at = ?2 WHERE id = ?3 AND allowed IS NULL",
            params![allowed as i64, fmt_ts(processed_at), id],
        )?;
        Ok(n)
    }

    pub fn decide_requests_batch(
        &self,
        ids: &[String],
        allowed: bool,
        processed_at: chrono::DateTime<chrono::Utc>,
    ) -> SignetResult<usize> {
        let conn = self.conn.lock();
        let mut count = 0;
        for id in ids {
            count += conn.execute(
                "UPDATE requests SET allowed = ?1, processed_at = ?2 WHERE id = ?3 AND allowed IS NULL",
                params![allowed as i64, fmt_ts(processed_at), id],
            )?;
        }
        Ok(count)
    }

    pub fn expire_stale_requests(&self, now: chrono::DateTime<chrono::Utc>) -> SignetResult<usize> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE requests SET allowed = 0, processed_at = ?1 WHERE allowed IS NULL AND expires_at < ?1",
            params![fmt_ts(now)],
        )?;
        Ok(n)
    }

    pub fn mark_connect_response_sent(&self, id: &str, sent: bool) -> SignetResult<()> {
        let conn = self.conn.lock();
        conn.execute("UPDATE requests SET connect_response_sent = ?1 WHERE id = ?2", params![sent as i64, id])?;
        Ok(())
    }

    pub fn purge_processed_requests_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> SignetResult<usize> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM requests WHERE allowed IS NOT NULL AND processed_at < ?1",
            params![fmt_ts(cutoff)],
        )?;
        Ok(n)
    }

    /// Count of approvals for (app, method) within the trailing window —
    /// feeds the auto-approval rate-limit check (§4.5/§4.6).
    pub fn count_recent_auto_approvals(
        &self,
        key_name: &str,
        remote_pubkey: &str,
        method: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> SignetResult<i64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM requests WHERE key_name = ?1 AND remote_pubkey = ?2 AND method = ?3
             AND allowed = 1 AND processed_at >= ?4",
            params![key_name, remote_pubkey, method, fmt_ts(since)],
            |r| r.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{KeyEncryption, PendingStatus};
    use chrono::Duration;

    fn seeded_db() -> Db {
        let db = Db::open_in_memory().unwrap();
        db.insert_key("alice", "npub1abc", KeyEncryption::None, None, None).unwrap();
        db
    }

    #[test]
    fn insert_and_list_pending() {
        let db = seeded_db();
        let now = chrono::Utc::now();
        db.insert_request("r1", "alice", "sign_event", "{}", "pub1", now, now + Duration::seconds(300), false)
            .unwrap();
        let pending = db.list_pending_requests().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status(now), PendingStatus::Pending);
    }

    #[test]
    fn decide_request_removes_from_pending() {
        let db = seeded_db();
        let now = chrono::Utc::now();
        db.insert_request("r1", "alice", "sign_event", "{}", "pub1", now, now + Duration::seconds(300), false)
            .unwrap();
        db.decide_request("r1", true, now).unwrap();
        assert!(db.list_pending_requests().unwrap().is_empty());
        let req = db.get_request("r1").unwrap().unwrap();
        assert_eq!(req.status(now), PendingStatus::Approved);
    }

    #[test]
    fn expire_stale_marks_expired_as_denied() {
        let db = seeded_db();
        let now = chrono::Utc::now();
        let past = now - Duration::seconds(600);
        db.insert_request("r1", "alice", "sign_event", "{}", "pub1", past, past + Duration::seconds(300), false)
            .unwrap();
        let n = db.expire_stale_requests(now).unwrap();
        assert_eq!(n, 1);
        assert!(db.list_pending_requests().unwrap().is_empty());
    }

    #[test]
    fn batch_decide_skips_already_decided() {
        let db = seeded_db();
        let now = chrono::Utc::now();
        db.insert_request("r1", "alice", "sign_event", "{}", "pub1", now, now + Duration::seconds(300), false)
            .unwrap();
        db.decide_request("r1", true, now).unwrap();
        let n = db.decide_requests_batch(&["r1".to_string()], false, now).unwrap();
        assert_eq!(n, 0);
    }
}
