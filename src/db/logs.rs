use super::{parse_ts, Db};
use crate::atoms::error::SignetResult;
use crate::atoms::types::{ApprovalType, LogEntry};
use rusqlite::{params, Row};

fn row_to_log(row: &Row) -> rusqlite::Result<LogEntry> {
    let approval_type: Option<String> = row.get(9)?;
    Ok(LogEntry {
        id: row.get(0)?,
        timestamp: parse_ts(&row.get::<_, String>(1)?),
        entry_type: row.get(2)?,
        method: row.get(3)?,
        event_kind: row.get::<_, Option<i64>>(4)?.map(|k| k as u32),
        key_name: row.get(5)?,
        user_pubkey: row.get(6)?,
        app_name: row.get(7)?,
        auto_approved: row.get::<_, i64>(8)? != 0,
        approval_type: approval_type.and_then(|s| match s.as_str() {
            "manual" => Some(ApprovalType::Manual),
            "auto_trust" => Some(ApprovalType::AutoTrust),
            "auto_permission" => Some(ApprovalType::AutoPermission),
            _ => None,
        }),
    })
}

const LOG_COLUMNS: &str =
    "id, timestamp, entry_type, method, event_kind, key_name, user_pubkey, app_name, auto_approved, approval_type";

#[allow(clippy::too_many_arguments)]
impl Db {
    pub fn insert_log(
        &self,
        entry_type: &str,
        method: Option<&str>,
        event_kind: Option<u32>,
        key_name: Option<&str>,
        user_pubkey: Option<&str>,
        app_name: Option<&str>,
        auto_approved: bool,
        approval_type: Option<ApprovalType>,
    ) -> SignetResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO logs (entry_type, method, event_kind, key_name, user_pubkey, app_name, auto_approved, approval_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry_type,
                method,
                event_kind.map(|k| k as i64),
                key_name,
                user_pubkey,
                app_name,
                auto_approved as i64,
                approval_type.map(|t| t.as_str())
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_logs(&self, limit: i64, key_name: Option<&str>) -> SignetResult<Vec<LogEntry>> {
        let conn = self.conn.lock();
        let rows: Vec<LogEntry> = if let Some(k) = key_name {
            let sql = format!(
                "SELECT {LOG_COLUMNS} FROM logs WHERE key_name = ?1 ORDER BY timestamp DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![k, limit], row_to_log)?.filter_map(|r| r.ok()).collect()
        } else {
            let sql = format!("SELECT {LOG_COLUMNS} FROM logs ORDER BY timestamp DESC LIMIT ?1");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![limit], row_to_log)?.filter_map(|r| r.ok()).collect()
        };
        Ok(rows)
    }

    pub fn purge_logs_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> SignetResult<usize> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM logs WHERE timestamp < ?1", params![super::fmt_ts(cutoff)])?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn insert_and_list_logs_most_recent_first() {
        let db = Db::open_in_memory().unwrap();
        db.insert_log("registration", None, None, Some("alice"), Some("pub1"), None, false, None).unwrap();
        db.insert_log("approval", Some("sign_event"), Some(1), Some("alice"), Some("pub1"), None, false, Some(ApprovalType::Manual))
            .unwrap();
        let logs = db.list_logs(10, None).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].entry_type, "approval");
    }

    #[test]
    fn purge_removes_old_rows() {
        let db = Db::open_in_memory().unwrap();
        db.insert_log("registration", None, None, Some("alice"), None, None, false, None).unwrap();
        let future_cutoff = chrono::Utc::now() + Duration::seconds(60);
        let n = db.purge_logs_older_than(future_cutoff).unwrap();
        assert_eq!(n, 1);
    }
}
