use super::{parse_ts, Db};
use crate::atoms::error::SignetResult;
use crate::atoms::types::AdminEvent;
use rusqlite::{params, Row};

fn row_to_event(row: &Row) -> rusqlite::Result<AdminEvent> {
    Ok(AdminEvent {
        id: row.get(0)?,
        event_type: row.get(1)?,
        key_name: row.get(2)?,
        app_id: row.get(3)?,
        app_name: row.get(4)?,
        client_name: row.get(5)?,
        client_version: row.get(6)?,
        client_ip: row.get(7)?,
        user_agent: row.get(8)?,
        command: row.get(9)?,
        command_result: row.get(10)?,
        timestamp: parse_ts(&row.get::<_, String>(11)?),
    })
}

const ADMIN_LOG_COLUMNS: &str = "id, event_type, key_name, app_id, app_name, client_name, client_version, \
     client_ip, user_agent, command, command_result, timestamp";

/// Arguments for `Db::insert_admin_event` — named so call sites at the
/// many admin-action spots (keystore, ACL, killswitch) don't have to
/// track ten positional `Option<&str>`s.
#[derive(Debug, Default)]
pub struct AdminEventArgs<'a> {
    pub key_name: Option<&'a str>,
    pub app_id: Option<i64>,
    pub app_name: Option<&'a str>,
    pub client_name: Option<&'a str>,
    pub client_version: Option<&'a str>,
    pub client_ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub command: Option<&'a str>,
    pub command_result: Option<&'a str>,
}

impl Db {
    pub fn insert_admin_event(&self, event_type: &str, args: AdminEventArgs) -> SignetResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO admin_logs (event_type, key_name, app_id, app_name, client_name, client_version,
                                      client_ip, user_agent, command, command_result)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event_type,
                args.key_name,
                args.app_id,
                args.app_name,
                args.client_name,
                args.client_version,
                args.client_ip,
                args.user_agent,
                args.command,
                args.command_result,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_admin_events(&self, limit: i64) -> SignetResult<Vec<AdminEvent>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {ADMIN_LOG_COLUMNS} FROM admin_logs ORDER BY timestamp DESC LIMIT ?1");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit], row_to_event)?.filter_map(|r| r.ok()).collect();
        Ok(rows)
    }

    pub fn purge_admin_events_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> SignetResult<usize> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM admin_logs WHERE timestamp < ?1", params![super::fmt_ts(cutoff)])?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_list_admin_events() {
        let db = Db::open_in_memory().unwrap();
        db.insert_admin_event(
            "key_created",
            AdminEventArgs { key_name: Some("alice"), ..Default::default() },
        )
        .unwrap();
        let events = db.list_admin_events(10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "key_created");
        assert_eq!(events[0].key_name.as_deref(), Some("alice"));
    }
}
