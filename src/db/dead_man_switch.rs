use super::{fmt_ts, parse_ts, Db};
use crate::atoms::error::SignetResult;
use crate::atoms::types::DeadManSwitchState;
use rusqlite::params;

impl Db {
    pub fn get_dead_man_switch(&self) -> SignetResult<DeadManSwitchState> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT enabled, timeframe_sec, last_reset_at, panic_triggered_at, failed_attempts, lockout_until
             FROM dead_man_switch WHERE id = 1",
            [],
            |r| {
                Ok(DeadManSwitchState {
                    enabled: r.get::<_, i64>(0)? != 0,
                    timeframe_sec: r.get(1)?,
                    last_reset_at: parse_ts(&r.get::<_, String>(2)?),
                    panic_triggered_at: r.get::<_, Option<String>>(3)?.map(|s| parse_ts(&s)),
                    failed_attempts: r.get::<_, i64>(4)? as u32,
                    lockout_until: r.get::<_, Option<String>>(5)?.map(|s| parse_ts(&s)),
                })
            },
        )
        .map_err(Into::into)
    }

    pub fn set_dead_man_switch_enabled(&self, enabled: bool, timeframe_sec: i64) -> SignetResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE dead_man_switch SET enabled = ?1, timeframe_sec = ?2 WHERE id = 1",
            params![enabled as i64, timeframe_sec],
        )?;
        Ok(())
    }

    pub fn reset_dead_man_switch(&self, at: chrono::DateTime<chrono::Utc>) -> SignetResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE dead_man_switch SET last_reset_at = ?1, panic_triggered_at = NULL,
             failed_attempts = 0, lockout_until = NULL WHERE id = 1",
            params![fmt_ts(at)],
        )?;
        Ok(())
    }

    pub fn trigger_dead_man_switch_panic(&self, at: chrono::DateTime<chrono::Utc>) -> SignetResult<()> {
        let conn = self.conn.lock();
        conn.execute("UPDATE dead_man_switch SET panic_triggered_at = ?1 WHERE id = 1", params![fmt_ts(at)])?;
        Ok(())
    }

    pub fn record_dead_man_switch_failure(
        &self,
        at: chrono::DateTime<chrono::Utc>,
        lockout_until: Option<chrono::DateTime<chrono::Utc>>,
    ) -> SignetResult<u32> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE dead_man_switch SET failed_attempts = failed_attempts + 1, lockout_until = ?1 WHERE id = 1",
            params![lockout_until.map(fmt_ts)],
        )?;
        let _ = at;
        let attempts: i64 = conn.query_row("SELECT failed_attempts FROM dead_man_switch WHERE id = 1", [], |r| r.get(0))?;
        Ok(attempts as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_disabled_and_not_expired() {
        let db = Db::open_in_memory().unwrap();
        let state = db.get_dead_man_switch().unwrap();
        assert!(!state.enabled);
        assert!(!state.is_expired(chrono::Utc::now()));
    }

    #[test]
    fn reset_clears_panic_and_failures() {
        let db = Db::open_in_memory().unwrap();
        let now = chrono::Utc::now();
        db.set_dead_man_switch_enabled(true, 3600).unwrap();
        db.trigger_dead_man_switch_panic(now).unwrap();
        db.record_dead_man_switch_failure(now, None).unwrap();
        db.reset_dead_man_switch(now).unwrap();
        let state = db.get_dead_man_switch().unwrap();
        assert!(state.panic_triggered_at.is_none());
        assert_eq!(state.failed_attempts, 0);
    }

    #[test]
    fn failed_attempts_increment() {
        let db = Db::open_in_memory().unwrap();
        let now = chrono::Utc::now();
        let n1 = db.record_dead_man_switch_failure(now, None).unwrap();
        let n2 = db.record_dead_man_switch_failure(now, None).unwrap();
        assert_eq!(n1, 1);
        assert_eq!(n2, 2);
    }
}
