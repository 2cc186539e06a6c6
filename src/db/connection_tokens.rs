use super::{fmt_ts, parse_ts, Db};
use crate::atoms::error::SignetResult;
use crate::atoms::types::ConnectionToken;
use rusqlite::{params, OptionalExtension};

impl Db {
    pub fn insert_connection_token(
        &self,
        token: &str,
        key_name: &str,
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> SignetResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO connection_tokens (token, key_name, expires_at) VALUES (?1, ?2, ?3)",
            params![token, key_name, fmt_ts(expires_at)],
        )?;
        Ok(())
    }

    pub fn get_connection_token(&self, token: &str) -> SignetResult<Option<ConnectionToken>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT token, key_name, expires_at, used_at FROM connection_tokens WHERE token = ?1",
                params![token],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(token, key_name, expires_at, used_at)| ConnectionToken {
            token,
            key_name,
            expires_at: parse_ts(&expires_at),
            used_at: used_at.map(|s| parse_ts(&s)),
        }))
    }

    /// Atomically marks a token used iff it is still usable, returning
    /// whether the claim succeeded — guards against a token being redeemed
    /// twice by concurrent connect attempts.
    pub fn claim_connection_token(&self, token: &str, now: chrono::DateTime<chrono::Utc>) -> SignetResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE connection_tokens SET used_at = ?1 WHERE token = ?2 AND used_at IS NULL AND expires_at >= ?1",
            params![fmt_ts(now), token],
        )?;
        Ok(n == 1)
    }

    pub fn purge_expired_connection_tokens(&self, now: chrono::DateTime<chrono::Utc>) -> SignetResult<usize> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM connection_tokens WHERE expires_at < ?1", params![fmt_ts(now)])?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::KeyEncryption;
    use chrono::Duration;

    fn seeded_db() -> Db {
        let db = Db::open_in_memory().unwrap();
        db.insert_key("alice", "npub1abc", KeyEncryption::None, None, None).unwrap();
        db
    }

    #[test]
    fn claim_succeeds_once_only() {
        let db = seeded_db();
        let now = chrono::Utc::now();
        db.insert_connection_token("tok1", "alice", now + Duration::seconds(300)).unwrap();
        assert!(db.claim_connection_token("tok1", now).unwrap());
        assert!(!db.claim_connection_token("tok1", now).unwrap());
    }

    #[test]
    fn claim_fails_past_expiry() {
        let db = seeded_db();
        let now = chrono::Utc::now();
        db.insert_connection_token("tok1", "alice", now - Duration::seconds(1)).unwrap();
        assert!(!db.claim_connection_token("tok1", now).unwrap());
    }
}
