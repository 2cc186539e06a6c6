use super::{fmt_ts, parse_ts, Db};
use crate::atoms::error::{SignetError, SignetResult};
use crate::atoms::types::{KeyEncryption, KeyStatus, KeySummary};
use rusqlite::{params, OptionalExtension};

pub struct PersistedKey {
    pub name: String,
    pub npub: String,
    pub encryption: KeyEncryption,
    pub ciphertext: Option<String>,
    pub plaintext: Option<String>,
}

impl Db {
    pub fn insert_key(
        &self,
        name: &str,
        npub: &str,
        encryption: KeyEncryption,
        ciphertext: Option<&str>,
        plaintext: Option<&str>,
    ) -> SignetResult<()> {
        let conn = self.conn.lock();
        let existing: Option<String> =
            conn.query_row("SELECT name FROM keys_config WHERE name = ?1", params![name], |r| r.get(0))
                .optional()?;
        if existing.is_some() {
            return Err(SignetError::NameInUse(name.to_string()));
        }
        conn.execute(
            "INSERT INTO keys_config (name, npub, encryption, ciphertext, plaintext) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, npub, encryption.as_str(), ciphertext, plaintext],
        )?;
        Ok(())
    }

    pub fn get_key(&self, name: &str) -> SignetResult<Option<PersistedKey>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT name, npub, encryption, ciphertext, plaintext FROM keys_config WHERE name = ?1",
                params![name],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, Option<String>>(3)?,
                        r.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(name, npub, enc, ciphertext, plaintext)| PersistedKey {
            name,
            npub,
            encryption: KeyEncryption::parse(&enc).unwrap_or(KeyEncryption::None),
            ciphertext,
            plaintext,
        }))
    }

    pub fn list_key_names(&self) -> SignetResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name FROM keys_config ORDER BY name")?;
        let names = stmt.query_map([], |r| r.get(0))?.filter_map(|r| r.ok()).collect();
        Ok(names)
    }

    pub fn update_key_encryption(
        &self,
        name: &str,
        encryption: KeyEncryption,
        ciphertext: Option<&str>,
        plaintext: Option<&str>,
    ) -> SignetResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE keys_config SET encryption = ?1, ciphertext = ?2, plaintext = ?3 WHERE name = ?4",
            params![encryption.as_str(), ciphertext, plaintext, name],
        )?;
        Ok(())
    }

    pub fn rename_key(&self, old_name: &str, new_name: &str) -> SignetResult<()> {
        let conn = self.conn.lock();
        let existing: Option<String> = conn
            .query_row("SELECT name FROM keys_config WHERE name = ?1", params![new_name], |r| r.get(0))
            .optional()?;
        if existing.is_some() {
            return Err(SignetError::NameInUse(new_name.to_string()));
        }
        conn.execute("UPDATE keys_config SET name = ?1 WHERE name = ?2", params![new_name, old_name])?;
        conn.execute("UPDATE apps SET key_name = ?1 WHERE key_name = ?2", params![new_name, old_name])?;
        conn.execute("UPDATE requests SET key_name = ?1 WHERE key_name = ?2", params![new_name, old_name])?;
        Ok(())
    }

    /// Cascades to apps (and transitively rules via `ON DELETE CASCADE`).
    pub fn delete_key(&self, name: &str) -> SignetResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM keys_config WHERE name = ?1", params![name])?;
        Ok(())
    }

    /// Projects the `(name, status, npub, encryption, userCount, requestCount,
    /// lastUsedAt)` view (§4.2 ListKeys), joining counts from apps/requests.
    pub fn list_key_summaries(&self, active_names: &[String]) -> SignetResult<Vec<KeySummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT k.name, k.npub, k.encryption,
                    (SELECT COUNT(*) FROM apps a WHERE a.key_name = k.name) AS user_count,
                    (SELECT COUNT(*) FROM requests r WHERE r.key_name = k.name) AS request_count,
                    (SELECT MAX(a.last_used_at) FROM apps a WHERE a.key_name = k.name) AS last_used_at
             FROM keys_config k ORDER BY k.name",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (name, npub, enc, user_count, request_count, last_used_at) = row?;
            let encryption = KeyEncryption::parse(&enc).unwrap_or(KeyEncryption::None);
            let status = if active_names.contains(&name) {
                KeyStatus::Online
            } else if matches!(encryption, KeyEncryption::None) {
                KeyStatus::Online
            } else {
                KeyStatus::Locked
            };
            out.push(KeySummary {
                name,
                npub,
                status,
                encryption,
                user_count,
                request_count,
                last_used_at: last_used_at.map(|s| parse_ts(&s)),
            });
        }
        Ok(out)
    }
}

#[allow(dead_code)]
fn _use_fmt_ts() {
    let _ = fmt_ts(chrono::Utc::now());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::KeyEncryption;

    #[test]
    fn insert_and_get_roundtrip() {
        let db = Db::open_in_memory().unwrap();
        db.insert_key("alice", "npub1abc", KeyEncryption::None, None, Some("plaintext-nsec")).unwrap();
        let key = db.get_key("alice").unwrap().unwrap();
        assert_eq!(key.npub, "npub1abc");
        assert_eq!(key.plaintext.as_deref(), Some("plaintext-nsec"));
    }

    #[test]
    fn duplicate_name_rejected() {
        let db = Db::open_in_memory().unwrap();
        db.insert_key("alice", "npub1abc", KeyEncryption::None, None, None).unwrap();
        let err = db.insert_key("alice", "npub1xyz", KeyEncryption::None, None, None).unwrap_err();
        assert!(matches!(err, SignetError::NameInUse(_)));
    }

    #[test]
    fn rename_propagates_to_apps() {
        let db = Db::open_in_memory().unwrap();
        db.insert_key("alice", "npub1abc", KeyEncryption::None, None, None).unwrap();
        db.create_app("alice", "pubkeyhex", None).unwrap();
        db.rename_key("alice", "alice2").unwrap();
        let apps = db.list_apps_for_key("alice2").unwrap();
        assert_eq!(apps.len(), 1);
    }
}
