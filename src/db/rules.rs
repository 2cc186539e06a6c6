use super::Db;
use crate::atoms::error::SignetResult;
use crate::atoms::types::Rule;
use rusqlite::params;

impl Db {
    pub fn add_rule(&self, app_id: i64, method: &str, kind: Option<&str>, allowed: bool) -> SignetResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO rules (app_id, method, kind, allowed) VALUES (?1, ?2, ?3, ?4)",
            params![app_id, method, kind, allowed as i64],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_rules_for_app(&self, app_id: i64) -> SignetResult<Vec<Rule>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, app_id, method, kind, allowed FROM rules WHERE app_id = ?1 ORDER BY id")?;
        let rules = stmt
            .query_map(params![app_id], |r| {
                Ok(Rule {
                    id: r.get(0)?,
                    app_id: r.get(1)?,
                    method: r.get(2)?,
                    kind: r.get(3)?,
                    allowed: r.get::<_, i64>(4)? != 0,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rules)
    }

    pub fn delete_rule(&self, id: i64) -> SignetResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM rules WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn delete_rules_for_app(&self, app_id: i64) -> SignetResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM rules WHERE app_id = ?1", params![app_id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::KeyEncryption;

    fn seeded_db() -> (Db, i64) {
        let db = Db::open_in_memory().unwrap();
        db.insert_key("alice", "npub1abc", KeyEncryption::None, None, None).unwrap();
        let app_id = db.create_app("alice", "pub1", None).unwrap();
        (db, app_id)
    }

    #[test]
    fn rule_matches_wildcard_kind() {
        let (db, app_id) = seeded_db();
        db.add_rule(app_id, "sign_event", Some("all"), true).unwrap();
        let rules = db.list_rules_for_app(app_id).unwrap();
        assert!(rules[0].matches("sign_event", Some(1)));
    }

    #[test]
    fn rule_matches_specific_kind_only() {
        let (db, app_id) = seeded_db();
        db.add_rule(app_id, "sign_event", Some("1"), true).unwrap();
        let rules = db.list_rules_for_app(app_id).unwrap();
        assert!(rules[0].matches("sign_event", Some(1)));
        assert!(!rules[0].matches("sign_event", Some(4)));
    }

    #[test]
    fn delete_rules_for_app_clears_all() {
        let (db, app_id) = seeded_db();
        db.add_rule(app_id, "sign_event", Some("1"), true).unwrap();
        db.add_rule(app_id, "nip04_encrypt", None, true).unwrap();
        db.delete_rules_for_app(app_id).unwrap();
        assert!(db.list_rules_for_app(app_id).unwrap().is_empty());
    }
}
