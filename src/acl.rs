//! ACLEngine (C5) — the decision tree of §4.5: given (keyName,
//! clientPubkey, method, primaryParam) returns allow_auto /
//! allow_manual_record / deny / escalate.
//!
//! Grounded on engine/channels/access.rs's `check_access` (open/allowlist/
//! pairing ladder), generalized from "DM policy string" to the richer
//! App/Rule/TrustLevel model, plus a TTL cache in the same spirit as
//! ACL_CACHE_TTL_SECS keeps repeated lookups off the DB's hot path.

use crate::atoms::constants::{ACL_CACHE_MAX_ENTRIES, ACL_CACHE_TTL_SECS, SAFE_KINDS, SENSITIVE_KINDS};
use crate::atoms::error::SignetResult;
use crate::atoms::types::{AclDecision, App, ApprovalType, TrustLevel};
use crate::db::Db;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct CacheEntry {
    app: Option<App>,
    has_explicit_deny: bool,
    inserted_at: chrono::DateTime<chrono::Utc>,
}

pub struct AclEngine {
    db: Arc<Db>,
    cache: Mutex<HashMap<(String, String), CacheEntry>>,
}

impl AclEngine {
    pub fn new(db: Arc<Db>) -> Self {
        AclEngine { db, cache: Mutex::new(HashMap::new()) }
    }

    /// Invalidate on any permission mutation for a single app.
    pub fn invalidate_app(&self, key_name: &str, client_pubkey: &str) {
        self.cache.lock().remove(&(key_name.to_string(), client_pubkey.to_string()));
    }

    /// Invalidate every cache entry for a key (key-wide mutation, e.g. lock).
    pub fn invalidate_key(&self, key_name: &str) {
        self.cache.lock().retain(|(k, _), _| k != key_name);
    }

    fn lookup_app(&self, key_name: &str, client_pubkey: &str) -> SignetResult<Option<App>> {
        let cache_key = (key_name.to_string(), client_pubkey.to_string());
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.get(&cache_key) {
                if (chrono::Utc::now() - entry.inserted_at).num_seconds() < ACL_CACHE_TTL_SECS {
                    return Ok(entry.app.clone());
                }
            }
        }
        let app = self.db.find_app(key_name, client_pubkey)?;
        let has_explicit_deny = if let Some(ref a) = app {
            self.db.list_rules_for_app(a.id)?.iter().any(|r| r.method == "*" && !r.allowed)
        } else {
            false
        };
        let mut cache = self.cache.lock();
        if cache.len() >= ACL_CACHE_MAX_ENTRIES {
            cache.clear();
        }
        cache.insert(cache_key, CacheEntry { app: app.clone(), has_explicit_deny, inserted_at: chrono::Utc::now() });
        Ok(app)
    }

    /// Decides access for `(keyName, clientPubkey, method, kind)`. `kind`
    /// is only meaningful for `sign_event`.
    pub fn decide(
        &self,
        key_name: &str,
        client_pubkey: &str,
        method: &str,
        kind: Option<u32>,
    ) -> SignetResult<AclDecision> {
        let app = match self.lookup_app(key_name, client_pubkey)? {
            None => {
                return Ok(if method == "connect" { AclDecision::Escalate } else { AclDecision::Deny });
            }
            Some(app) => app,
        };

        if app.is_revoked() {
            return Ok(AclDecision::Deny);
        }
        if app.is_suspended(chrono::Utc::now()) {
            return Ok(AclDecision::Deny);
        }

        let rules = self.db.list_rules_for_app(app.id)?;
        if let Some(rule) = rules.iter().find(|r| r.method == "*" && !r.allowed) {
            let _ = rule;
            return Ok(AclDecision::Deny);
        }
        if let Some(rule) = rules.iter().find(|r| r.matches(method, kind)) {
            return Ok(if rule.allowed { AclDecision::AllowAuto(ApprovalType::AutoPermission) } else { AclDecision::Deny });
        }

        Ok(match app.trust_level {
            TrustLevel::Paranoid => AclDecision::Escalate,
            TrustLevel::Full => AclDecision::AllowAuto(ApprovalType::AutoTrust),
            TrustLevel::Reasonable => decide_reasonable(method, kind),
        })
    }

    /// Marks `lastUsedAt` without blocking the caller's decision — callers
    /// should spawn this rather than await it inline when on the hot path.
    pub fn touch_last_used(&self, app_id: i64, now: chrono::DateTime<chrono::Utc>) -> SignetResult<()> {
        self.db.touch_app_last_used(app_id, now)
    }

    /// Connect-time grant (§4.5): creates/updates the App and installs the
    /// rules implied by `trust_level`. At `full`, also grants nip04/nip44/
    /// sign_event(all); downgrading from `full` removes those.
    pub fn grant_connect(
        &self,
        key_name: &str,
        client_pubkey: &str,
        trust_level: TrustLevel,
        description: Option<&str>,
    ) -> SignetResult<i64> {
        let app_id = self.db.create_app(key_name, client_pubkey, description)?;
        self.db.set_app_trust_level(app_id, trust_level)?;
        self.db.delete_rules_for_app(app_id)?;
        self.db.add_rule(app_id, "connect", None, true)?;
        if trust_level == TrustLevel::Full {
            for method in ["nip04_encrypt", "nip04_decrypt", "nip44_encrypt", "nip44_decrypt"] {
                self.db.add_rule(app_id, method, None, true)?;
            }
            self.db.add_rule(app_id, "sign_event", Some("all"), true)?;
        }
        self.invalidate_app(key_name, client_pubkey);
        Ok(app_id)
    }

    /// Installs a single "always allow" rule from a manual approval.
    pub fn install_always_allow(&self, app_id: i64, key_name: &str, client_pubkey: &str, method: &str, kind: Option<&str>) -> SignetResult<()> {
        self.db.add_rule(app_id, method, kind, true)?;
        self.invalidate_app(key_name, client_pubkey);
        Ok(())
    }
}

fn decide_reasonable(method: &str, kind: Option<u32>) -> AclDecision {
    match method {
        "connect" | "ping" | "get_public_key" => AclDecision::AllowAuto(ApprovalType::AutoTrust),
        "nip44_encrypt" | "nip44_decrypt" => AclDecision::AllowAuto(ApprovalType::AutoTrust),
        "nip04_encrypt" | "nip04_decrypt" | "encrypt" | "decrypt" => AclDecision::Escalate,
        "sign_event" => match kind {
            Some(k) if SENSITIVE_KINDS.contains(&k) => AclDecision::Escalate,
            Some(k) if SAFE_KINDS.contains(&k) => AclDecision::AllowAuto(ApprovalType::AutoTrust),
            _ => AclDecision::Escalate,
        },
        _ => AclDecision::Escalate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::KeyEncryption;

    fn seeded_db() -> Arc<Db> {
        let db = Db::open_in_memory().unwrap();
        db.insert_key("alice", "npub1abc", KeyEncryption::None, None, None).unwrap();
        Arc::new(db)
    }

    #[test]
    fn unknown_app_can_only_connect() {
        let engine = AclEngine::new(seeded_db());
        assert_eq!(engine.decide("alice", "unknownpub", "connect", None).unwrap(), AclDecision::Escalate);
        assert_eq!(engine.decide("alice", "unknownpub", "sign_event", Some(1)).unwrap(), AclDecision::Deny);
    }

    #[test]
    fn revoked_app_is_always_denied() {
        let db = seeded_db();
        let engine = AclEngine::new(db.clone());
        let app_id = db.create_app("alice", "pub1", None).unwrap();
        db.revoke_app(app_id, chrono::Utc::now()).unwrap();
        assert_eq!(engine.decide("alice", "pub1", "ping", None).unwrap(), AclDecision::Deny);
    }

    #[test]
    fn paranoid_trust_always_escalates_without_rule() {
        let db = seeded_db();
        let engine = AclEngine::new(db.clone());
        db.create_app("alice", "pub1", None).unwrap();
        assert_eq!(engine.decide("alice", "pub1", "ping", None).unwrap(), AclDecision::Escalate);
    }

    #[test]
    fn full_trust_auto_allows() {
        let db = seeded_db();
        let engine = AclEngine::new(db.clone());
        let app_id = db.create_app("alice", "pub1", None).unwrap();
        db.set_app_trust_level(app_id, TrustLevel::Full).unwrap();
        assert_eq!(
            engine.decide("alice", "pub1", "sign_event", Some(4)).unwrap(),
            AclDecision::AllowAuto(ApprovalType::AutoTrust)
        );
    }

    #[test]
    fn reasonable_trust_escalates_sensitive_kind() {
        let db = seeded_db();
        let engine = AclEngine::new(db.clone());
        let app_id = db.create_app("alice", "pub1", None).unwrap();
        db.set_app_trust_level(app_id, TrustLevel::Reasonable).unwrap();
        assert_eq!(engine.decide("alice", "pub1", "sign_event", Some(4)).unwrap(), AclDecision::Escalate);
        assert_eq!(
            engine.decide("alice", "pub1", "sign_event", Some(1)).unwrap(),
            AclDecision::AllowAuto(ApprovalType::AutoTrust)
        );
    }

    #[test]
    fn wildcard_deny_rule_overrides_trust_level() {
        let db = seeded_db();
        let engine = AclEngine::new(db.clone());
        let app_id = db.create_app("alice", "pub1", None).unwrap();
        db.set_app_trust_level(app_id, TrustLevel::Full).unwrap();
        db.add_rule(app_id, "*", None, false).unwrap();
        assert_eq!(engine.decide("alice", "pub1", "ping", None).unwrap(), AclDecision::Deny);
    }

    #[test]
    fn connect_grant_at_full_trust_installs_broad_rules() {
        let db = seeded_db();
        let engine = AclEngine::new(db.clone());
        let app_id = engine.grant_connect("alice", "pub1", TrustLevel::Full, None).unwrap();
        let rules = db.list_rules_for_app(app_id).unwrap();
        assert!(rules.iter().any(|r| r.method == "nip04_encrypt"));
        assert!(rules.iter().any(|r| r.method == "sign_event" && r.kind.as_deref() == Some("all")));
    }
}
