//! KillSwitch (C9): listens for encrypted admin DMs (NIP-04 or NIP-17
//! gift-wrapped) addressed to any active key, executes the command table,
//! and replies over the same channel.
//!
//! Grounded on the teacher's `run_relay_loop` per-event handling shape,
//! reusing `RelayPool` (C3) for the admin relay set rather than hand-
//! rolling a second socket loop, with the admin-command vocabulary
//! generalized from engine/channels/access.rs's coarse allow/deny verbs.

use crate::atoms::constants::{KILLSWITCH_DEDUP_MAX_ENTRIES, KILLSWITCH_DEDUP_TTL_SECS};
use crate::codec::event::{self, NostrEvent};
use crate::codec::{nip04, nip17};
use crate::db::admin_logs::AdminEventArgs;
use crate::db::Db;
use crate::deadman::DeadManSwitch;
use crate::events::{EventBus, SignetEvent};
use crate::keystore::{ActiveKey, KeyStore, KeyStoreEvent};
use crate::relay::RelayPool;
use log::warn;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub struct KillSwitch {
    db: Arc<Db>,
    keystore: Arc<KeyStore>,
    bus: Arc<EventBus>,
    admin_pubkey: Option<String>,
    pool: Option<Arc<RelayPool>>,
    deadman: Mutex<Option<Arc<DeadManSwitch>>>,
    dedup: Mutex<HashMap<String, chrono::DateTime<chrono::Utc>>>,
}

impl KillSwitch {
    /// Builds its own `RelayPool` over `admin_relays`, a channel disjoint
    /// from the main signing relay set. `None`/empty inputs disable the
    /// kill switch entirely; it is an optional safety feature.
    pub fn new(
        db: Arc<Db>,
        keystore: Arc<KeyStore>,
        bus: Arc<EventBus>,
        admin_pubkey: Option<String>,
        admin_relays: Vec<String>,
    ) -> Arc<Self> {
        let pool = if admin_pubkey.is_some() && !admin_relays.is_empty() {
            Some(RelayPool::new(admin_relays, bus.clone()))
        } else {
            None
        };
        Arc::new(KillSwitch {
            db,
            keystore,
            bus,
            admin_pubkey,
            pool,
            deadman: Mutex::new(None),
            dedup: Mutex::new(HashMap::new()),
        })
    }

    pub fn admin_pool(&self) -> Option<Arc<RelayPool>> {
        self.pool.clone()
    }

    /// Wires in the dead man switch so the `alive` command resets it
    /// through its own authenticated-reset path rather than touching the
    /// database directly. Optional: without it, `alive` is a no-op reply.
    pub fn set_deadman(&self, deadman: Arc<DeadManSwitch>) {
        *self.deadman.lock() = Some(deadman);
    }

    pub fn spawn(self: Arc<Self>) {
        let (Some(admin_pubkey), Some(pool)) = (self.admin_pubkey.clone(), self.pool.clone()) else {
            log::info!("kill switch disabled: no admin pubkey or admin relays configured");
            return;
        };
        let since = chrono::Utc::now().timestamp();
        let key_pubkeys: Vec<String> = self.keystore.active_keys().iter().map(|k| k.pubkey_hex.clone()).collect();
        pool.subscribe("signet-killswitch", json!({ "kinds": [4, 1059], "#p": key_pubkeys, "since": since }));

        let mut incoming = pool.incoming();
        let mut key_events = self.keystore.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    incoming_event = incoming.recv() => {
                        match incoming_event {
                            Ok(incoming_event) => self.handle_incoming(incoming_event.event, &admin_pubkey, &pool).await,
                            Err(_) => break,
                        }
                    }
                    key_event = key_events.recv() => {
                        match key_event {
                            // A key unlocked (or newly created plaintext) after startup
                            // widens the `#p` set the admin-DM filter matches on — without
                            // this, panic/lock DMs addressed to it would never arrive.
                            Ok(KeyStoreEvent::Activated { .. }) => {
                                let key_pubkeys: Vec<String> =
                                    self.keystore.active_keys().iter().map(|k| k.pubkey_hex.clone()).collect();
                                let since = chrono::Utc::now().timestamp();
                                pool.subscribe("signet-killswitch", json!({ "kinds": [4, 1059], "#p": key_pubkeys, "since": since }));
                            }
                            Ok(_) => {}
                            Err(_) => break,
                        }
                    }
                }
            }
        });
    }

    async fn handle_incoming(&self, wrapper: NostrEvent, admin_pubkey: &str, pool: &Arc<RelayPool>) {
        if !matches!(wrapper.kind, 4 | 1059) {
            return;
        }
        if !self.claim_event(&wrapper.id) {
            return;
        }
        let Some((key, command, reply_kind)) = self.try_decode(&wrapper, admin_pubkey) else { return };
        let reply_text = self.execute(&command);

        let reply_event = match reply_kind {
            4 => nip04::encrypt(&key.signing_key, admin_pubkey, &reply_text).and_then(|content| {
                event::sign_event(&key.signing_key, &key.pubkey_hex, 4, vec![vec!["p".to_string(), admin_pubkey.to_string()]], content)
            }),
            _ => nip17::wrap_dm(&key.signing_key, admin_pubkey, &reply_text),
        };
        match reply_event {
            Ok(event) => {
                if let Err(e) = pool.publish(&event).await {
                    warn!("kill switch reply publish failed: {e}");
                }
            }
            Err(e) => warn!("failed to build kill switch reply: {e}"),
        }

        let _ = self.db.insert_admin_event(
            "killswitch_command",
            AdminEventArgs {
                key_name: Some(&key.name),
                command: Some(&command),
                command_result: Some(&reply_text),
                ..Default::default()
            },
        );
        self.bus.publish(SignetEvent::AdminEvent { event_type: "killswitch_command".to_string() });
    }

    fn claim_event(&self, event_id: &str) -> bool {
        let mut dedup = self.dedup.lock();
        let now = chrono::Utc::now();
        if let Some(seen_at) = dedup.get(event_id) {
            if (now - *seen_at).num_seconds() < KILLSWITCH_DEDUP_TTL_SECS {
                return false;
            }
        }
        if dedup.len() >= KILLSWITCH_DEDUP_MAX_ENTRIES {
            dedup.retain(|_, t| (now - *t).num_seconds() < KILLSWITCH_DEDUP_TTL_SECS);
        }
        dedup.insert(event_id.to_string(), now);
        true
    }

    /// Tries every active key as the recipient, returning the first that
    /// successfully decrypts/unwraps the event, along with the plaintext
    /// command and the reply channel kind to use (4 or 1059).
    fn try_decode(&self, wrapper: &NostrEvent, admin_pubkey: &str) -> Option<(ActiveKey, String, u32)> {
        for key in self.keystore.active_keys() {
            match wrapper.kind {
                4 => {
                    if wrapper.pubkey != admin_pubkey {
                        continue;
                    }
                    if let Ok(text) = nip04::decrypt(&key.signing_key, admin_pubkey, &wrapper.content) {
                        return Some((key, text.trim().to_lowercase(), 4));
                    }
                }
                1059 => {
                    if let Ok(rumor) = nip17::unwrap_dm(&key.signing_key, wrapper) {
                        if rumor.pubkey == admin_pubkey {
                            return Some((key, rumor.content.trim().to_lowercase(), 1059));
                        }
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Executes a decoded, lowercased, trimmed command and returns the
    /// plain-text reply.
    fn execute(&self, command: &str) -> String {
        let now = chrono::Utc::now();
        match command {
            "panic" | "lockall" | "killswitch" => {
                let locked = self.keystore.lock_all().unwrap_or(0);
                let suspended = self.db.suspend_all_apps(now).unwrap_or(0);
                format!("locked {locked} key(s), suspended {suspended} app(s)")
            }
            "lockall keys" => format!("locked {} key(s)", self.keystore.lock_all().unwrap_or(0)),
            "suspendall apps" => format!("suspended {} app(s)", self.db.suspend_all_apps(now).unwrap_or(0)),
            "resumeall apps" => format!("resumed {} app(s)", self.db.resume_all_apps().unwrap_or(0)),
            "alive" => match self.deadman.lock().clone() {
                Some(deadman) => match deadman.reset_authenticated() {
                    Ok(()) => "dead man switch reset".to_string(),
                    Err(e) => format!("reset failed: {e}"),
                },
                None => "dead man switch not configured".to_string(),
            },
            "status" => self.status_report(),
            _ => {
                if let Some(name) = command.strip_prefix("lock ") {
                    return match self.keystore.lock(name.trim()) {
                        Ok(()) => format!("locked {name}"),
                        Err(e) => format!("lock failed: {e}"),
                    };
                }
                if let Some(key) = command.strip_prefix("suspendall apps for ") {
                    let n = self.db.suspend_apps_for_key(key.trim(), now).unwrap_or(0);
                    return format!("suspended {n} app(s) for {key}");
                }
                if let Some(key) = command.strip_prefix("resumeall apps for ") {
                    let n = self.db.resume_apps_for_key(key.trim()).unwrap_or(0);
                    return format!("resumed {n} app(s) for {key}");
                }
                if let Some(needle) = command.strip_prefix("suspend ") {
                    return self.suspend_one(needle.trim(), now, true);
                }
                if let Some(needle) = command.strip_prefix("resume ") {
                    return self.suspend_one(needle.trim(), now, false);
                }
                format!("unknown command: {command}")
            }
        }
    }

    fn suspend_one(&self, needle: &str, now: chrono::DateTime<chrono::Utc>, suspend: bool) -> String {
        match self.db.find_app_by_name_or_prefix(needle) {
            Ok(Some(app)) => {
                let result = if suspend { self.db.suspend_app(app.id, now, None) } else { self.db.unsuspend_app(app.id) };
                match result {
                    Ok(()) if suspend => format!("suspended app {needle}"),
                    Ok(()) => format!("resumed app {needle}"),
                    Err(e) => format!("failed: {e}"),
                }
            }
            Ok(None) => format!("no app matching {needle}"),
            Err(e) => format!("failed: {e}"),
        }
    }

    fn status_report(&self) -> String {
        let keys = self.keystore.list_keys().unwrap_or_default();
        let mut lines = Vec::new();
        for k in keys {
            lines.push(format!("{}: {} ({} apps, {} requests)", k.name, k.status.as_str(), k.user_count, k.request_count));
        }
        if lines.is_empty() {
            "no keys configured".to_string()
        } else {
            lines.join("; ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::KeyEncryption;

    fn seeded() -> (Arc<KillSwitch>, Arc<Db>, Arc<KeyStore>) {
        let db = Arc::new(Db::open_in_memory().unwrap());
        let keystore = Arc::new(KeyStore::new(db.clone()));
        let bus = Arc::new(EventBus::new());
        let killswitch = KillSwitch::new(db.clone(), keystore.clone(), bus, Some("a".repeat(64)), vec![]);
        (killswitch, db, keystore)
    }

    #[test]
    fn no_admin_relays_leaves_pool_unset() {
        let (ks, _, _) = seeded();
        assert!(ks.admin_pool().is_none());
    }

    #[test]
    fn claim_event_rejects_replay() {
        let (ks, _, _) = seeded();
        assert!(ks.claim_event("evt1"));
        assert!(!ks.claim_event("evt1"));
    }

    #[test]
    fn execute_lockall_locks_encrypted_keys() {
        let (ks, db, keystore) = seeded();
        db.insert_key("alice", "npub1abc", KeyEncryption::None, None, None).unwrap();
        let reply = ks.execute("lockall keys");
        assert!(reply.contains("locked"));
        let _ = keystore;
    }

    #[test]
    fn execute_suspend_by_name_finds_app() {
        let (ks, db, _) = seeded();
        db.insert_key("alice", "npub1abc", KeyEncryption::None, None, None).unwrap();
        db.create_app("alice", "pubkeyhex", Some("MyWallet")).unwrap();
        let reply = ks.execute("suspend MyWallet");
        assert_eq!(reply, "suspended app MyWallet");
        assert!(db.find_app("alice", "pubkeyhex").unwrap().unwrap().is_suspended(chrono::Utc::now()));
    }

    #[test]
    fn execute_alive_without_deadman_reports_not_configured() {
        let (ks, _, _) = seeded();
        assert_eq!(ks.execute("alive"), "dead man switch not configured");
    }

    #[test]
    fn execute_alive_with_deadman_resets_it() {
        let (ks, db, keystore) = seeded();
        let bus = Arc::new(EventBus::new());
        let deadman = DeadManSwitch::new(db.clone(), keystore, bus, None, None);
        ks.set_deadman(deadman);
        assert_eq!(ks.execute("alive"), "dead man switch reset");
    }

    #[test]
    fn execute_unknown_command_reports_unknown() {
        let (ks, _, _) = seeded();
        let reply = ks.execute("frobnicate");
        assert!(reply.starts_with("unknown command"));
    }

    #[test]
    fn execute_status_lists_keys() {
        let (ks, db, _) = seeded();
        db.insert_key("alice", "npub1abc", KeyEncryption::None, None, None).unwrap();
        let reply = ks.execute("status");
        assert!(reply.contains("alice"));
    }
}
