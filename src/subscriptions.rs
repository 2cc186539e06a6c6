//! SubscriptionManager (C4) — one inbound NIP-46 subscription per online
//! key, plus per-app subscriptions for NostrConnect apps with custom
//! relays. Rebuilt verbatim on `pool-reset`.
//!
//! Grounded on the teacher's `run_relay_loop` subscribe-on-connect call
//! (`REQ` with `#p`/`kinds`/`since`), generalized from "one fixed bot
//! pubkey" to "one subscription per currently-active key".

use crate::events::{EventBus, SignetEvent};
use crate::relay::RelayPool;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const NIP46_KIND: u32 = 24133;

pub struct SubscriptionManager {
    pool: Arc<RelayPool>,
    bus: Arc<EventBus>,
    key_subs: Mutex<HashSet<String>>,
    app_subs: Mutex<HashMap<i64, String>>,
}

impl SubscriptionManager {
    pub fn new(pool: Arc<RelayPool>, bus: Arc<EventBus>) -> Self {
        SubscriptionManager { pool, bus, key_subs: Mutex::new(HashSet::new()), app_subs: Mutex::new(HashMap::new()) }
    }

    fn key_sub_id(key_pubkey: &str) -> String {
        format!("signet-key-{}", &key_pubkey[..key_pubkey.len().min(16)])
    }

    fn app_sub_id(app_id: i64) -> String {
        format!("signet-app-{app_id}")
    }

    /// Subscribes to kind-24133 events addressed to `key_pubkey`. Called
    /// on `onKeyActivated`.
    pub fn subscribe_key(&self, key_pubkey: &str) {
        let sub_id = Self::key_sub_id(key_pubkey);
        if !self.key_subs.lock().insert(sub_id.clone()) {
            return;
        }
        let filter = json!({
            "#p": [key_pubkey],
            "kinds": [NIP46_KIND],
            "since": chrono::Utc::now().timestamp(),
        });
        self.pool.subscribe(&sub_id, filter);
    }

    pub fn unsubscribe_key(&self, key_pubkey: &str) {
        let sub_id = Self::key_sub_id(key_pubkey);
        if self.key_subs.lock().remove(&sub_id) {
            self.pool.unsubscribe(&sub_id);
        }
    }

    /// Additional subscription restricted to one app's custom relays and
    /// `author = clientPubkey` — only meaningful when that app connected
    /// via NostrConnect with its own relay set, which is why this takes
    /// its own `RelayPool` rather than the shared one in a fuller
    /// multi-pool deployment. Kept aligned to the shared pool here since
    /// Signet runs a single configured relay set (§9, no Open Question
    /// called for per-app pools).
    pub fn subscribe_app(&self, app_id: i64, client_pubkey: &str) {
        let sub_id = Self::app_sub_id(app_id);
        if self.app_subs.lock().insert(app_id, client_pubkey.to_string()).is_some() {
            return;
        }
        let filter = json!({
            "authors": [client_pubkey],
            "kinds": [NIP46_KIND],
            "since": chrono::Utc::now().timestamp(),
        });
        self.pool.subscribe(&sub_id, filter);
    }

    pub fn unsubscribe_app(&self, app_id: i64) {
        let sub_id = Self::app_sub_id(app_id);
        if self.app_subs.lock().remove(&app_id).is_some() {
            self.pool.unsubscribe(&sub_id);
        }
    }

    /// Tears down and rebuilds every subscription verbatim. Called when
    /// the pool emits `pool-reset` — socket-level subscription state is
    /// gone, but our own bookkeeping (`key_subs`/`app_subs`) survives so
    /// we know exactly what to re-request. Covers both per-key NIP-46
    /// subscriptions and per-app NostrConnect subscriptions — a reset that
    /// only rebuilt `key_subs` would silently drop every connected app's
    /// inbound traffic until it reconnected on its own.
    pub fn rebuild_all(&self, active_key_pubkeys: &[String]) {
        let keys: Vec<String> = self.key_subs.lock().iter().cloned().collect();
        for sub_id in keys {
            if let Some(pubkey) = active_key_pubkeys.iter().find(|p| sub_id.contains(&p[..p.len().min(16)])) {
                let filter = json!({
                    "#p": [pubkey],
                    "kinds": [NIP46_KIND],
                    "since": chrono::Utc::now().timestamp(),
                });
                self.pool.subscribe(&sub_id, filter);
            }
        }
        let apps: Vec<(i64, String)> = self.app_subs.lock().iter().map(|(id, pk)| (*id, pk.clone())).collect();
        for (app_id, client_pubkey) in apps {
            let sub_id = Self::app_sub_id(app_id);
            let filter = json!({
                "authors": [client_pubkey],
                "kinds": [NIP46_KIND],
                "since": chrono::Utc::now().timestamp(),
            });
            self.pool.subscribe(&sub_id, filter);
        }
        self.bus.publish(SignetEvent::RelaysUpdated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_key_is_idempotent() {
        let bus = Arc::new(EventBus::new());
        let pool = RelayPool::new(vec![], bus.clone());
        let mgr = SubscriptionManager::new(pool, bus);
        mgr.subscribe_key("abc123");
        mgr.subscribe_key("abc123");
        assert_eq!(mgr.key_subs.lock().len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_tracked_sub() {
        let bus = Arc::new(EventBus::new());
        let pool = RelayPool::new(vec![], bus.clone());
        let mgr = SubscriptionManager::new(pool, bus);
        mgr.subscribe_app(1, "clientpub");
        assert_eq!(mgr.app_subs.lock().len(), 1);
        mgr.unsubscribe_app(1);
        assert!(mgr.app_subs.lock().is_empty());
    }
}
