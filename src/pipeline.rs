//! RequestPipeline (C6) — the central state machine per inbound NIP-46
//! event (§4.6): decrypt -> parse -> resolve_key -> acl -> execute ->
//! publish_reply -> log, or escalate -> enqueue_pending.
//!
//! Grounded on engine/nostr/relay.rs's per-event handling loop (decrypt,
//! dispatch, encrypt-and-publish reply), generalized from a single fixed
//! bot key and a hardcoded agent-reply action to Signet's resolve-by-
//! key/ACL/execute-by-method dispatch.

use crate::acl::AclEngine;
use crate::atoms::constants::AUTO_APPROVAL_LOG_WINDOW_SECS;
use crate::atoms::error::{SignetError, SignetResult};
use crate::atoms::types::{AclDecision, ApprovalType, KeyEncryption};
use crate::codec::{event, nip04, nip44, NostrEvent};
use crate::connection::ConnectionService;
use crate::db::Db;
use crate::events::{EventBus, SignetEvent};
use crate::keystore::KeyStore;
use chrono::Duration;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

const NIP46_KIND: u32 = 24133;

#[derive(Debug, Deserialize)]
struct Nip46Request {
    id: String,
    method: String,
    #[serde(default)]
    params: Vec<String>,
}

pub struct RequestPipeline {
    db: Arc<Db>,
    keystore: Arc<KeyStore>,
    acl: Arc<AclEngine>,
    relay: Arc<crate::relay::RelayPool>,
    bus: Arc<EventBus>,
    connections: Arc<ConnectionService>,
}

impl RequestPipeline {
    pub fn new(
        db: Arc<Db>,
        keystore: Arc<KeyStore>,
        acl: Arc<AclEngine>,
        relay: Arc<crate::relay::RelayPool>,
        bus: Arc<EventBus>,
        connections: Arc<ConnectionService>,
    ) -> Self {
        RequestPipeline { db, keystore, acl, relay, bus, connections }
    }

    /// Entry point for every inbound kind-24133 event. Never returns an
    /// error to the caller — all failure modes are either a silent drop
    /// (malicious probe) or a NIP-46 error reply; this fn only logs.
    pub async fn handle_event(&self, raw: &NostrEvent) {
        if raw.kind != NIP46_KIND {
            return;
        }
        let Some(key_pubkey) = raw.tags.iter().find(|t| t.first().map(|s| s.as_str()) == Some("p")).and_then(|t| t.get(1)) else {
            return;
        };
        let Some(key_name) = self.resolve_key_name(key_pubkey) else {
            debug!("dropping nip46 event addressed to unknown key {key_pubkey}");
            return;
        };

        let client_pubkey = raw.pubkey.clone();

        let active = match self.keystore.active_key(&key_name) {
            Ok(active) => active,
            Err(SignetError::KeyLocked) => {
                // Parse best-effort to at least record method for the UI;
                // content stays opaque until the key is unlocked.
                self.enqueue_locked(&key_name, &client_pubkey, raw).await;
                return;
            }
            Err(_) => return,
        };

        let plaintext = match nip04::decrypt(&active.signing_key, &client_pubkey, &raw.content) {
            Ok(pt) => pt,
            Err(_) => return, // malformed/foreign ciphertext — silent drop
        };

        let request: Nip46Request = match serde_json::from_str(&plaintext) {
            Ok(r) => r,
            Err(_) => {
                self.publish_error(&active, &client_pubkey, "unknown", "invalid request payload").await;
                return;
            }
        };

        self.process_request(&key_name, &active, &client_pubkey, request).await;
    }

    /// Resolves the event's `p` tag to a key name. Locked keys have no
    /// in-memory pubkey to match against, so this only finds *active*
    /// keys directly — callers fall back to a DB-wide scan to still
    /// recognize (and queue) traffic for a locked key.
    fn resolve_key_name(&self, key_pubkey: &str) -> Option<String> {
        let names = self.db.list_key_names().ok()?;
        if let Some(name) = names.iter().find(|name| self.keystore.active_key(name).map(|a| a.pubkey_hex == key_pubkey).unwrap_or(false)) {
            return Some(name.clone());
        }
        names.into_iter().find(|name| {
            self.db.get_key(name).ok().flatten().and_then(|k| crate::codec::bech32::decode_npub(&k.npub).ok()).map(|bytes| event::hex_encode(&bytes) == key_pubkey).unwrap_or(false)
        })
    }

    async fn enqueue_locked(&self, key_name: &str, client_pubkey: &str, raw: &NostrEvent) {
        let Ok(Some(record)) = self.db.get_key(key_name) else { return };
        if matches!(record.encryption, KeyEncryption::None) {
            return; // shouldn't happen: plaintext keys are always active
        }
        let now = chrono::Utc::now();
        let id = Uuid::new_v4().to_string();
        let _ = self.db.insert_request(
            &id,
            key_name,
            "locked",
            &json!({"rawEventId": raw.id}).to_string(),
            client_pubkey,
            now,
            now + Duration::seconds(crate::atoms::constants::PENDING_REQUEST_TTL_SECS),
            true,
        );
        self.bus.publish(SignetEvent::RequestCreated { id });
    }

    async fn process_request(
        &self,
        key_name: &str,
        active: &crate::keystore::ActiveKey,
        client_pubkey: &str,
        request: Nip46Request,
    ) {
        let (method, kind) = parse_primary_param(&request.method, &request.params);
        let decision = self.acl.decide(key_name, client_pubkey, &method, kind);
        let decision = match decision {
            Ok(d) => d,
            Err(e) => {
                warn!("acl decision failed: {e}");
                return;
            }
        };

        match decision {
            AclDecision::Deny => {
                self.log_activity(key_name, client_pubkey, &method, kind, false, None).await;
                self.publish_error(active, client_pubkey, &request.id, "permission denied").await;
            }
            AclDecision::Escalate => {
                self.enqueue_pending(key_name, client_pubkey, &request, false).await;
            }
            AclDecision::AllowManualRecord => {
                self.execute_and_reply(key_name, active, client_pubkey, &request, Some(ApprovalType::Manual)).await;
            }
            AclDecision::AllowAuto(approval_type) => {
                self.execute_and_reply(key_name, active, client_pubkey, &request, Some(approval_type)).await;
            }
        }
    }

    async fn enqueue_pending(&self, key_name: &str, client_pubkey: &str, request: &Nip46Request, requires_password: bool) {
        let now = chrono::Utc::now();
        let id = Uuid::new_v4().to_string();
        let params_json = serde_json::to_string(&request.params).unwrap_or_default();
        let res = self.db.insert_request(
            &id,
            key_name,
            &request.method,
            &params_json,
            client_pubkey,
            now,
            now + Duration::seconds(crate::atoms::constants::PENDING_REQUEST_TTL_SECS),
            requires_password,
        );
        if res.is_ok() {
            self.bus.publish(SignetEvent::RequestCreated { id });
        }
    }

    /// Executes one of the dispatchable methods and publishes the NIP-46
    /// reply. Logging is rate-limited per (appId, method) for auto
    /// decisions only (§4.6); manual/denial outcomes always log.
    pub async fn execute_and_reply(
        &self,
        key_name: &str,
        active: &crate::keystore::ActiveKey,
        client_pubkey: &str,
        request: &Nip46Request,
        approval_type: Option<ApprovalType>,
    ) {
        let result = self.execute(key_name, active, client_pubkey, request).await;
        let auto = matches!(approval_type, Some(ApprovalType::AutoTrust) | Some(ApprovalType::AutoPermission));
        if !auto || self.should_log_auto(key_name, client_pubkey, &request.method) {
            let (method, kind) = parse_primary_param(&request.method, &request.params);
            self.log_activity(key_name, client_pubkey, &method, kind, auto, approval_type).await;
        }

        let reply_content = match result {
            Ok(value) => json!({"id": request.id, "result": value}),
            Err(e) => json!({"id": request.id, "error": e.as_nip46_error()}),
        };
        self.publish_reply(active, client_pubkey, reply_content).await;
    }

    fn should_log_auto(&self, key_name: &str, client_pubkey: &str, method: &str) -> bool {
        let Ok(Some(app)) = self.db.find_app(key_name, client_pubkey) else { return true };
        let since = chrono::Utc::now() - Duration::seconds(AUTO_APPROVAL_LOG_WINDOW_SECS);
        self.db
            .count_recent_auto_approvals(key_name, client_pubkey, method, since)
            .map(|n| n == 0)
            .unwrap_or(true)
            && app.id > 0
    }

    async fn execute(
        &self,
        key_name: &str,
        active: &crate::keystore::ActiveKey,
        client_pubkey: &str,
        request: &Nip46Request,
    ) -> SignetResult<Value> {
        match request.method.as_str() {
            "connect" => self.execute_connect(key_name, client_pubkey, &request.params).await,
            "ping" => Ok(json!("pong")),
            "get_public_key" => Ok(json!(active.pubkey_hex)),
            "sign_event" => {
                let raw = request.params.first().ok_or_else(|| SignetError::BadParams("missing event".into()))?;
                let mut parsed: Value = serde_json::from_str(raw).map_err(|_| SignetError::BadParams("invalid event json".into()))?;
                let kind = parsed.get("kind").and_then(|k| k.as_u64()).ok_or_else(|| SignetError::BadParams("missing kind".into()))? as u32;
                let content = parsed.get("content").and_then(|c| c.as_str()).unwrap_or_default().to_string();
                let tags: Vec<Vec<String>> = parsed.get("tags").and_then(|t| serde_json::from_value(t.clone()).ok()).unwrap_or_default();
                let signed = event::sign_event(&active.signing_key, &active.pubkey_hex, kind, tags, content)?;
                parsed = serde_json::to_value(&signed)?;
                Ok(Value::String(serde_json::to_string(&parsed)?))
            }
            "nip04_encrypt" | "encrypt" => {
                let (target, plaintext) = two_params(&request.params)?;
                Ok(json!(nip04::encrypt(&active.signing_key, &target, &plaintext)?))
            }
            "nip04_decrypt" | "decrypt" => {
                let (target, ciphertext) = two_params(&request.params)?;
                Ok(json!(nip04::decrypt(&active.signing_key, &target, &ciphertext)?))
            }
            "nip44_encrypt" => {
                let (target, plaintext) = two_params(&request.params)?;
                Ok(json!(nip44::encrypt(&active.signing_key, &target, &plaintext)?))
            }
            "nip44_decrypt" => {
                let (target, ciphertext) = two_params(&request.params)?;
                Ok(json!(nip44::decrypt(&active.signing_key, &target, &ciphertext)?))
            }
            other => Err(SignetError::UnknownMethod(other.to_string())),
        }
    }

    /// Carries out an approved PendingRequest after `AuthorizationQueue::approve`
    /// has flipped its row to `allowed = true` (§8 scenario 3). If the
    /// request required a password, it's used to unlock the key here; the
    /// unlock persists afterward (§9a), no one-shot code path exists.
    pub async fn execute_approved_request(&self, request_id: &str, password: Option<&str>) -> SignetResult<()> {
        let row = self.db.get_request(request_id)?.ok_or_else(|| SignetError::NotFound(request_id.to_string()))?;
        if row.requires_password {
            let password = password.ok_or_else(|| SignetError::BadParams("password required".into()))?;
            self.keystore.unlock(&row.key_name, password)?;
        }
        let active = self.keystore.active_key(&row.key_name)?;
        let params: Vec<String> = serde_json::from_str(&row.params).unwrap_or_default();
        let request = Nip46Request { id: row.id.clone(), method: row.method.clone(), params };
        self.execute_and_reply(&row.key_name, &active, &row.remote_pubkey, &request, Some(ApprovalType::Manual)).await;
        Ok(())
    }

    async fn execute_connect(&self, key_name: &str, client_pubkey: &str, params: &[String]) -> SignetResult<Value> {
        if let Some(secret) = params.first() {
            if !secret.is_empty() && self.db.claim_connection_token(secret, chrono::Utc::now())? {
                let _ = self.connections.confirm_token_claim(secret, key_name, client_pubkey);
            }
        }
        Ok(json!("ack"))
    }

    async fn publish_reply(&self, active: &crate::keystore::ActiveKey, client_pubkey: &str, reply_content: Value) {
        let content_json = reply_content.to_string();
        let encrypted = match nip04::encrypt(&active.signing_key, client_pubkey, &content_json) {
            Ok(c) => c,
            Err(e) => {
                warn!("failed to encrypt nip46 reply: {e}");
                return;
            }
        };
        let tags = event::nip46_reply_tags(client_pubkey);
        let event = match event::sign_event(&active.signing_key, &active.pubkey_hex, NIP46_KIND, tags, encrypted) {
            Ok(e) => e,
            Err(e) => {
                warn!("failed to sign nip46 reply: {e}");
                return;
            }
        };
        match self.relay.publish(&event).await {
            Ok(_) => {}
            Err(SignetError::PublishNoAck) => {
                warn!("nip46 reply to {client_pubkey} acknowledged by zero relays");
            }
            Err(e) => warn!("failed to publish nip46 reply: {e}"),
        }
    }

    async fn publish_error(&self, active: &crate::keystore::ActiveKey, client_pubkey: &str, id: &str, message: &str) {
        self.publish_reply(active, client_pubkey, json!({"id": id, "error": message})).await;
    }

    async fn log_activity(
        &self,
        key_name: &str,
        client_pubkey: &str,
        method: &str,
        kind: Option<u32>,
        auto_approved: bool,
        approval_type: Option<ApprovalType>,
    ) {
        let entry_type = if auto_approved {
            "auto_approved"
        } else if approval_type.is_some() {
            "approval"
        } else {
            "denial"
        };
        let _ = self.db.insert_log(entry_type, Some(method), kind, Some(key_name), Some(client_pubkey), None, auto_approved, approval_type);
    }
}

fn two_params(params: &[String]) -> SignetResult<(String, String)> {
    if params.len() < 2 {
        return Err(SignetError::BadParams("expected 2 params".into()));
    }
    Ok((params[0].clone(), params[1].clone()))
}

/// For `sign_event`, the primary param is the event's `kind` (parsed out
/// of params[0]'s JSON); for everything else there is none.
fn parse_primary_param(method: &str, params: &[String]) -> (String, Option<u32>) {
    if method != "sign_event" {
        return (method.to_string(), None);
    }
    let kind = params
        .first()
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .and_then(|v| v.get("kind").and_then(|k| k.as_u64()))
        .map(|k| k as u32);
    (method.to_string(), kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_primary_param_extracts_kind_for_sign_event() {
        let params = vec![json!({"kind": 1, "content": "hi", "tags": []}).to_string()];
        let (method, kind) = parse_primary_param("sign_event", &params);
        assert_eq!(method, "sign_event");
        assert_eq!(kind, Some(1));
    }

    #[test]
    fn parse_primary_param_none_for_other_methods() {
        let (_, kind) = parse_primary_param("ping", &[]);
        assert_eq!(kind, None);
    }

    #[test]
    fn two_params_requires_both() {
        assert!(two_params(&["only-one".to_string()]).is_err());
        assert!(two_params(&["a".to_string(), "b".to_string()]).is_ok());
    }

    #[tokio::test]
    async fn execute_approved_request_unlocks_and_replies() {
        use crate::acl::AclEngine;
        use crate::connection::ConnectionService;
        use crate::db::Db;
        use crate::keystore::KeyStore;
        use crate::relay::RelayPool;

        let db = Arc::new(Db::open_in_memory().unwrap());
        let keystore = Arc::new(KeyStore::new(db.clone()));
        let acl = Arc::new(AclEngine::new(db.clone()));
        let bus = Arc::new(EventBus::new());
        let relay = RelayPool::new(vec![], bus.clone());
        let connections = Arc::new(ConnectionService::new(db.clone()));
        let pipeline = RequestPipeline::new(db.clone(), keystore.clone(), acl, relay, bus, connections);

        keystore.create_key("alice", [7u8; 32], Some("correct horse battery")).unwrap();
        let now = chrono::Utc::now();
        db.insert_request(
            "req-1",
            "alice",
            "get_public_key",
            &json!([]).to_string(),
            "deadbeef",
            now,
            now + Duration::seconds(60),
            true,
        )
        .unwrap();

        assert!(pipeline.execute_approved_request("req-1", None).await.is_err());
        pipeline.execute_approved_request("req-1", Some("correct horse battery")).await.unwrap();
        assert!(keystore.is_active("alice"));
    }
}
