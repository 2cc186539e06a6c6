//! ConnectionService (C8) — mints Bunker URIs, parses NostrConnect URIs,
//! and converges both onto the same connect-approval semantics as a
//! relay-initiated `connect` RPC.
//!
//! Grounded on the Bunker URI shape from PlebOne-Pleb_Signer's connection
//! handling (query-string relay list + one-time secret), adapted to
//! Signet's `ConnectionToken` persistence (`db::connection_tokens`).

use crate::atoms::constants::CONNECTION_TOKEN_TTL_SECS;
use crate::atoms::error::{SignetError, SignetResult};
use crate::atoms::types::RequestedPermission;
use crate::db::Db;
use chrono::Duration;
use rand_core::{OsRng, RngCore};
use std::sync::Arc;
use url::Url;

pub struct ConnectionService {
    db: Arc<Db>,
}

impl ConnectionService {
    pub fn new(db: Arc<Db>) -> Self {
        ConnectionService { db }
    }

    /// Mints a one-time, single-use connection token and the full
    /// `bunker://` URI for a key.
    pub fn mint_bunker_uri(&self, key_name: &str, key_pubkey: &str, relays: &[String]) -> SignetResult<String> {
        let mut token_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut token_bytes);
        let token = crate::codec::event::hex_encode(&token_bytes);
        let expires_at = chrono::Utc::now() + Duration::seconds(CONNECTION_TOKEN_TTL_SECS);
        self.db.insert_connection_token(&token, key_name, expires_at)?;

        let mut uri = format!("bunker://{key_pubkey}?");
        for relay in relays {
            uri.push_str(&format!("relay={}&", urlencoding::encode(relay)));
        }
        uri.push_str(&format!("secret={token}"));
        Ok(uri)
    }

    /// Records that a one-time token was consumed by a `connect` RPC from
    /// `client_pubkey` — called after `Db::claim_connection_token` already
    /// flipped the token to used, so this only needs to tie it to the app.
    pub fn confirm_token_claim(&self, token: &str, key_name: &str, client_pubkey: &str) -> SignetResult<()> {
        let record = self.db.get_connection_token(token)?.ok_or_else(|| SignetError::NotFound("connection token".into()))?;
        if record.key_name != key_name {
            return Err(SignetError::PermissionDenied);
        }
        self.db.create_app(key_name, client_pubkey, Some("bunker connect"))?;
        Ok(())
    }

    /// Parses a `nostrconnect://<clientPubkey>?relay=...&secret=...&perms=...&name=...&url=...`
    /// URI. Validates pubkey hex length, relay URL shape, and permission
    /// grammar (`<method>` or `sign_event:<kind>`).
    pub fn parse_nostrconnect_uri(&self, uri: &str) -> SignetResult<NostrConnectRequest> {
        let parsed = Url::parse(uri).map_err(|e| SignetError::BadParams(format!("invalid nostrconnect uri: {e}")))?;
        if parsed.scheme() != "nostrconnect" {
            return Err(SignetError::BadParams("expected nostrconnect:// scheme".into()));
        }
        let client_pubkey = parsed.host_str().unwrap_or_default().to_string();
        if client_pubkey.len() != 64 || !client_pubkey.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SignetError::BadParams("client pubkey must be 64 hex chars".into()));
        }

        let mut relays = Vec::new();
        let mut secret = None;
        let mut perms = Vec::new();
        let mut name = None;
        let mut url = None;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "relay" => {
                    let relay_url = Url::parse(&value).map_err(|_| SignetError::BadParams(format!("invalid relay url: {value}")))?;
                    if relay_url.scheme() != "wss" && relay_url.scheme() != "ws" {
                        return Err(SignetError::BadParams(format!("relay must be ws(s)://: {value}")));
                    }
                    relays.push(value.to_string());
                }
                "secret" => secret = Some(value.to_string()),
                "perms" => perms = parse_perms(&value)?,
                "name" => name = Some(value.to_string()),
                "url" => url = Some(value.to_string()),
                _ => {}
            }
        }
        if relays.is_empty() {
            return Err(SignetError::BadParams("nostrconnect uri requires at least one relay".into()));
        }

        Ok(NostrConnectRequest { client_pubkey, relays, secret, perms, name, url })
    }
}

fn parse_perms(raw: &str) -> SignetResult<Vec<RequestedPermission>> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|token| {
            if let Some((method, kind)) = token.split_once(':') {
                if method != "sign_event" {
                    return Err(SignetError::BadParams(format!("unexpected scoped permission: {token}")));
                }
                let kind = kind.parse::<u32>().map_err(|_| SignetError::BadParams(format!("invalid kind in permission: {token}")))?;
                Ok(RequestedPermission { method: method.to_string(), kind: Some(kind) })
            } else {
                Ok(RequestedPermission { method: token.to_string(), kind: None })
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct NostrConnectRequest {
    pub client_pubkey: String,
    pub relays: Vec<String>,
    pub secret: Option<String>,
    pub perms: Vec<RequestedPermission>,
    pub name: Option<String>,
    pub url: Option<String>,
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
    fn mint_and_claim_bunker_token() {
        let db = seeded_db();
        let svc = ConnectionService::new(db.clone());
        let uri = svc.mint_bunker_uri("alice", &"a".repeat(64), &["wss://relay.example".to_string()]).unwrap();
        assert!(uri.starts_with("bunker://"));
        assert!(uri.contains("secret="));
    }

    #[test]
    fn parse_nostrconnect_uri_extracts_fields() {
        let db = seeded_db();
        let svc = ConnectionService::new(db);
        let pubkey = "a".repeat(64);
        let uri = format!(
            "nostrconnect://{pubkey}?relay=wss%3A%2F%2Frelay.example&secret=tok123&perms=connect%2Csign_event%3A1&name=TestApp"
        );
        let req = svc.parse_nostrconnect_uri(&uri).unwrap();
        assert_eq!(req.client_pubkey, pubkey);
        assert_eq!(req.relays, vec!["wss://relay.example"]);
        assert_eq!(req.secret.as_deref(), Some("tok123"));
        assert_eq!(req.perms.len(), 2);
        assert_eq!(req.perms[1].kind, Some(1));
        assert_eq!(req.name.as_deref(), Some("TestApp"));
    }

    #[test]
    fn parse_nostrconnect_uri_rejects_bad_pubkey() {
        let db = seeded_db();
        let svc = ConnectionService::new(db);
        let uri = "nostrconnect://notapubkey?relay=wss%3A%2F%2Frelay.example";
        assert!(svc.parse_nostrconnect_uri(uri).is_err());
    }

    #[test]
    fn parse_nostrconnect_uri_requires_relay() {
        let db = seeded_db();
        let svc = ConnectionService::new(db);
        let uri = format!("nostrconnect://{}", "a".repeat(64));
        assert!(svc.parse_nostrconnect_uri(&uri).is_err());
    }
}
