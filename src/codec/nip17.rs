// ── Codec: NIP-17 gift-wrapped DMs (kind 1059 wrap → kind 13 seal → kind 14 rumor) ─
//
// Used by KillSwitch (C9) to accept/send admin commands over gift-wrapped
// DMs as an alternative to plain NIP-04. Built on nip44 payload encryption
// (the wire format NIP-17 mandates) and event.rs's signing primitives.
//
// Design-note decision (SPEC_FULL.md §9b): the daemon always derives its
// own pubkey via `event::derive_pubkey`, never from request/import context.
// The gift wrap is signed by a random, disposable key (per NIP-59) so the
// wrap itself leaks no metadata about either party.

use crate::atoms::error::{SignetError, SignetResult};
use crate::codec::event::{self, NostrEvent};
use crate::codec::nip44;
use k256::schnorr::SigningKey;
use rand_core::OsRng;
use serde_json::json;

/// The unsigned kind-14 DM content, before sealing.
#[derive(Debug, Clone)]
pub struct Rumor {
    pub pubkey: String,
    pub created_at: i64,
    pub content: String,
    pub tags: Vec<Vec<String>>,
}

/// Builds and gift-wraps a DM from `sender` to `recipient_pubkey`:
/// rumor (kind 14, unsigned) → seal (kind 13, signed by sender, NIP-44
/// encrypted to recipient) → wrap (kind 1059, signed by an ephemeral key,
/// NIP-44 encrypted to recipient).
pub fn wrap_dm(sender: &SigningKey, recipient_pubkey: &str, content: &str) -> SignetResult<NostrEvent> {
    let sender_pubkey = event::derive_pubkey(sender);
    let rumor = Rumor {
        pubkey: sender_pubkey.clone(),
        created_at: chrono::Utc::now().timestamp(),
        content: content.to_string(),
        tags: vec![vec!["p".to_string(), recipient_pubkey.to_string()]],
    };
    let rumor_json = json!({
        "pubkey": rumor.pubkey,
        "created_at": rumor.created_at,
        "kind": 14,
        "tags": rumor.tags,
        "content": rumor.content,
    })
    .to_string();

    let seal_content = nip44::encrypt(sender, recipient_pubkey, &rumor_json)?;
    let seal = event::sign_event(sender, &sender_pubkey, 13, vec![], seal_content)?;
    let seal_json = serde_json::to_string(&seal)?;

    let ephemeral = SigningKey::random(&mut OsRng);
    let ephemeral_pubkey = event::derive_pubkey(&ephemeral);
    let wrap_content = nip44::encrypt(&ephemeral, recipient_pubkey, &seal_json)?;
    let wrap = event::sign_event(
        &ephemeral,
        &ephemeral_pubkey,
        1059,
        vec![vec!["p".to_string(), recipient_pubkey.to_string()]],
        wrap_content,
    )?;
    Ok(wrap)
}

/// Reverses `wrap_dm`: unwrap → unseal → rumor. Returns the rumor together
/// with the sender pubkey asserted by the seal (verified against the
/// seal's own signature, not trusted from the rumor's self-reported field).
pub fn unwrap_dm(recipient: &SigningKey, wrap: &NostrEvent) -> SignetResult<Rumor> {
    if wrap.kind != 1059 {
        return Err(SignetError::MalformedEvent("expected kind 1059 gift wrap".into()));
    }
    let seal_json = nip44::decrypt(recipient, &wrap.pubkey, &wrap.content)?;
    let seal: NostrEvent = serde_json::from_str(&seal_json)
        .map_err(|_| SignetError::MalformedEvent("gift wrap did not contain a valid seal event".into()))?;
    if seal.kind != 13 {
        return Err(SignetError::MalformedEvent("expected kind 13 seal".into()));
    }
    event::verify_event(&seal)?;

    let rumor_json = nip44::decrypt(recipient, &seal.pubkey, &seal.content)?;
    let parsed: serde_json::Value = serde_json::from_str(&rumor_json)
        .map_err(|_| SignetError::MalformedEvent("seal did not contain a valid rumor".into()))?;
    let pubkey = parsed["pubkey"]
        .as_str()
        .ok_or_else(|| SignetError::MalformedEvent("rumor missing pubkey".into()))?
        .to_string();
    if pubkey != seal.pubkey {
        return Err(SignetError::MalformedEvent("rumor pubkey does not match seal author".into()));
    }
    Ok(Rumor {
        pubkey,
        created_at: parsed["created_at"].as_i64().unwrap_or_default(),
        content: parsed["content"].as_str().unwrap_or_default().to_string(),
        tags: serde_json::from_value(parsed["tags"].clone()).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gift_wrap_round_trip_recovers_rumor() {
        let admin = SigningKey::random(&mut OsRng);
        let daemon = SigningKey::random(&mut OsRng);
        let daemon_pubkey = event::derive_pubkey(&daemon);

        let wrap = wrap_dm(&admin, &daemon_pubkey, "panic").unwrap();
        assert_eq!(wrap.kind, 1059);

        let rumor = unwrap_dm(&daemon, &wrap).unwrap();
        assert_eq!(rumor.content, "panic");
        assert_eq!(rumor.pubkey, event::derive_pubkey(&admin));
    }

    #[test]
    fn wrap_is_not_signed_by_sender_or_recipient() {
        let admin = SigningKey::random(&mut OsRng);
        let daemon = SigningKey::random(&mut OsRng);
        let daemon_pubkey = event::derive_pubkey(&daemon);
        let wrap = wrap_dm(&admin, &daemon_pubkey, "status").unwrap();

        assert_ne!(wrap.pubkey, event::derive_pubkey(&admin));
        assert_ne!(wrap.pubkey, daemon_pubkey);
    }
}
