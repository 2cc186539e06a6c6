// ── Codec: Nostr event construction, canonicalization, id, Schnorr sign/verify ─
//
// Grounded on the teacher's hand-rolled NIP-01 signing (engine/nostr/crypto.rs):
// canonical id is sha256(json([0, pubkey, created_at, kind, tags, content])),
// and signatures are BIP-340 Schnorr over that id via k256.

use crate::atoms::error::{SignetError, SignetResult};
use k256::schnorr::signature::{Signer, Verifier};
use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NostrEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

/// Computes the canonical NIP-01 event id: sha256 of the fixed-order,
/// unescaped-slash JSON array `[0, pubkey, created_at, kind, tags, content]`.
pub fn compute_id(pubkey_hex: &str, created_at: i64, kind: u32, tags: &[Vec<String>], content: &str) -> String {
    let arr = json!([0, pubkey_hex, created_at, kind, tags, content]);
    let serialized = serde_json::to_string(&arr).unwrap_or_default();
    let digest = Sha256::digest(serialized.as_bytes());
    hex_encode(&digest)
}

/// Builds and signs a complete event from a secret key.
pub fn sign_event(
    secret_key: &SigningKey,
    pubkey_hex: &str,
    kind: u32,
    tags: Vec<Vec<String>>,
    content: String,
) -> SignetResult<NostrEvent> {
    let created_at = chrono::Utc::now().timestamp();
    let id = compute_id(pubkey_hex, created_at, kind, &tags, &content);
    let id_bytes = hex_decode(&id)?;
    let sig: Signature = secret_key
        .try_sign(&id_bytes)
        .map_err(|e| SignetError::Unexpected(format!("signing failed: {e}")))?;
    Ok(NostrEvent {
        id,
        pubkey: pubkey_hex.to_string(),
        created_at,
        kind,
        tags,
        content,
        sig: hex_encode(&sig.to_bytes()),
    })
}

/// Verifies both the id (recomputed) and the Schnorr signature.
pub fn verify_event(event: &NostrEvent) -> SignetResult<()> {
    let expected_id = compute_id(&event.pubkey, event.created_at, event.kind, &event.tags, &event.content);
    if expected_id != event.id {
        return Err(SignetError::MalformedEvent("id does not match event contents".into()));
    }
    let pubkey_bytes = hex_decode(&event.pubkey)?;
    let verifying_key = VerifyingKey::from_bytes(&pubkey_bytes)
        .map_err(|_| SignetError::BadSignature)?;
    let sig_bytes = hex_decode(&event.sig)?;
    let sig = Signature::try_from(sig_bytes.as_slice()).map_err(|_| SignetError::BadSignature)?;
    let id_bytes = hex_decode(&event.id)?;
    verifying_key
        .verify(&id_bytes, &sig)
        .map_err(|_| SignetError::BadSignature)
}

/// Derives the BIP-340 x-only public key (hex) for a secret key. Always
/// derive through this helper — never reconstruct a pubkey from request
/// context (see the NIP-17 design note on reply-pubkey correctness).
pub fn derive_pubkey(secret_key: &SigningKey) -> String {
    hex_encode(&secret_key.verifying_key().to_bytes())
}

/// Builds a reply tag set for a NIP-46 (kind 24133) response: tag the
/// client with `p` only — NIP-46 replies don't thread via `e`.
pub fn nip46_reply_tags(client_pubkey: &str) -> Vec<Vec<String>> {
    vec![vec!["p".to_string(), client_pubkey.to_string()]]
}

pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn hex_decode(s: &str) -> SignetResult<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(SignetError::InvalidEncoding("odd-length hex string".into()));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| SignetError::InvalidEncoding("invalid hex digit".into()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::schnorr::SigningKey;
    use rand_core::OsRng;

    fn test_keypair() -> (SigningKey, String) {
        let sk = SigningKey::random(&mut OsRng);
        let pk_hex = hex_encode(&sk.verifying_key().to_bytes());
        (sk, pk_hex)
    }

    #[test]
    fn hex_encode_decode_roundtrip() {
        let bytes = vec![0u8, 1, 255, 16, 32];
        let hex = hex_encode(&bytes);
        assert_eq!(hex_decode(&hex).unwrap(), bytes);
    }

    #[test]
    fn hex_decode_odd_length_errors() {
        assert!(hex_decode("abc").is_err());
    }

    #[test]
    fn sign_event_verifies() {
        let (sk, pk) = test_keypair();
        let event = sign_event(&sk, &pk, 1, vec![], "hello".into()).unwrap();
        assert!(verify_event(&event).is_ok());
    }

    #[test]
    fn tampered_content_fails_verification() {
        let (sk, pk) = test_keypair();
        let mut event = sign_event(&sk, &pk, 1, vec![], "hello".into()).unwrap();
        event.content = "goodbye".into();
        assert!(verify_event(&event).is_err());
    }

    #[test]
    fn compute_id_deterministic() {
        let id1 = compute_id("abc", 100, 1, &[], "hi");
        let id2 = compute_id("abc", 100, 1, &[], "hi");
        assert_eq!(id1, id2);
    }
}
