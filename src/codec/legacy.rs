// ── Codec: legacy at-rest format (PBKDF2-HMAC-SHA256 + AES-256-GCM) ───────
//
// Internal, non-portable format kept only for reading existing keys and
// one-way migration to NIP-49 (§6). Envelope: salt(16) || nonce(12) ||
// ciphertext || tag(16); base64-encoded for DB storage.

use crate::atoms::error::{SignetError, SignetResult};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use pbkdf2::pbkdf2_hmac;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroize;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const PBKDF2_ITERS: u32 = 100_000;

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERS, &mut key);
    key
}

/// Encrypts a secret key, returning the base64-encoded legacy envelope.
/// Only used by `KeyStore::encrypt`/`migrate` when re-wrapping; never
/// chosen for newly created keys (§4.2).
pub fn encrypt(secret_key_bytes: &[u8; 32], passphrase: &str) -> SignetResult<String> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut key = derive_key(passphrase, &salt);
    let cipher = Aes256Gcm::new((&key).into());
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: secret_key_bytes, aad: &[] })
        .map_err(|_| SignetError::Unexpected("legacy encryption failed".into()))?;
    key.zeroize();

    let mut envelope = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(envelope))
}

pub fn decrypt(envelope_b64: &str, passphrase: &str) -> SignetResult<[u8; 32]> {
    let envelope = STANDARD
        .decode(envelope_b64)
        .map_err(|_| SignetError::CiphertextCorrupt("legacy envelope is not valid base64".into()))?;
    if envelope.len() < SALT_LEN + NONCE_LEN + 16 {
        return Err(SignetError::CiphertextCorrupt("legacy envelope too short".into()));
    }
    let salt = &envelope[0..SALT_LEN];
    let nonce = &envelope[SALT_LEN..SALT_LEN + NONCE_LEN];
    let ciphertext = &envelope[SALT_LEN + NONCE_LEN..];

    let mut key = derive_key(passphrase, salt);
    let cipher = Aes256Gcm::new((&key).into());
    let result = cipher.decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: &[] });
    key.zeroize();

    let plaintext = result.map_err(|_| SignetError::WrongPassphrase { attempts_remaining: 0 })?;
    if plaintext.len() != 32 {
        return Err(SignetError::CiphertextCorrupt("decrypted key is not 32 bytes".into()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&plaintext);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let secret = [9u8; 32];
        let envelope = encrypt(&secret, "legacy-pass").unwrap();
        assert_eq!(decrypt(&envelope, "legacy-pass").unwrap(), secret);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let secret = [9u8; 32];
        let envelope = encrypt(&secret, "right").unwrap();
        assert!(decrypt(&envelope, "wrong").is_err());
    }
}
