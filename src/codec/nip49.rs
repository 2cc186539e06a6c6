// ── Codec: NIP-49 at-rest key encryption (scrypt + XChaCha20-Poly1305) ────
//
// Envelope per spec §6: version(1) || log_n(1) || salt(16) || nonce(24) ||
// ciphertext || tag(16), bech32-encoded with HRP "ncryptsec". scrypt and
// chacha20poly1305 are enrichment crates not present in the teacher —
// grounded on VectorPrivacy-Vector's use of chacha20poly1305/argon2 for the
// same class of problem (passphrase-derived symmetric key wrapping a secret).

use crate::atoms::constants::NIP49_DEFAULT_LOG_N;
use crate::atoms::error::{SignetError, SignetResult};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand_core::{OsRng, RngCore};
use scrypt::Params;
use zeroize::Zeroize;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
/// AEAD associated data, matching NIP-49 (a single byte tagging the key's
/// intended use — 0x00 means "sign_event or generic use").
const AAD: &[u8] = &[0x00];

fn derive_key(passphrase: &str, salt: &[u8], log_n: u8) -> SignetResult<[u8; 32]> {
    let params = Params::new(log_n, 8, 1, 32)
        .map_err(|e| SignetError::KdfFailure(format!("invalid scrypt params: {e}")))?;
    let mut out = [0u8; 32];
    scrypt::scrypt(passphrase.as_bytes(), salt, &params, &mut out)
        .map_err(|e| SignetError::KdfFailure(format!("scrypt failed: {e}")))?;
    Ok(out)
}

/// Encrypts a 32-byte secret key to the raw NIP-49 envelope bytes (pre-bech32).
pub fn encrypt_envelope(secret_key_bytes: &[u8; 32], passphrase: &str, log_n: u8) -> SignetResult<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut key = derive_key(passphrase, &salt, log_n)?;
    let cipher = XChaCha20Poly1305::new((&key).into());
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), Payload { msg: secret_key_bytes, aad: AAD })
        .map_err(|_| SignetError::Unexpected("nip49 encryption failed".into()))?;
    key.zeroize();

    let mut envelope = Vec::with_capacity(1 + 1 + SALT_LEN + NONCE_LEN + ciphertext.len());
    envelope.push(2u8); // version
    envelope.push(log_n);
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Decrypts a raw NIP-49 envelope back to the 32-byte secret key.
/// The scrypt `log_n` stored in the envelope is always honored, even when
/// higher than `NIP49_DEFAULT_LOG_N` (§4.1 edge case) — never downgraded.
pub fn decrypt_envelope(envelope: &[u8], passphrase: &str) -> SignetResult<[u8; 32]> {
    if envelope.len() < 2 + SALT_LEN + NONCE_LEN + 16 {
        return Err(SignetError::CiphertextCorrupt("ncryptsec envelope too short".into()));
    }
    let version = envelope[0];
    if version != 2 {
        return Err(SignetError::CiphertextCorrupt(format!("unsupported ncryptsec version {version}")));
    }
    let log_n = envelope[1];
    let salt = &envelope[2..2 + SALT_LEN];
    let nonce = &envelope[2 + SALT_LEN..2 + SALT_LEN + NONCE_LEN];
    let ciphertext = &envelope[2 + SALT_LEN + NONCE_LEN..];

    let mut key = derive_key(passphrase, salt, log_n)?;
    let cipher = XChaCha20Poly1305::new((&key).into());
    let result = cipher.decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad: AAD });
    key.zeroize();

    let plaintext = result.map_err(|_| SignetError::WrongPassphrase { attempts_remaining: 0 })?;
    if plaintext.len() != 32 {
        return Err(SignetError::CiphertextCorrupt("decrypted key is not 32 bytes".into()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&plaintext);
    Ok(out)
}

pub fn default_log_n() -> u8 {
    NIP49_DEFAULT_LOG_N
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let secret = [7u8; 32];
        let envelope = encrypt_envelope(&secret, "correct horse battery staple", 12).unwrap();
        let decrypted = decrypt_envelope(&envelope, "correct horse battery staple").unwrap();
        assert_eq!(secret, decrypted);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let secret = [7u8; 32];
        let envelope = encrypt_envelope(&secret, "right passphrase", 12).unwrap();
        let err = decrypt_envelope(&envelope, "wrong passphrase").unwrap_err();
        assert!(matches!(err, SignetError::WrongPassphrase { .. }));
    }

    #[test]
    fn honors_stored_log_n() {
        let secret = [3u8; 32];
        // Use a log_n above the current default; must still round-trip.
        let envelope = encrypt_envelope(&secret, "pw", NIP49_DEFAULT_LOG_N + 1).unwrap();
        assert_eq!(envelope[1], NIP49_DEFAULT_LOG_N + 1);
        assert_eq!(decrypt_envelope(&envelope, "pw").unwrap(), secret);
    }
}
