// ── Codec: NIP-04 encrypted payloads (AES-256-CBC, ECDH-derived key) ──────
//
// Grounded on engine/nostr/crypto.rs's compute_shared_secret / nip04_encrypt
// / nip04_decrypt: ECDH over secp256k1 using the BIP-340 x-only public key
// reconstructed as a compressed SEC1 point (prefix 0x02), content format
// `base64(ciphertext)?iv=base64(iv)`.

use crate::atoms::error::{SignetError, SignetResult};
use crate::codec::event::hex_decode;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine};
use k256::elliptic_curve::ecdh::diffie_hellman;
use k256::elliptic_curve::sec1::FromEncodedPoint;
use k256::{AffinePoint, EncodedPoint, PublicKey, Scalar};
use k256::elliptic_curve::scalar::FromUintUnchecked;
use k256::schnorr::SigningKey;
use rand_core::{OsRng, RngCore};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Computes the ECDH shared secret used as the AES key: our secret scalar
/// times their x-only public key, reconstructed as a compressed SEC1 point.
pub fn compute_shared_secret(secret_key: &SigningKey, their_pubkey_hex: &str) -> SignetResult<[u8; 32]> {
    let their_pubkey_bytes = hex_decode(their_pubkey_hex)?;
    if their_pubkey_bytes.len() != 32 {
        return Err(SignetError::InvalidEncoding("pubkey must be 32 bytes (x-only)".into()));
    }
    let mut compressed = vec![0x02u8];
    compressed.extend_from_slice(&their_pubkey_bytes);
    let encoded = EncodedPoint::from_bytes(&compressed)
        .map_err(|_| SignetError::InvalidEncoding("invalid public key point".into()))?;
    let their_point = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or_else(|| SignetError::InvalidEncoding("public key not on curve".into()))?;
    let their_public = PublicKey::from_affine(their_point)
        .map_err(|_| SignetError::InvalidEncoding("invalid public key".into()))?;

    let scalar = Scalar::from_uint_unchecked(k256::U256::from_be_slice(&secret_key.to_bytes()));
    let our_secret = k256::ecdh::EphemeralSecret::from(k256::NonZeroScalar::new(scalar).unwrap());
    let shared = diffie_hellman(our_secret.as_nonzero_scalar(), their_public.as_affine());
    let shared_bytes = shared.raw_secret_bytes();
    let mut key = [0u8; 32];
    key.copy_from_slice(&shared_bytes[..32]);
    Ok(key)
}

pub fn encrypt(secret_key: &SigningKey, their_pubkey_hex: &str, plaintext: &str) -> SignetResult<String> {
    let key = compute_shared_secret(secret_key, their_pubkey_hex)?;
    let mut iv = [0u8; 16];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new(&key.into(), &iv.into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    Ok(format!("{}?iv={}", STANDARD.encode(ciphertext), STANDARD.encode(iv)))
}

pub fn decrypt(secret_key: &SigningKey, their_pubkey_hex: &str, content: &str) -> SignetResult<String> {
    let (ciphertext_b64, iv_b64) = content
        .split_once("?iv=")
        .ok_or_else(|| SignetError::MalformedEvent("nip04 content missing ?iv= suffix".into()))?;

    let ciphertext = STANDARD
        .decode(ciphertext_b64)
        .map_err(|_| SignetError::MalformedEvent("invalid base64 ciphertext".into()))?;
    let iv = STANDARD
        .decode(iv_b64)
        .map_err(|_| SignetError::MalformedEvent("invalid base64 iv".into()))?;
    if iv.len() != 16 {
        return Err(SignetError::MalformedEvent("iv must be 16 bytes".into()));
    }

    let key = compute_shared_secret(secret_key, their_pubkey_hex)?;
    let cipher = Aes256CbcDec::new(&key.into(), iv.as_slice().into());
    let mut buf = ciphertext;
    let plaintext = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| SignetError::MalformedEvent("nip04 decrypt/padding failure".into()))?;
    String::from_utf8(plaintext.to_vec()).map_err(|_| SignetError::MalformedEvent("decrypted payload is not UTF-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::schnorr::SigningKey;

    #[test]
    fn roundtrip() {
        let alice = SigningKey::random(&mut OsRng);
        let bob = SigningKey::random(&mut OsRng);
        let bob_pub = crate::codec::event::derive_pubkey(&bob);
        let alice_pub = crate::codec::event::derive_pubkey(&alice);

        let ciphertext = encrypt(&alice, &bob_pub, "hello bob").unwrap();
        // Bob decrypts using Alice's pubkey — ECDH is symmetric in the shared point.
        let plaintext = decrypt(&bob, &alice_pub, &ciphertext).unwrap();
        assert_eq!(plaintext, "hello bob");
    }

    #[test]
    fn malformed_content_errors() {
        let alice = SigningKey::random(&mut OsRng);
        let bob_pub = crate::codec::event::derive_pubkey(&SigningKey::random(&mut OsRng));
        assert!(decrypt(&alice, &bob_pub, "not-valid-content").is_err());
    }
}
