//! KeyStore (C2) — owns the secret key material: a persisted row per key
//! (`keys_config`) plus an in-memory table of unlocked signing keys.
//!
//! Grounded on engine/sessions/mod.rs's `SessionStore` shape (persisted
//! handle behind a `Mutex<Connection>`) for the persisted half, and on
//! engine/channels/access.rs's approve/deny vocabulary for the lifecycle
//! operations (create/unlock/lock/rename/delete). Encryption itself is
//! delegated to `codec::{nip49, legacy}`.

use crate::atoms::constants::{MIN_PASSPHRASE_LEN, NIP49_DEFAULT_LOG_N};
use crate::atoms::error::{SignetError, SignetResult};
use crate::atoms::types::{KeyEncryption, KeySummary};
use crate::codec::event;
use crate::codec::{legacy, nip49};
use crate::db::Db;
use k256::schnorr::SigningKey;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// An unlocked signing key held in memory. Dropping this zeroizes the
/// underlying scalar (`k256::schnorr::SigningKey` implements `Zeroize`
/// via its inner `NonZeroScalar`).
#[derive(Clone)]
pub struct ActiveKey {
    pub name: String,
    pub pubkey_hex: String,
    pub signing_key: Arc<SigningKey>,
}

/// Fired whenever a key transitions between locked/unlocked so the event
/// bus (C11) and audit log (C12) can react without KeyStore depending on
/// either.
#[derive(Debug, Clone)]
pub enum KeyStoreEvent {
    Activated { key_name: String },
    Locked { key_name: String },
    Created { key_name: String },
    Renamed { old_name: String, new_name: String },
    Deleted { key_name: String },
}

pub struct KeyStore {
    db: Arc<Db>,
    active: RwLock<HashMap<String, ActiveKey>>,
    events: tokio::sync::broadcast::Sender<KeyStoreEvent>,
}

impl KeyStore {
    pub fn new(db: Arc<Db>) -> Self {
        let (tx, _rx) = tokio::sync::broadcast::channel(256);
        KeyStore { db, active: RwLock::new(HashMap::new()), events: tx }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<KeyStoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: KeyStoreEvent) {
        let _ = self.events.send(event);
    }

    /// Creates a new key. `secret_key_bytes` is either freshly generated by
    /// the caller (import flow passes an existing one) or random. When
    /// `passphrase` is `None` the key is stored in the clear (`encryption:
    /// none`, §4.1) and activated immediately; otherwise it's wrapped with
    /// NIP-49 and left locked.
    pub fn create_key(
        &self,
        name: &str,
        secret_key_bytes: [u8; 32],
        passphrase: Option<&str>,
    ) -> SignetResult<String> {
        if let Some(p) = passphrase {
            validate_passphrase(p)?;
        }
        let signing_key = SigningKey::from_bytes(&secret_key_bytes)
            .map_err(|e| SignetError::InvalidEncoding(format!("invalid secret key: {e}")))?;
        let pubkey_hex = event::derive_pubkey(&signing_key);
        let npub = crate::codec::bech32::encode_npub(&pubkey_to_array(&pubkey_hex)?)?;

        match passphrase {
            None => {
                let nsec = crate::codec::bech32::encode_nsec(&secret_key_bytes)?;
                self.db.insert_key(name, &npub, KeyEncryption::None, None, Some(&nsec))?;
                self.active.write().insert(
                    name.to_string(),
                    ActiveKey { name: name.to_string(), pubkey_hex: pubkey_hex.clone(), signing_key: Arc::new(signing_key) },
                );
                self.emit(KeyStoreEvent::Activated { key_name: name.to_string() });
            }
            Some(p) => {
                let envelope = nip49::encrypt_envelope(&secret_key_bytes, p, NIP49_DEFAULT_LOG_N)?;
                let ncryptsec = crate::codec::bech32::encode_ncryptsec(&envelope)?;
                self.db.insert_key(name, &npub, KeyEncryption::ScryptXchacha20Poly1305, Some(&ncryptsec), None)?;
            }
        }
        self.emit(KeyStoreEvent::Created { key_name: name.to_string() });
        Ok(npub)
    }

    /// Unlocks a key and keeps it active until explicitly locked (§9a:
    /// persistent unlock, not single-use). Wrong-passphrase attempts don't
    /// currently track a remaining-attempts counter at the key level — that
    /// accounting lives on the dead-man-switch reset path, not here.
    pub fn unlock(&self, name: &str, passphrase: &str) -> SignetResult<String> {
        let record = self.db.get_key(name)?.ok_or_else(|| SignetError::NotFound(name.to_string()))?;
        let secret_bytes = match record.encryption {
            KeyEncryption::None => return Err(SignetError::NotEncrypted(name.to_string())),
            KeyEncryption::ScryptXchacha20Poly1305 => {
                let ncryptsec = record.ciphertext.ok_or_else(|| SignetError::CiphertextCorrupt("missing ciphertext".into()))?;
                let envelope = crate::codec::bech32::decode_ncryptsec(&ncryptsec)?;
                nip49::decrypt_envelope(&envelope, passphrase)?
            }
            KeyEncryption::LegacyPbkdf2Aes256Gcm => {
                let envelope = record.ciphertext.ok_or_else(|| SignetError::CiphertextCorrupt("missing ciphertext".into()))?;
                legacy::decrypt(&envelope, passphrase)?
            }
        };
        let signing_key = SigningKey::from_bytes(&secret_bytes)
            .map_err(|e| SignetError::InvalidEncoding(format!("invalid secret key: {e}")))?;
        let pubkey_hex = event::derive_pubkey(&signing_key);
        self.active.write().insert(
            name.to_string(),
            ActiveKey { name: name.to_string(), pubkey_hex: pubkey_hex.clone(), signing_key: Arc::new(signing_key) },
        );
        self.emit(KeyStoreEvent::Activated { key_name: name.to_string() });
        Ok(pubkey_hex)
    }

    pub fn lock(&self, name: &str) -> SignetResult<()> {
        let record = self.db.get_key(name)?.ok_or_else(|| SignetError::NotFound(name.to_string()))?;
        if matches!(record.encryption, KeyEncryption::None) {
            return Err(SignetError::NotEncrypted(name.to_string()));
        }
        self.active.write().remove(name);
        self.emit(KeyStoreEvent::Locked { key_name: name.to_string() });
        Ok(())
    }

    /// Locks every currently-active encrypted key. Keys stored with
    /// `encryption: none` stay active — there is no passphrase to re-lock
    /// them behind (§4.2).
    pub fn lock_all(&self) -> SignetResult<usize> {
        let names: Vec<String> = self.active.read().keys().cloned().collect();
        let mut locked = 0;
        for name in names {
            if let Ok(Some(record)) = self.db.get_key(&name) {
                if !matches!(record.encryption, KeyEncryption::None) {
                    self.active.write().remove(&name);
                    self.emit(KeyStoreEvent::Locked { key_name: name });
                    locked += 1;
                }
            }
        }
        Ok(locked)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.read().contains_key(name)
    }

    /// Loads every persisted `encryption: none` key into memory. Called
    /// once at startup, since the in-memory table is always empty on a
    /// fresh process and plaintext keys have no unlock step to trigger it.
    pub fn activate_persisted_plaintext_keys(&self) -> SignetResult<usize> {
        let mut activated = 0;
        for name in self.db.list_key_names()? {
            let Some(record) = self.db.get_key(&name)? else { continue };
            if !matches!(record.encryption, KeyEncryption::None) || self.is_active(&name) {
                continue;
            }
            let Some(nsec) = record.plaintext else { continue };
            let secret_bytes = crate::codec::bech32::decode_nsec(&nsec)?;
            let signing_key = SigningKey::from_bytes(&secret_bytes)
                .map_err(|e| SignetError::InvalidEncoding(format!("invalid secret key: {e}")))?;
            let pubkey_hex = event::derive_pubkey(&signing_key);
            self.active.write().insert(name.clone(), ActiveKey { name: name.clone(), pubkey_hex, signing_key: Arc::new(signing_key) });
            self.emit(KeyStoreEvent::Activated { key_name: name });
            activated += 1;
        }
        Ok(activated)
    }

    /// Snapshot of every currently-unlocked key — used by the kill switch
    /// listener to know which pubkeys it should accept admin DMs on.
    pub fn active_keys(&self) -> Vec<ActiveKey> {
        self.active.read().values().cloned().collect()
    }

    /// Returns the signing key for an active key, or `KeyLocked`/`NotFound`.
    pub fn active_key(&self, name: &str) -> SignetResult<ActiveKey> {
        self.active
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| match self.db.get_key(name) {
                Ok(Some(_)) => SignetError::KeyLocked,
                _ => SignetError::NotFound(name.to_string()),
            })
    }

    /// Sets or replaces the passphrase on a key that's currently active.
    /// The plaintext secret never needs to be re-entered: it's already
    /// resident, so we re-wrap from the in-memory signing key.
    pub fn set_passphrase(&self, name: &str, new_passphrase: &str) -> SignetResult<()> {
        validate_passphrase(new_passphrase)?;
        let active = self.active_key(name)?;
        let secret_bytes = active.signing_key.to_bytes().into();
        let envelope = nip49::encrypt_envelope(&secret_bytes, new_passphrase, NIP49_DEFAULT_LOG_N)?;
        let ncryptsec = crate::codec::bech32::encode_ncryptsec(&envelope)?;
        self.db.update_key_encryption(name, KeyEncryption::ScryptXchacha20Poly1305, Some(&ncryptsec), None)?;
        Ok(())
    }

    /// Re-wraps a plaintext (`encryption: none`) key with NIP-49 in place.
    pub fn encrypt_key(&self, name: &str, passphrase: &str) -> SignetResult<()> {
        validate_passphrase(passphrase)?;
        let record = self.db.get_key(name)?.ok_or_else(|| SignetError::NotFound(name.to_string()))?;
        if !matches!(record.encryption, KeyEncryption::None) {
            return Err(SignetError::NameInUse("key is already encrypted".into()));
        }
        let nsec = record.plaintext.ok_or_else(|| SignetError::CiphertextCorrupt("missing plaintext".into()))?;
        let secret_bytes = crate::codec::bech32::decode_nsec(&nsec)?;
        let envelope = nip49::encrypt_envelope(&secret_bytes, passphrase, NIP49_DEFAULT_LOG_N)?;
        let ncryptsec = crate::codec::bech32::encode_ncryptsec(&envelope)?;
        self.db.update_key_encryption(name, KeyEncryption::ScryptXchacha20Poly1305, Some(&ncryptsec), None)?;
        Ok(())
    }

    /// Migrates a legacy-format key to NIP-49, requiring the current
    /// passphrase (never silently re-wraps without proof of possession).
    pub fn migrate_legacy(&self, name: &str, passphrase: &str) -> SignetResult<()> {
        let record = self.db.get_key(name)?.ok_or_else(|| SignetError::NotFound(name.to_string()))?;
        if !matches!(record.encryption, KeyEncryption::LegacyPbkdf2Aes256Gcm) {
            return Err(SignetError::NotEncrypted("key is not in the legacy format".into()));
        }
        let envelope = record.ciphertext.ok_or_else(|| SignetError::CiphertextCorrupt("missing ciphertext".into()))?;
        let secret_bytes = legacy::decrypt(&envelope, passphrase)?;
        let new_envelope = nip49::encrypt_envelope(&secret_bytes, passphrase, NIP49_DEFAULT_LOG_N)?;
        let ncryptsec = crate::codec::bech32::encode_ncryptsec(&new_envelope)?;
        self.db.update_key_encryption(name, KeyEncryption::ScryptXchacha20Poly1305, Some(&ncryptsec), None)?;
        Ok(())
    }

    /// Returns the portable `ncryptsec1...`/`nsec1...` export string,
    /// requiring the passphrase for encrypted keys as proof of possession.
    pub fn export_key(&self, name: &str, passphrase: Option<&str>) -> SignetResult<String> {
        let record = self.db.get_key(name)?.ok_or_else(|| SignetError::NotFound(name.to_string()))?;
        match record.encryption {
            KeyEncryption::None => record.plaintext.ok_or_else(|| SignetError::CiphertextCorrupt("missing plaintext".into())),
            KeyEncryption::ScryptXchacha20Poly1305 => {
                let passphrase = passphrase.ok_or(SignetError::WrongPassphrase { attempts_remaining: 0 })?;
                let ncryptsec = record.ciphertext.ok_or_else(|| SignetError::CiphertextCorrupt("missing ciphertext".into()))?;
                let envelope = crate::codec::bech32::decode_ncryptsec(&ncryptsec)?;
                nip49::decrypt_envelope(&envelope, passphrase)?; // proves possession
                Ok(ncryptsec)
            }
            KeyEncryption::LegacyPbkdf2Aes256Gcm => Err(SignetError::NotEncrypted("export legacy keys via migrate first".into())),
        }
    }

    pub fn rename_key(&self, old_name: &str, new_name: &str) -> SignetResult<()> {
        self.db.rename_key(old_name, new_name)?;
        if let Some(active) = self.active.write().remove(old_name) {
            self.active.write().insert(new_name.to_string(), ActiveKey { name: new_name.to_string(), ..active });
        }
        self.emit(KeyStoreEvent::Renamed { old_name: old_name.to_string(), new_name: new_name.to_string() });
        Ok(())
    }

    pub fn delete_key(&self, name: &str) -> SignetResult<()> {
        self.db.delete_key(name)?;
        self.active.write().remove(name);
        self.emit(KeyStoreEvent::Deleted { key_name: name.to_string() });
        Ok(())
    }

    pub fn list_keys(&self) -> SignetResult<Vec<KeySummary>> {
        let active_names: Vec<String> = self.active.read().keys().cloned().collect();
        self.db.list_key_summaries(&active_names)
    }

    /// Proves the caller knows the passphrase to *some* encrypted key,
    /// without unlocking anything — used by DeadManSwitch's reset/disable
    /// path (§4.10), which only needs proof of liveness, not key access.
    /// Returns `true` iff at least one encrypted key accepts the passphrase.
    pub fn verify_passphrase_any(&self, passphrase: &str) -> SignetResult<bool> {
        for name in self.db.list_key_names()? {
            let Some(record) = self.db.get_key(&name)? else { continue };
            let result = match record.encryption {
                KeyEncryption::None => continue,
                KeyEncryption::ScryptXchacha20Poly1305 => record
                    .ciphertext
                    .as_deref()
                    .and_then(|c| crate::codec::bech32::decode_ncryptsec(c).ok())
                    .map(|envelope| nip49::decrypt_envelope(&envelope, passphrase).is_ok())
                    .unwrap_or(false),
                KeyEncryption::LegacyPbkdf2Aes256Gcm => {
                    record.ciphertext.as_deref().map(|c| legacy::decrypt(c, passphrase).is_ok()).unwrap_or(false)
                }
            };
            if result {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn validate_passphrase(p: &str) -> SignetResult<()> {
    if p.chars().count() < MIN_PASSPHRASE_LEN {
        return Err(SignetError::WeakPassphrase { min: MIN_PASSPHRASE_LEN });
    }
    Ok(())
}

fn pubkey_to_array(hex: &str) -> SignetResult<[u8; 32]> {
    let bytes = event::hex_decode(hex)?;
    if bytes.len() != 32 {
        return Err(SignetError::InvalidEncoding("pubkey is not 32 bytes".into()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::{OsRng, RngCore};

    fn random_secret() -> [u8; 32] {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        bytes
    }

    fn test_store() -> KeyStore {
        KeyStore::new(Arc::new(Db::open_in_memory().unwrap()))
    }

    #[test]
    fn create_without_passphrase_is_active_immediately() {
        let store = test_store();
        store.create_key("alice", random_secret(), None).unwrap();
        assert!(store.is_active("alice"));
    }

    #[test]
    fn create_with_passphrase_starts_locked() {
        let store = test_store();
        store.create_key("alice", random_secret(), Some("correct horse battery")).unwrap();
        assert!(!store.is_active("alice"));
    }

    #[test]
    fn unlock_then_lock_roundtrip() {
        let store = test_store();
        store.create_key("alice", random_secret(), Some("correct horse battery")).unwrap();
        store.unlock("alice", "correct horse battery").unwrap();
        assert!(store.is_active("alice"));
        store.lock("alice").unwrap();
        assert!(!store.is_active("alice"));
    }

    #[test]
    fn unlock_wrong_passphrase_fails() {
        let store = test_store();
        store.create_key("alice", random_secret(), Some("correct horse battery")).unwrap();
        let err = store.unlock("alice", "wrong").unwrap_err();
        assert!(matches!(err, SignetError::WrongPassphrase { .. }));
    }

    #[test]
    fn weak_passphrase_rejected() {
        let store = test_store();
        let err = store.create_key("alice", random_secret(), Some("short")).unwrap_err();
        assert!(matches!(err, SignetError::WeakPassphrase { .. }));
    }

    #[test]
    fn lock_all_skips_plaintext_keys() {
        let store = test_store();
        store.create_key("alice", random_secret(), None).unwrap();
        store.create_key("bob", random_secret(), Some("correct horse battery")).unwrap();
        store.unlock("bob", "correct horse battery").unwrap();
        let n = store.lock_all().unwrap();
        assert_eq!(n, 1);
        assert!(store.is_active("alice"));
        assert!(!store.is_active("bob"));
    }

    #[test]
    fn active_key_on_locked_key_reports_key_locked() {
        let store = test_store();
        store.create_key("alice", random_secret(), Some("correct horse battery")).unwrap();
        let err = store.active_key("alice").unwrap_err();
        assert!(matches!(err, SignetError::KeyLocked));
    }

    #[test]
    fn verify_passphrase_any_checks_every_encrypted_key() {
        let store = test_store();
        store.create_key("alice", random_secret(), None).unwrap();
        store.create_key("bob", random_secret(), Some("correct horse battery")).unwrap();
        assert!(store.verify_passphrase_any("correct horse battery").unwrap());
        assert!(!store.verify_passphrase_any("wrong guess").unwrap());
    }

    #[test]
    fn activate_persisted_plaintext_keys_reloads_after_restart() {
        let db = Arc::new(Db::open_in_memory().unwrap());
        let first = KeyStore::new(db.clone());
        first.create_key("alice", random_secret(), None).unwrap();
        first.create_key("bob", random_secret(), Some("correct horse battery")).unwrap();

        let second = KeyStore::new(db);
        assert!(!second.is_active("alice"));
        let n = second.activate_persisted_plaintext_keys().unwrap();
        assert_eq!(n, 1);
        assert!(second.is_active("alice"));
        assert!(!second.is_active("bob"));
    }
}
