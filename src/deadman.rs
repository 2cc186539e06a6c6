//! DeadManSwitch (C10) — a persisted timer that, if not reset within its
//! timeframe, locks every encrypted key and suspends every app.
//!
//! Grounded on engine/sessions/sessions.rs's sweeper shape (a tokio
//! interval checking a persisted row). The panic warning DM reuses the
//! kill switch's admin `RelayPool` instead of opening its own connection.

use crate::atoms::constants::{DEADMAN_LOCKOUT_SECS, DEADMAN_MAX_FAILED_ATTEMPTS};
use crate::atoms::error::{SignetError, SignetResult};
use crate::atoms::types::DeadManSwitchState;
use crate::codec::nip17;
use crate::db::Db;
use crate::events::{EventBus, SignetEvent};
use crate::keystore::KeyStore;
use crate::relay::RelayPool;
use chrono::Duration;
use std::sync::Arc;

const SWEEP_INTERVAL_SECS: u64 = 30;

pub struct DeadManSwitch {
    db: Arc<Db>,
    keystore: Arc<KeyStore>,
    bus: Arc<EventBus>,
    admin_pubkey: Option<String>,
    admin_pool: Option<Arc<RelayPool>>,
}

impl DeadManSwitch {
    /// `admin_pool` is the kill switch's admin relay pool (`KillSwitch::admin_pool`),
    /// shared rather than duplicated so the warning DM goes out over the
    /// same channel the operator's client already listens on.
    pub fn new(
        db: Arc<Db>,
        keystore: Arc<KeyStore>,
        bus: Arc<EventBus>,
        admin_pubkey: Option<String>,
        admin_pool: Option<Arc<RelayPool>>,
    ) -> Arc<Self> {
        Arc::new(DeadManSwitch { db, keystore, bus, admin_pubkey, admin_pool })
    }

    pub fn state(&self) -> SignetResult<DeadManSwitchState> {
        self.db.get_dead_man_switch()
    }

    /// Enables/disables the switch or changes its timeframe. Disabling, or
    /// shortening the timeframe, requires passphrase proof of liveness;
    /// enabling or lengthening it does not (§4.10).
    pub fn configure(&self, enabled: bool, timeframe_sec: i64, passphrase: Option<&str>) -> SignetResult<()> {
        let current = self.state()?;
        let loosening_or_disabling = (current.enabled && !enabled) || timeframe_sec > current.timeframe_sec;
        if loosening_or_disabling {
            self.require_passphrase(passphrase)?;
        }
        self.db.set_dead_man_switch_enabled(enabled, timeframe_sec)?;
        self.bus.publish(SignetEvent::DeadmanUpdated);
        Ok(())
    }

    /// Resets the timer. Requires the passphrase of any encrypted key.
    /// The `alive` kill-switch command instead calls `reset_authenticated`
    /// directly since the admin DM itself is already signature-authenticated.
    pub fn reset(&self, passphrase: &str) -> SignetResult<()> {
        self.require_passphrase(Some(passphrase))?;
        self.reset_authenticated()
    }

    pub fn reset_authenticated(&self) -> SignetResult<()> {
        self.db.reset_dead_man_switch(chrono::Utc::now())?;
        self.bus.publish(SignetEvent::DeadmanReset);
        Ok(())
    }

    fn require_passphrase(&self, passphrase: Option<&str>) -> SignetResult<()> {
        let state = self.state()?;
        let now = chrono::Utc::now();
        if state.is_locked_out(now) {
            return Err(SignetError::TooManyAttempts { until: state.lockout_until.unwrap() });
        }
        let passphrase = passphrase.ok_or(SignetError::WrongPassphrase { attempts_remaining: DEADMAN_MAX_FAILED_ATTEMPTS })?;
        if self.keystore.verify_passphrase_any(passphrase)? {
            return Ok(());
        }
        let lockout_until = if state.failed_attempts + 1 >= DEADMAN_MAX_FAILED_ATTEMPTS {
            Some(now + Duration::seconds(DEADMAN_LOCKOUT_SECS))
        } else {
            None
        };
        let attempts = self.db.record_dead_man_switch_failure(now, lockout_until)?;
        let remaining = DEADMAN_MAX_FAILED_ATTEMPTS.saturating_sub(attempts);
        if let Some(until) = lockout_until {
            return Err(SignetError::TooManyAttempts { until });
        }
        Err(SignetError::WrongPassphrase { attempts_remaining: remaining })
    }

    /// Checks expiry and, if triggered, locks everything, warns the admin,
    /// and emits `deadman:panic`. Idempotent: once `panicTriggeredAt` is
    /// set, repeated calls are no-ops until the switch is reset.
    pub async fn check_and_trigger(&self) -> SignetResult<bool> {
        let state = self.state()?;
        let now = chrono::Utc::now();
        if !state.is_expired(now) {
            return Ok(false);
        }
        self.keystore.lock_all()?;
        self.db.suspend_all_apps(now)?;
        self.db.trigger_dead_man_switch_panic(now)?;
        self.bus.publish(SignetEvent::DeadmanPanic);
        self.warn_admin().await;
        Ok(true)
    }

    async fn warn_admin(&self) {
        let (Some(admin_pubkey), Some(pool)) = (self.admin_pubkey.clone(), self.admin_pool.clone()) else { return };
        let keys = self.keystore.active_keys();
        let Some(key) = keys.first() else { return };
        let warning = "dead man switch triggered: all keys locked, all apps suspended";
        match nip17::wrap_dm(&key.signing_key, &admin_pubkey, warning) {
            Ok(wrapped) => {
                if let Err(e) = pool.publish(&wrapped).await {
                    log::warn!("failed to publish dead man switch warning: {e}");
                }
            }
            Err(e) => log::warn!("failed to build dead man switch warning: {e}"),
        }
    }

    pub fn spawn_sweeper(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                if let Err(e) = self.check_and_trigger().await {
                    log::warn!("dead man switch check failed: {e}");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::KeyEncryption;

    fn seeded() -> (Arc<DeadManSwitch>, Arc<Db>, Arc<KeyStore>) {
        let db = Arc::new(Db::open_in_memory().unwrap());
        let keystore = Arc::new(KeyStore::new(db.clone()));
        let bus = Arc::new(EventBus::new());
        let dms = DeadManSwitch::new(db.clone(), keystore.clone(), bus, None, None);
        (dms, db, keystore)
    }

    #[test]
    fn enabling_never_requires_passphrase() {
        let (dms, _, _) = seeded();
        dms.configure(true, 3600, None).unwrap();
        assert!(dms.state().unwrap().enabled);
    }

    #[test]
    fn disabling_requires_passphrase() {
        let (dms, db, keystore) = seeded();
        db.insert_key("alice", "npub1abc", KeyEncryption::None, None, None).unwrap();
        keystore.create_key("alice2", [1u8; 32], Some("correct horse battery")).unwrap();
        dms.configure(true, 3600, None).unwrap();
        assert!(dms.configure(false, 3600, None).is_err());
        dms.configure(false, 3600, Some("correct horse battery")).unwrap();
        assert!(!dms.state().unwrap().enabled);
    }

    #[tokio::test]
    async fn check_and_trigger_locks_keys_on_expiry() {
        let (dms, db, keystore) = seeded();
        keystore.create_key("alice", [2u8; 32], Some("correct horse battery")).unwrap();
        keystore.unlock("alice", "correct horse battery").unwrap();
        db.set_dead_man_switch_enabled(true, 1).unwrap();
        let past = chrono::Utc::now() - Duration::seconds(100);
        db.reset_dead_man_switch(past).unwrap();
        let triggered = dms.check_and_trigger().await.unwrap();
        assert!(triggered);
        assert!(!keystore.is_active("alice"));
    }

    #[test]
    fn reset_with_wrong_passphrase_increments_failures() {
        let (dms, db, keystore) = seeded();
        keystore.create_key("alice", [3u8; 32], Some("correct horse battery")).unwrap();
        assert!(dms.reset("wrong guess").is_err());
        assert_eq!(db.get_dead_man_switch().unwrap().failed_attempts, 1);
    }
}
