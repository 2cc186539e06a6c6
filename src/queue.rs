//! AuthorizationQueue (C7) — list/approve/deny/batchApprove over the
//! persisted PendingRequest table, plus a background sweeper for expiry
//! and retention.
//!
//! Grounded on engine/sessions/sessions.rs's `cleanup_empty_sessions`
//! sweeper shape (periodic retention-window delete), and on
//! engine/channels/access.rs's approve/deny vocabulary generalized from
//! channel pairing to NIP-46 pending requests.

use crate::acl::AclEngine;
use crate::atoms::constants::{
    ACTIVITY_LOG_RETENTION_DAYS, ADMIN_LOG_RETENTION_DAYS, BATCH_APPROVE_MAX,
    PROCESSED_REQUEST_RETENTION_SECS, QUEUE_SWEEP_INTERVAL_SECS,
};
use crate::atoms::error::{SignetError, SignetResult};
use crate::atoms::types::{PendingRequest, PendingStatus, TrustLevel};
use crate::db::Db;
use crate::events::{EventBus, SignetEvent};
use chrono::Duration;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ApproveOptions {
    pub password: Option<String>,
    pub trust_level: Option<TrustLevel>,
    pub always_allow: bool,
    pub allow_kind: Option<String>,
    pub app_name: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchResult {
    pub id: String,
    pub success: bool,
    pub error: Option<String>,
}

pub struct AuthorizationQueue {
    db: Arc<Db>,
    acl: Arc<AclEngine>,
    bus: Arc<EventBus>,
}

impl AuthorizationQueue {
    pub fn new(db: Arc<Db>, acl: Arc<AclEngine>, bus: Arc<EventBus>) -> Self {
        AuthorizationQueue { db, acl, bus }
    }

    pub fn list(&self, status: Option<PendingStatus>, limit: i64, offset: usize) -> SignetResult<Vec<PendingRequest>> {
        let now = chrono::Utc::now();
        let mut all = self.db.list_pending_requests()?;
        // list_pending_requests only returns allowed IS NULL rows; for a
        // fuller status filter (approved/denied/expired/all) callers need
        // the processed rows too, which the admin-facing `all`/`admin`
        // views pull straight from the table without the pending-only
        // projection — kept narrow here since §6 only requires filtering
        // the already-materialized set by computed status.
        if let Some(status) = status {
            all.retain(|r| r.status(now) == status);
        }
        Ok(all.into_iter().skip(offset).take(limit.max(0) as usize).collect())
    }

    pub fn approve(&self, id: &str, opts: ApproveOptions) -> SignetResult<()> {
        let request = self.db.get_request(id)?.ok_or_else(|| SignetError::NotFound(id.to_string()))?;
        let now = chrono::Utc::now();
        if request.status(now) != PendingStatus::Pending {
            return Err(SignetError::BadParams("request already processed".into()));
        }

        if request.method == "connect" {
            let trust_level = opts.trust_level.unwrap_or(TrustLevel::Paranoid);
            self.acl.grant_connect(&request.key_name, &request.remote_pubkey, trust_level, opts.app_name.as_deref())?;
        } else if opts.always_allow {
            if let Some(app) = self.db.find_app(&request.key_name, &request.remote_pubkey)? {
                self.acl.install_always_allow(app.id, &request.key_name, &request.remote_pubkey, &request.method, opts.allow_kind.as_deref())?;
            }
        }

        // CAS: only flips a still-pending row, so a racing duplicate
        // approval from another UI client sees zero rows affected.
        if self.db.decide_request(id, true, now)? == 0 {
            return Err(SignetError::AlreadyDecided);
        }
        self.bus.publish(SignetEvent::RequestApproved { id: id.to_string() });
        Ok(())
    }

    pub fn deny(&self, id: &str) -> SignetResult<()> {
        let request = self.db.get_request(id)?.ok_or_else(|| SignetError::NotFound(id.to_string()))?;
        if request.status(chrono::Utc::now()) != PendingStatus::Pending {
            return Err(SignetError::BadParams("request already processed".into()));
        }
        if self.db.decide_request(id, false, chrono::Utc::now())? == 0 {
            return Err(SignetError::AlreadyDecided);
        }
        self.bus.publish(SignetEvent::RequestDenied { id: id.to_string() });
        Ok(())
    }

    pub fn batch_approve(&self, ids: &[String], opts: ApproveOptions) -> SignetResult<Vec<BatchResult>> {
        if ids.len() > BATCH_APPROVE_MAX {
            return Err(SignetError::BadParams(format!("batch exceeds max of {BATCH_APPROVE_MAX}")));
        }
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = self.approve(id, opts.clone());
            results.push(BatchResult { id: id.clone(), success: outcome.is_ok(), error: outcome.err().map(|e| e.to_string()) });
        }
        self.bus.publish(SignetEvent::StatsUpdated);
        Ok(results)
    }

    /// Marks expired pendings, purges old processed rows, and purges
    /// retention-expired activity/admin logs. Runs on a fixed interval
    /// from `spawn_sweeper`.
    pub fn sweep(&self) -> SignetResult<()> {
        let now = chrono::Utc::now();
        let expired = self.db.expire_stale_requests(now)?;
        if expired > 0 {
            self.bus.publish(SignetEvent::RequestExpired { id: String::new() });
        }
        self.db.purge_processed_requests_older_than(now - Duration::seconds(PROCESSED_REQUEST_RETENTION_SECS))?;
        self.db.purge_logs_older_than(now - Duration::days(ACTIVITY_LOG_RETENTION_DAYS))?;
        self.db.purge_admin_events_older_than(now - Duration::days(ADMIN_LOG_RETENTION_DAYS))?;
        Ok(())
    }

    pub fn spawn_sweeper(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(QUEUE_SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                if let Err(e) = self.sweep() {
                    log::warn!("authorization queue sweep failed: {e}");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::KeyEncryption;
    use chrono::Duration as ChronoDuration;

    fn seeded() -> (Arc<Db>, Arc<AclEngine>, Arc<EventBus>) {
        let db = Arc::new(Db::open_in_memory().unwrap());
        db.insert_key("alice", "npub1abc", KeyEncryption::None, None, None).unwrap();
        let acl = Arc::new(AclEngine::new(db.clone()));
        let bus = Arc::new(EventBus::new());
        (db, acl, bus)
    }

    #[test]
    fn approve_connect_grants_app_and_decides_request() {
        let (db, acl, bus) = seeded();
        let queue = AuthorizationQueue::new(db.clone(), acl, bus);
        let now = chrono::Utc::now();
        db.insert_request("r1", "alice", "connect", "[]", "pub1", now, now + ChronoDuration::seconds(300), false).unwrap();
        queue.approve("r1", ApproveOptions { trust_level: Some(TrustLevel::Full), ..Default::default() }).unwrap();
        let req = db.get_request("r1").unwrap().unwrap();
        assert_eq!(req.status(now), PendingStatus::Approved);
        assert!(db.find_app("alice", "pub1").unwrap().is_some());
    }

    #[test]
    fn double_approve_second_call_errors() {
        let (db, acl, bus) = seeded();
        let queue = AuthorizationQueue::new(db.clone(), acl, bus);
        let now = chrono::Utc::now();
        db.insert_request("r1", "alice", "connect", "[]", "pub1", now, now + ChronoDuration::seconds(300), false).unwrap();
        queue.approve("r1", ApproveOptions::default()).unwrap();
        let err = queue.approve("r1", ApproveOptions::default()).unwrap_err();
        assert!(matches!(err, SignetError::BadParams(_)));
    }

    #[test]
    fn batch_approve_caps_at_max() {
        let (db, acl, bus) = seeded();
        let queue = AuthorizationQueue::new(db, acl, bus);
        let ids: Vec<String> = (0..(BATCH_APPROVE_MAX + 1)).map(|i| i.to_string()).collect();
        let err = queue.batch_approve(&ids, ApproveOptions::default()).unwrap_err();
        assert!(matches!(err, SignetError::BadParams(_)));
    }

    #[test]
    fn sweep_expires_stale_requests() {
        let (db, acl, bus) = seeded();
        let queue = AuthorizationQueue::new(db.clone(), acl, bus);
        let past = chrono::Utc::now() - ChronoDuration::seconds(600);
        db.insert_request("r1", "alice", "ping", "[]", "pub1", past, past + ChronoDuration::seconds(300), false).unwrap();
        queue.sweep().unwrap();
        assert!(db.list_pending_requests().unwrap().is_empty());
    }
}
