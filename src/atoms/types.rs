// ── Signet Atoms: Domain Types ─────────────────────────────────────────────
// The vocabulary of the daemon (§3 data model). Pure data + small enums;
// persistence lives in `db`, behavior lives in `keystore`/`acl`/`pipeline`/etc.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEncryption {
    None,
    ScryptXchacha20Poly1305,
    LegacyPbkdf2Aes256Gcm,
}

impl KeyEncryption {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyEncryption::None => "none",
            KeyEncryption::ScryptXchacha20Poly1305 => "nip49",
            KeyEncryption::LegacyPbkdf2Aes256Gcm => "legacy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(KeyEncryption::None),
            "nip49" => Some(KeyEncryption::ScryptXchacha20Poly1305),
            "legacy" => Some(KeyEncryption::LegacyPbkdf2Aes256Gcm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Offline,
    Locked,
    Online,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Offline => "offline",
            KeyStatus::Locked => "locked",
            KeyStatus::Online => "online",
        }
    }
}

/// Row projected by KeyStore::list_keys — joins status with counts from
/// the app/request/log stores.
#[derive(Debug, Clone, Serialize)]
pub struct KeySummary {
    pub name: String,
    pub npub: String,
    pub status: KeyStatus,
    pub encryption: KeyEncryption,
    pub user_count: i64,
    pub request_count: i64,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Paranoid,
    Reasonable,
    Full,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::Paranoid => "paranoid",
            TrustLevel::Reasonable => "reasonable",
            TrustLevel::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "paranoid" => Some(TrustLevel::Paranoid),
            "reasonable" => Some(TrustLevel::Reasonable),
            "full" => Some(TrustLevel::Full),
            _ => None,
        }
    }
}

/// App a.k.a. KeyUser — a client authorized against one key.
#[derive(Debug, Clone, Serialize)]
pub struct App {
    pub id: i64,
    pub key_name: String,
    pub client_pubkey: String,
    pub description: Option<String>,
    pub trust_level: TrustLevel,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
    pub revoked_at: Option<chrono::DateTime<chrono::Utc>>,
    pub suspended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub suspend_until: Option<chrono::DateTime<chrono::Utc>>,
}

impl App {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// An app with `suspendUntil` in the past and `suspendedAt` set is
    /// treated as active again — the suspension auto-expired (§8 boundary).
    pub fn is_suspended(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        match self.suspended_at {
            None => false,
            Some(_) => match self.suspend_until {
                None => true,
                Some(until) => now < until,
            },
        }
    }
}

/// Rule a.k.a. SigningCondition — a persisted ACL row attached to an App.
#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    pub id: i64,
    pub app_id: i64,
    /// RPC method name, or "*" for wildcard.
    pub method: String,
    /// Event kind as a string ("1", "all"), or None for non-sign_event rules.
    pub kind: Option<String>,
    pub allowed: bool,
}

impl Rule {
    pub fn matches(&self, method: &str, kind: Option<u32>) -> bool {
        if self.method != "*" && self.method != method {
            return false;
        }
        match (&self.kind, kind) {
            (None, _) => true,
            (Some(k), _) if k == "all" => true,
            (Some(k), Some(ev_kind)) => k.parse::<u32>().map(|n| n == ev_kind).unwrap_or(false),
            (Some(_), None) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Pending => "pending",
            PendingStatus::Approved => "approved",
            PendingStatus::Denied => "denied",
            PendingStatus::Expired => "expired",
        }
    }
}

/// PendingRequest — an unprocessed or in-decision inbound RPC.
#[derive(Debug, Clone, Serialize)]
pub struct PendingRequest {
    pub id: String,
    pub key_name: String,
    pub method: String,
    pub params: String,
    pub remote_pubkey: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    /// None = still pending; Some(true/false) = terminal decision.
    pub allowed: Option<bool>,
    pub processed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub requires_password: bool,
    pub connect_response_sent: Option<bool>,
}

impl PendingRequest {
    pub fn status(&self, now: chrono::DateTime<chrono::Utc>) -> PendingStatus {
        match self.allowed {
            Some(true) => PendingStatus::Approved,
            Some(false) => PendingStatus::Denied,
            None if now > self.expires_at => PendingStatus::Expired,
            None => PendingStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    Manual,
    AutoTrust,
    AutoPermission,
}

impl ApprovalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalType::Manual => "manual",
            ApprovalType::AutoTrust => "auto_trust",
            ApprovalType::AutoPermission => "auto_permission",
        }
    }
}

/// LogEntry (activity log).
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub entry_type: String, // approval | denial | registration | auto_approved
    pub method: Option<String>,
    pub event_kind: Option<u32>,
    pub key_name: Option<String>,
    pub user_pubkey: Option<String>,
    pub app_name: Option<String>,
    pub auto_approved: bool,
    pub approval_type: Option<ApprovalType>,
}

/// AdminEvent — audit trail for keystore/app/admin actions.
#[derive(Debug, Clone, Serialize)]
pub struct AdminEvent {
    pub id: i64,
    pub event_type: String,
    pub key_name: Option<String>,
    pub app_id: Option<i64>,
    pub app_name: Option<String>,
    pub client_name: Option<String>,
    pub client_version: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub command: Option<String>,
    pub command_result: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// ConnectionToken — one-time, short-lived shared secret tied to a key.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionToken {
    pub token: String,
    pub key_name: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub used_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ConnectionToken {
    pub fn is_usable(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.used_at.is_none() && now <= self.expires_at
    }
}

/// DeadManSwitchState — a single persisted state row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadManSwitchState {
    pub enabled: bool,
    pub timeframe_sec: i64,
    pub last_reset_at: chrono::DateTime<chrono::Utc>,
    pub panic_triggered_at: Option<chrono::DateTime<chrono::Utc>>,
    pub failed_attempts: u32,
    pub lockout_until: Option<chrono::DateTime<chrono::Utc>>,
}

impl DeadManSwitchState {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.enabled
            && (now - self.last_reset_at).num_seconds() > self.timeframe_sec
            && self.panic_triggered_at.is_none()
    }

    pub fn is_locked_out(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        matches!(self.lockout_until, Some(until) if now < until)
    }
}

/// The four-way ACL decision (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclDecision {
    AllowAuto(ApprovalType),
    AllowManualRecord,
    Deny,
    Escalate,
}

/// A requested permission parsed from a NostrConnect `perms` query param:
/// either `<method>` or `sign_event:<kind>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedPermission {
    pub method: String,
    pub kind: Option<u32>,
}
