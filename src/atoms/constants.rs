// ── Signet Atoms: Constants ────────────────────────────────────────────────
// All named constants for the crate live here.
// Rationale: collecting constants in one place eliminates magic strings,
// makes auditing easier, and keeps every layer's code self-documenting.

// ── Key lifecycle ──────────────────────────────────────────────────────
/// Minimum passphrase length accepted by KeyStore create/set-passphrase.
pub const MIN_PASSPHRASE_LEN: usize = 8;
/// scrypt log_n used for new NIP-49 exports (2^15 = 32768).
pub const NIP49_DEFAULT_LOG_N: u8 = 15;

// ── PendingRequest / AuthorizationQueue ────────────────────────────────
/// Default TTL for a pending NIP-46 request before it expires.
pub const PENDING_REQUEST_TTL_SECS: i64 = 300;
/// Sweeper cadence for expiring pending requests and purging old rows.
pub const QUEUE_SWEEP_INTERVAL_SECS: u64 = 60;
/// Processed (approved/denied/expired) requests older than this are purged.
pub const PROCESSED_REQUEST_RETENTION_SECS: i64 = 24 * 60 * 60;
/// Activity log retention.
pub const ACTIVITY_LOG_RETENTION_DAYS: i64 = 30;
/// Admin event log retention.
pub const ADMIN_LOG_RETENTION_DAYS: i64 = 30;
/// Max ids accepted by a single batch-approve call.
pub const BATCH_APPROVE_MAX: usize = 50;

// ── ConnectionService ───────────────────────────────────────────────────
/// Bunker/NostrConnect one-time token lifetime.
pub const CONNECTION_TOKEN_TTL_SECS: i64 = 5 * 60;

// ── ACLEngine ───────────────────────────────────────────────────────────
/// TTL for the (keyName, clientPubkey) -> App decision cache.
pub const ACL_CACHE_TTL_SECS: i64 = 60;
/// Bound on the number of entries the ACL cache retains before evicting
/// the oldest — keeps memory flat under a pathological client fanout.
pub const ACL_CACHE_MAX_ENTRIES: usize = 10_000;
/// Auto-approval log rate limit window per (appId, method).
pub const AUTO_APPROVAL_LOG_WINDOW_SECS: i64 = 5;

pub const SAFE_KINDS: &[u32] = &[
    1, 6, 7, 16, 1111, 30023, 30024, 1808, 9735, 10000, 10001, 30000, 30001, 24242,
];
pub const SENSITIVE_KINDS: &[u32] = &[0, 3, 4, 5, 10002, 22242, 24133, 13194, 23194, 23195];

// ── RelayPool ───────────────────────────────────────────────────────────
/// Heartbeat tick interval used for sleep/wake detection.
pub const RELAY_HEARTBEAT_SECS: u64 = 30;
/// If wall-clock elapsed between ticks exceeds this multiple of the
/// heartbeat interval, the pool assumes the process was asleep.
pub const RELAY_SLEEP_DETECT_MULTIPLIER: u64 = 2;
/// Consecutive health-check failures before a pool reset is triggered.
pub const RELAY_WATCHDOG_FAILURE_THRESHOLD: u32 = 3;
/// Minimum time between automatic pool resets.
pub const RELAY_WATCHDOG_COOLDOWN_SECS: i64 = 60;
/// Base and cap for exponential reconnect backoff (shared by RelayPool and
/// KillSwitch's admin-DM listener — same TTL-cache-and-backoff shape).
pub const RECONNECT_BASE_MS: u64 = 5_000;
pub const RECONNECT_MAX_MS: u64 = 60_000;
pub const RECONNECT_MAX_ATTEMPTS: u32 = 10;
/// Every outbound relay connect/publish/HTTP call is bounded by this.
pub const IO_TIMEOUT_SECS: u64 = 10;

// ── KillSwitch ──────────────────────────────────────────────────────────
/// Event-id de-dup cache TTL, long enough to outlive relay replay windows.
pub const KILLSWITCH_DEDUP_TTL_SECS: i64 = 60 * 60;
pub const KILLSWITCH_DEDUP_MAX_ENTRIES: usize = 10_000;

// ── DeadManSwitch ───────────────────────────────────────────────────────
/// Failed passphrase attempts against the dead-man-switch reset endpoint
/// before a lockout is imposed.
pub const DEADMAN_MAX_FAILED_ATTEMPTS: u32 = 5;
pub const DEADMAN_LOCKOUT_SECS: i64 = 15 * 60;

// ── Shutdown ────────────────────────────────────────────────────────────
/// Grace window for in-flight approvals to finish before a force-close.
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

// ── In-memory log ring buffer ───────────────────────────────────────────
pub const LOG_RING_BUFFER_CAPACITY: usize = 2_000;
