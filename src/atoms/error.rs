// ── Signet Atoms: Error Types ──────────────────────────────────────────────
// Single canonical error enum for the daemon, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (§7 of the design: Transport,
//     Protocol, Policy, Auth, Integrity, Internal), not one-per-call-site.
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • `SignetError` carries an HTTP-status mapping and a NIP-46 error-string
//     mapping so the same value can be reported to the operator (HTTP) and
//     to the remote client (wire) without duplicating policy.
//   • No variant carries secret material (passphrases, plaintext keys) in
//     its message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignetError {
    // ── Transport ────────────────────────────────────────────────────
    #[error("relay unreachable: {0}")]
    RelayUnreachable(String),
    #[error("publish acknowledged by zero relays")]
    PublishNoAck,
    #[error("socket timed out")]
    SocketTimeout,

    // ── Protocol ─────────────────────────────────────────────────────
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("bad signature")]
    BadSignature,
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("bad params: {0}")]
    BadParams(String),

    // ── Policy ───────────────────────────────────────────────────────
    #[error("key is not active")]
    KeyNotActive,
    #[error("key is locked")]
    KeyLocked,
    #[error("app is revoked")]
    AppRevoked,
    #[error("app is suspended")]
    AppSuspended,
    #[error("permission denied")]
    PermissionDenied,
    #[error("request already processed")]
    AlreadyDecided,

    // ── Auth ─────────────────────────────────────────────────────────
    #[error("incorrect passphrase, {attempts_remaining} attempt(s) remaining")]
    WrongPassphrase { attempts_remaining: u32 },
    #[error("too many attempts, locked out until {until}")]
    TooManyAttempts { until: chrono::DateTime<chrono::Utc> },
    #[error("invalid CSRF token")]
    CsrfInvalid,
    #[error("session expired")]
    SessionExpired,

    // ── Key lifecycle ────────────────────────────────────────────────
    #[error("name already in use: {0}")]
    NameInUse(String),
    #[error("passphrase and confirmation do not match")]
    PassphraseMismatch,
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),
    #[error("passphrase too short (minimum {min} characters)")]
    WeakPassphrase { min: usize },
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("key is not encrypted")]
    NotEncrypted(String),

    // ── Integrity ────────────────────────────────────────────────────
    #[error("ciphertext corrupt: {0}")]
    CiphertextCorrupt(String),
    #[error("key derivation failed: {0}")]
    KdfFailure(String),

    // ── Internal ─────────────────────────────────────────────────────
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("{0}")]
    Unexpected(String),
}

impl SignetError {
    /// Coarse category, used for admin-event logging and metrics — never
    /// includes the message, which may echo back attacker-controlled input.
    pub fn category(&self) -> &'static str {
        use SignetError::*;
        match self {
            RelayUnreachable(_) | PublishNoAck | SocketTimeout => "transport",
            MalformedEvent(_) | BadSignature | UnknownMethod(_) | BadParams(_) => "protocol",
            KeyNotActive | KeyLocked | AppRevoked | AppSuspended | PermissionDenied | AlreadyDecided => "policy",
            WrongPassphrase { .. } | TooManyAttempts { .. } | CsrfInvalid | SessionExpired => "auth",
            NameInUse(_) | PassphraseMismatch | InvalidEncoding(_) | WeakPassphrase { .. }
            | NotFound(_) | NotEncrypted(_) => "keystore",
            CiphertextCorrupt(_) | KdfFailure(_) => "integrity",
            Db(_) | Serialization(_) | Io(_) | Config(_) | Unexpected(_) => "internal",
        }
    }

    /// Maps this error onto an HTTP status code for the local management API.
    pub fn http_status(&self) -> u16 {
        use SignetError::*;
        match self {
            WrongPassphrase { .. } | CsrfInvalid => 400,
            SessionExpired => 401,
            PermissionDenied | AppRevoked | AppSuspended | KeyLocked | KeyNotActive => 403,
            NotFound(_) => 404,
            AlreadyDecided => 409,
            NameInUse(_) | PassphraseMismatch | InvalidEncoding(_) | WeakPassphrase { .. }
            | MalformedEvent(_) | UnknownMethod(_) | BadParams(_) | NotEncrypted(_) => 400,
            TooManyAttempts { .. } => 429,
            _ => 500,
        }
    }

    /// Renders this error as a NIP-46 `error` string sent to the *remote*
    /// client. Never includes DB internals, stack traces, or operator
    /// reasoning — only what the protocol itself needs to say.
    pub fn as_nip46_error(&self) -> String {
        use SignetError::*;
        match self {
            UnknownMethod(m) => format!("unknown method: {m}"),
            BadParams(_) => "invalid params".to_string(),
            KeyNotActive | KeyLocked => "key unavailable".to_string(),
            AppRevoked => "access revoked".to_string(),
            AppSuspended => "access suspended".to_string(),
            PermissionDenied => "permission denied".to_string(),
            _ => "internal error".to_string(),
        }
    }
}

impl From<String> for SignetError {
    fn from(s: String) -> Self {
        SignetError::Unexpected(s)
    }
}

impl From<&str> for SignetError {
    fn from(s: &str) -> Self {
        SignetError::Unexpected(s.to_string())
    }
}

/// All daemon operations should return this type.
pub type SignetResult<T> = Result<T, SignetError>;
