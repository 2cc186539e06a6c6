// ── Signet: remote-signing daemon for NIP-46 ───────────────────────────────
// Custodies secret keys, authorizes signing/encryption RPCs from Nostr
// clients over public relays, and exposes a local HTTP+SSE API for an
// operator to manage keys, apps, pending requests, and policy.

pub mod acl;
pub mod atoms;
pub mod audit;
pub mod codec;
pub mod config;
pub mod connection;
pub mod db;
pub mod deadman;
pub mod events;
pub mod http;
pub mod keystore;
pub mod killswitch;
pub mod pipeline;
pub mod queue;
pub mod relay;
pub mod subscriptions;
