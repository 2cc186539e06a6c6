//! Codec (C1) — event construction/signing/verification, bech32 encodings,
//! and the three symmetric payload formats Signet speaks: NIP-04 (wire
//! transport), NIP-44 v2 (gift-wrap sealing), NIP-49 (at-rest key format),
//! plus the legacy at-rest format kept for read/migrate only.
//!
//! Grounded on engine/nostr/crypto.rs's hand-rolled NIP-01/NIP-04 primitives,
//! generalized to cover the rest of the wire/at-rest surface the daemon needs.

pub mod bech32;
pub mod event;
pub mod legacy;
pub mod nip04;
pub mod nip17;
pub mod nip44;
pub mod nip49;

pub use event::{NostrEvent, derive_pubkey, hex_decode, hex_encode};
