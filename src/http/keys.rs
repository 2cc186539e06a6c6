//! `/keys` endpoints (§6): list, create, unlock/lock, passphrase and
//! encryption-format changes, export, connection-token minting, rename,
//! delete, and lock-all.
//!
//! `KeyStore` only broadcasts its own internal `KeyStoreEvent` (consumed
//! nowhere outside `keystore::mod`); these handlers publish the matching
//! `SignetEvent` themselves so key mutations reach the `/events` SSE feed,
//! the same way `queue.rs` and `deadman.rs` publish next to their own
//! mutations rather than through a generic bridge.

use super::{ApiResult, AppState};
use crate::atoms::types::KeySummary;
use crate::codec::bech32;
use crate::events::SignetEvent;
use axum::extract::{Path, State};
use axum::Json;
use rand_core::{OsRng, RngCore};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn list_keys(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<KeySummary>>> {
    Ok(Json(state.keystore.list_keys()?))
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    #[serde(default)]
    pub nsec: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
}

pub async fn create_key(State(state): State<Arc<AppState>>, Json(body): Json<CreateKeyRequest>) -> ApiResult<Json<Value>> {
    let secret_bytes = match &body.nsec {
        Some(nsec) => bech32::decode_nsec(nsec)?,
        None => {
            let mut bytes = [0u8; 32];
            OsRng.fill_bytes(&mut bytes);
            bytes
        }
    };
    let npub = state.keystore.create_key(&body.name, secret_bytes, body.passphrase.as_deref())?;
    state.bus.publish(SignetEvent::KeyCreated { name: body.name.clone() });
    Ok(Json(json!({ "name": body.name, "npub": npub })))
}

#[derive(Debug, Deserialize)]
pub struct UnlockKeyRequest {
    pub passphrase: String,
}

pub async fn unlock_key(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<UnlockKeyRequest>,
) -> ApiResult<Json<Value>> {
    let pubkey_hex = state.keystore.unlock(&name, &body.passphrase)?;
    state.acl.invalidate_key(&name);
    state.subscriptions.subscribe_key(&pubkey_hex);
    state.bus.publish(SignetEvent::KeyUnlocked { name: name.clone() });
    Ok(Json(json!({ "pubkey": pubkey_hex })))
}

pub async fn lock_key(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult<Json<Value>> {
    state.keystore.lock(&name)?;
    state.acl.invalidate_key(&name);
    state.bus.publish(SignetEvent::KeyLocked { name: name.clone() });
    Ok(Json(json!({ "locked": name })))
}

pub async fn lock_all(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let n = state.keystore.lock_all()?;
    state.bus.publish(SignetEvent::StatsUpdated);
    Ok(Json(json!({ "locked": n })))
}

#[derive(Debug, Deserialize)]
pub struct SetPassphraseRequest {
    pub passphrase: String,
}

pub async fn set_passphrase(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<SetPassphraseRequest>,
) -> ApiResult<Json<Value>> {
    state.keystore.set_passphrase(&name, &body.passphrase)?;
    state.bus.publish(SignetEvent::KeyUpdated { name });
    Ok(Json(json!({ "ok": true })))
}

pub async fn encrypt_key(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<SetPassphraseRequest>,
) -> ApiResult<Json<Value>> {
    state.keystore.encrypt_key(&name, &body.passphrase)?;
    state.bus.publish(SignetEvent::KeyUpdated { name });
    Ok(Json(json!({ "ok": true })))
}

pub async fn migrate_key(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<SetPassphraseRequest>,
) -> ApiResult<Json<Value>> {
    state.keystore.migrate_legacy(&name, &body.passphrase)?;
    state.bus.publish(SignetEvent::KeyUpdated { name });
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize, Default)]
pub struct ExportKeyRequest {
    #[serde(default)]
    pub passphrase: Option<String>,
}

pub async fn export_key(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<ExportKeyRequest>,
) -> ApiResult<Json<Value>> {
    let exported = state.keystore.export_key(&name, body.passphrase.as_deref())?;
    Ok(Json(json!({ "export": exported })))
}

#[derive(Debug, Deserialize)]
pub struct RenameKeyRequest {
    pub name: String,
}

pub async fn update_key(
    State(state): State<Arc<AppState>>,
    Path(old_name): Path<String>,
    Json(body): Json<RenameKeyRequest>,
) -> ApiResult<Json<Value>> {
    state.keystore.rename_key(&old_name, &body.name)?;
    state.acl.invalidate_key(&old_name);
    state.bus.publish(SignetEvent::KeyRenamed { old_name, new_name: body.name.clone() });
    Ok(Json(json!({ "name": body.name })))
}

pub async fn delete_key(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult<Json<Value>> {
    state.keystore.delete_key(&name)?;
    state.acl.invalidate_key(&name);
    state.bus.publish(SignetEvent::KeyDeleted { name });
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize, Default)]
pub struct ConnectionTokenRequest {
    #[serde(default)]
    pub relays: Vec<String>,
}

pub async fn connection_token(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<ConnectionTokenRequest>,
) -> ApiResult<Json<Value>> {
    let active = state.keystore.active_key(&name)?;
    let uri = state.connections.mint_bunker_uri(&name, &active.pubkey_hex, &body.relays)?;
    Ok(Json(json!({ "uri": uri })))
}
