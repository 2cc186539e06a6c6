//! `POST /connect` (§8 scenario 5): the operator side of a client-initiated
//! `nostrconnect://` handshake. An app shows the operator a URI instead of
//! waiting on a Bunker token; this endpoint parses it, grants the app a
//! `connect` rule against the named key, and publishes the signed
//! connect-reply back to the client over the shared relay pool.

use super::{ApiResult, AppState};
use crate::atoms::error::SignetError;
use crate::atoms::types::TrustLevel;
use crate::codec::event;
use crate::codec::nip04;
use crate::events::SignetEvent;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const NIP46_KIND: u32 = 24133;

#[derive(Debug, Deserialize)]
pub struct ConnectBody {
    pub key_name: String,
    pub uri: String,
    #[serde(default)]
    pub trust_level: Option<TrustLevel>,
}

pub async fn submit(State(state): State<Arc<AppState>>, Json(body): Json<ConnectBody>) -> ApiResult<Json<Value>> {
    let parsed = state.connections.parse_nostrconnect_uri(&body.uri)?;
    let active = state.keystore.active_key(&body.key_name)?;

    let app_id = state.acl.grant_connect(
        &body.key_name,
        &parsed.client_pubkey,
        body.trust_level.unwrap_or(TrustLevel::Paranoid),
        parsed.name.as_deref(),
    )?;
    state.subscriptions.subscribe_app(app_id, &parsed.client_pubkey);

    let result = parsed.secret.clone().unwrap_or_else(|| "ack".to_string());
    let content = json!({"id": uuid::Uuid::new_v4().to_string(), "result": result}).to_string();
    let encrypted = nip04::encrypt(&active.signing_key, &parsed.client_pubkey, &content)?;
    let tags = event::nip46_reply_tags(&parsed.client_pubkey);
    let reply = event::sign_event(&active.signing_key, &active.pubkey_hex, NIP46_KIND, tags, encrypted)?;
    match state.relay.publish(&reply).await {
        Ok(_) => {}
        Err(SignetError::PublishNoAck) => {
            log::warn!("connect reply to {} acknowledged by zero relays", parsed.client_pubkey);
        }
        Err(e) => log::warn!("failed to publish connect reply: {e}"),
    }

    state.bus.publish(SignetEvent::AppConnected { id: app_id });
    Ok(Json(json!({ "ok": true, "app_id": app_id, "client_pubkey": parsed.client_pubkey })))
}
