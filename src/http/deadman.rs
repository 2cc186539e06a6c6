//! `/dead-man-switch` endpoints (§6): view state, configure, reset, and a
//! test-panic trigger for operators to verify the panic path end to end
//! (§8 scenario 6).

use super::{ApiResult, AppState};
use crate::atoms::types::DeadManSwitchState;
use axum::extract::State;
use axum::Json;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn state_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<DeadManSwitchState>> {
    Ok(Json(state.deadman.state()?))
}

#[derive(Debug, Deserialize)]
pub struct ConfigureRequest {
    pub enabled: bool,
    pub timeframe_sec: i64,
    #[serde(default)]
    pub passphrase: Option<String>,
}

pub async fn configure(State(state): State<Arc<AppState>>, Json(body): Json<ConfigureRequest>) -> ApiResult<Json<Value>> {
    state.deadman.configure(body.enabled, body.timeframe_sec, body.passphrase.as_deref())?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub passphrase: String,
}

pub async fn reset(State(state): State<Arc<AppState>>, Json(body): Json<ResetRequest>) -> ApiResult<Json<Value>> {
    state.deadman.reset(&body.passphrase)?;
    Ok(Json(json!({ "ok": true })))
}

/// Forces an immediate trigger regardless of the configured timeframe, by
/// pushing the persisted last-reset time into the past before calling the
/// same `check_and_trigger` path the sweeper uses.
pub async fn test_panic(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let now = Utc::now();
    state.db.set_dead_man_switch_enabled(true, 1)?;
    state.db.reset_dead_man_switch(now - Duration::seconds(2))?;
    let triggered = state.deadman.check_and_trigger().await?;
    Ok(Json(json!({ "triggered": triggered })))
}
