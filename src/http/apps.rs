//! `/apps` endpoints (§6): list, revoke/suspend/unsuspend, trust-level
//! changes, and the suspend-all/resume-all bulk actions.

use super::{ApiResult, AppState};
use crate::atoms::types::{App, TrustLevel};
use crate::events::SignetEvent;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn list_apps(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<App>>> {
    let names = state.db.list_key_names()?;
    let mut all = Vec::new();
    for name in names {
        all.extend(state.db.list_apps_for_key(&name)?);
    }
    Ok(Json(all))
}

pub async fn revoke_app(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    state.db.revoke_app(id, Utc::now())?;
    if let Some(app) = state.db.get_app(id)? {
        state.acl.invalidate_app(&app.key_name, &app.client_pubkey);
    }
    state.bus.publish(SignetEvent::AppRevoked { id });
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize, Default)]
pub struct SuspendAppRequest {
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

pub async fn suspend_app(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<SuspendAppRequest>,
) -> ApiResult<Json<Value>> {
    state.db.suspend_app(id, Utc::now(), body.until)?;
    if let Some(app) = state.db.get_app(id)? {
        state.acl.invalidate_app(&app.key_name, &app.client_pubkey);
    }
    state.bus.publish(SignetEvent::AppUpdated { id });
    Ok(Json(json!({ "ok": true })))
}

pub async fn unsuspend_app(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    state.db.unsuspend_app(id)?;
    if let Some(app) = state.db.get_app(id)? {
        state.acl.invalidate_app(&app.key_name, &app.client_pubkey);
    }
    state.bus.publish(SignetEvent::AppUpdated { id });
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateAppRequest {
    #[serde(default)]
    pub trust_level: Option<TrustLevel>,
}

pub async fn update_app(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateAppRequest>,
) -> ApiResult<Json<Value>> {
    if let Some(trust_level) = body.trust_level {
        state.db.set_app_trust_level(id, trust_level)?;
        if let Some(app) = state.db.get_app(id)? {
            state.acl.invalidate_app(&app.key_name, &app.client_pubkey);
        }
    }
    state.bus.publish(SignetEvent::AppUpdated { id });
    Ok(Json(json!({ "ok": true })))
}

pub async fn suspend_all(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let n = state.db.suspend_all_apps(Utc::now())?;
    state.bus.publish(SignetEvent::StatsUpdated);
    Ok(Json(json!({ "suspended": n })))
}

pub async fn resume_all(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let n = state.db.resume_all_apps()?;
    state.bus.publish(SignetEvent::StatsUpdated);
    Ok(Json(json!({ "resumed": n })))
}
