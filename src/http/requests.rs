//! `/requests` endpoints (§6): list pending/processed requests, approve
//! (which also executes the signing and publishes the NIP-46 reply), deny,
//! and batch-approve.

use super::{ApiResult, AppState};
use crate::atoms::types::{PendingRequest, PendingStatus, TrustLevel};
use crate::queue::{ApproveOptions, BatchResult};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize, Default)]
pub struct ListRequestsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<usize>,
}

pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListRequestsQuery>,
) -> ApiResult<Json<Vec<PendingRequest>>> {
    let status = match query.status.as_deref() {
        Some("pending") => Some(PendingStatus::Pending),
        Some("approved") => Some(PendingStatus::Approved),
        Some("denied") => Some(PendingStatus::Denied),
        Some("expired") => Some(PendingStatus::Expired),
        _ => None,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 50);
    let offset = query.offset.unwrap_or(0);
    Ok(Json(state.queue.list(status, limit, offset)?))
}

#[derive(Debug, Deserialize, Default)]
pub struct ApproveRequestBody {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub trust_level: Option<TrustLevel>,
    #[serde(default)]
    pub always_allow: bool,
    #[serde(default)]
    pub allow_kind: Option<String>,
    #[serde(default)]
    pub app_name: Option<String>,
}

pub async fn approve_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ApproveRequestBody>,
) -> ApiResult<Json<Value>> {
    let opts = ApproveOptions {
        password: body.password.clone(),
        trust_level: body.trust_level,
        always_allow: body.always_allow,
        allow_kind: body.allow_kind.clone(),
        app_name: body.app_name.clone(),
    };
    state.queue.approve(&id, opts)?;
    state.pipeline.execute_approved_request(&id, body.password.as_deref()).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn deny_request(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    state.queue.deny(&id)?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct BatchApproveRequest {
    pub ids: Vec<String>,
    #[serde(default)]
    pub trust_level: Option<TrustLevel>,
    #[serde(default)]
    pub always_allow: bool,
}

pub async fn batch_approve(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchApproveRequest>,
) -> ApiResult<Json<Vec<BatchResult>>> {
    let opts = ApproveOptions { trust_level: body.trust_level, always_allow: body.always_allow, ..Default::default() };
    let results = state.queue.batch_approve(&body.ids, opts)?;
    for result in &results {
        if result.success {
            if let Err(e) = state.pipeline.execute_approved_request(&result.id, None).await {
                log::warn!("batch approve: execution failed for request {}: {e}", result.id);
            }
        }
    }
    Ok(Json(results))
}
