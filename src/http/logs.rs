//! `/logs` endpoint (§6): tails the runtime log ring buffer (C12), not the
//! persisted activity-log table, filtered by level and a substring search.

use super::AppState;
use crate::audit::LogLine;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

const LOG_POOL_SIZE: usize = 1000;

#[derive(Debug, Deserialize, Default)]
pub struct LogsQuery {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn list_logs(State(state): State<Arc<AppState>>, Query(query): Query<LogsQuery>) -> Json<Vec<LogLine>> {
    let limit = query.limit.unwrap_or(200).min(LOG_POOL_SIZE);
    let level = query.level.as_deref().map(|l| l.to_uppercase());
    let search = query.search.as_deref().map(|s| s.to_lowercase());
    let filtered: Vec<LogLine> = state
        .audit
        .recent(LOG_POOL_SIZE)
        .into_iter()
        .filter(|line| level.as_deref().map(|l| line.level == l).unwrap_or(true))
        .filter(|line| search.as_deref().map(|s| line.message.to_lowercase().contains(s)).unwrap_or(true))
        .take(limit)
        .collect();
    Json(filtered)
}
