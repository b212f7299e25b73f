//! Application history endpoint.

use axum::Json;
use axum::extract::{Query, State};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use lendcore_core::storage::HistoryStore;
use lendcore_types::loan::LoanStatus;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub status: Option<LoanStatus>,
}

fn default_limit() -> usize {
    50
}

/// GET /api/history/applications
pub async fn list_applications(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Value> {
    let records: Vec<_> = state
        .history
        .list()
        .await
        .into_iter()
        .filter(|r| query.status.is_none_or(|status| r.status == status))
        .take(query.limit)
        .collect();

    Json(json!({
        "success": true,
        "count": records.len(),
        "applications": records,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
