//! Persisted battle history.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::battle::BattleRecord;
use crate::web::error::WebError;
use crate::web::state::WebAppState;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ListBattlesResponse {
    pub battles: Vec<BattleRecord>,
}

/// Most recently finished battles first.
pub async fn list_battles(
    State(state): State<WebAppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ListBattlesResponse>, WebError> {
    let Some(store) = state.records().cloned() else {
        return Ok(Json(ListBattlesResponse {
            battles: Vec::new(),
        }));
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let battles = tokio::task::spawn_blocking(move || store.recent(limit))
        .await
        .map_err(|e| WebError::Internal(format!("History task failed: {}", e)))??;

    Ok(Json(ListBattlesResponse { battles }))
}
