//! Battle lifecycle handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::battle::{ObserverSnapshot, StartRequest};
use crate::web::error::WebError;
use crate::web::state::WebAppState;

/// Response for a started battle.
#[derive(Debug, Serialize)]
pub struct StartBattleResponse {
    pub battle_id: Uuid,
}

/// Full protocol log of the current (or last) battle.
#[derive(Debug, Serialize)]
pub struct ProtocolLogResponse {
    pub battle_id: Uuid,
    pub log: Vec<String>,
}

/// Response for a forced end.
#[derive(Debug, Serialize)]
pub struct EndBattleResponse {
    pub battle_id: Uuid,
    pub ended: bool,
}

/// Start a battle between two agents.
pub async fn start_battle(
    State(state): State<WebAppState>,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<StartBattleResponse>), WebError> {
    let battle_id = state.gate().start(request).await?;
    Ok((StatusCode::CREATED, Json(StartBattleResponse { battle_id })))
}

/// Snapshot of the current battle, or an idle snapshot.
pub async fn get_battle(State(state): State<WebAppState>) -> Json<ObserverSnapshot> {
    Json(state.gate().status())
}

/// Protocol log of the current session.
pub async fn get_battle_log(
    State(state): State<WebAppState>,
) -> Result<Json<ProtocolLogResponse>, WebError> {
    let (battle_id, log) = state
        .gate()
        .protocol_log()
        .ok_or_else(|| WebError::NotFound("No battle session".to_string()))?;
    Ok(Json(ProtocolLogResponse { battle_id, log }))
}

/// Force the running battle to end in a tie.
pub async fn end_battle(
    State(state): State<WebAppState>,
) -> Result<Json<EndBattleResponse>, WebError> {
    let battle_id = state.gate().force_end().await?;
    Ok(Json(EndBattleResponse {
        battle_id,
        ended: true,
    }))
}
