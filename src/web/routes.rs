//! REST API route definitions.

use axum::{
    routing::{get, post},
    Router,
};

use crate::web::handlers::{battle, history};
use crate::web::state::WebAppState;

/// Build the API router with all REST endpoints.
pub fn api_routes() -> Router<WebAppState> {
    Router::new()
        .route("/battle", get(battle::get_battle).post(battle::start_battle))
        .route("/battle/log", get(battle::get_battle_log))
        .route("/battle/end", post(battle::end_battle))
        .route("/battles", get(history::list_battles))
}
