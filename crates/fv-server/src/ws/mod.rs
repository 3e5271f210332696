//! WebSocket gateway — the relay's live event channel.

pub mod handler;
pub mod protocol;
pub mod registry;
pub mod validate;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", axum::routing::get(handler::ws_handler))
        .with_state(state)
}
