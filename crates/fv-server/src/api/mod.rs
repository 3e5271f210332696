//! HTTP control plane routes.

pub mod auth;
pub mod health;
pub mod invites;
pub mod machines;
pub mod middleware;
pub mod setup;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

/// Build the `/api` router with all sub-routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(auth::router(state.clone()))
        .nest("/machines", machines::router(state.clone()))
        .merge(invites::router(state.clone()))
        .merge(setup::router(state.clone()))
        .merge(health::router(state))
}
