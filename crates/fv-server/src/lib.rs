//! # fv-server
//!
//! The FarView relay: HTTP/JSON control plane plus a WebSocket switch that
//! fans live desktop frames out to viewers and forwards their input back to
//! the one agent per machine. All state except the user document lives in
//! memory and dies with the process.

pub mod api;
pub mod services;
pub mod store;
pub mod workers;
pub mod ws;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::response::Redirect;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use fv_common::AppConfig;
use services::ratelimit::{RateLimiter, WAKE_MAX_ATTEMPTS, WAKE_WINDOW_SECS};
use store::invites::InviteStore;
use store::sessions::SessionStore;
use store::users::UserStore;
use ws::registry::ConnectionRegistry;

/// Shared application state available to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub users: UserStore,
    pub sessions: SessionStore,
    pub invites: InviteStore,
    pub registry: ConnectionRegistry,
    pub login_limiter: RateLimiter,
    pub wake_limiter: RateLimiter,
    pub started_at: Instant,
}

impl AppState {
    /// Load persistent state and assemble the process singletons.
    pub async fn init(config: AppConfig) -> anyhow::Result<Arc<Self>> {
        let users = UserStore::load_or_seed(&config.users_file).await?;
        let login_limiter = RateLimiter::new(
            config.max_login_attempts,
            Duration::from_secs(config.lockout_minutes * 60),
        );
        let wake_limiter =
            RateLimiter::new(WAKE_MAX_ATTEMPTS, Duration::from_secs(WAKE_WINDOW_SECS));

        Ok(Arc::new(Self {
            config,
            users,
            sessions: SessionStore::new(),
            invites: InviteStore::new(),
            registry: ConnectionRegistry::new(),
            login_limiter,
            wake_limiter,
            started_at: Instant::now(),
        }))
    }
}

/// Build the complete router: control plane under `/api`, the socket
/// endpoint, agent file fetch, and a catch-all redirect home.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", api::router(state.clone()))
        .merge(ws::router(state.clone()))
        .merge(api::setup::files_router(state))
        .route("/", axum::routing::get(index))
        .fallback(fallback)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// The front proxy serves the viewer app; a direct hit gets a bare banner.
async fn index() -> &'static str {
    concat!("FarView relay ", env!("CARGO_PKG_VERSION"))
}

async fn fallback() -> Redirect {
    Redirect::temporary("/")
}
