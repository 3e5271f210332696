//! Authentication API — login, logout, session introspection.
//!
//! Login is password-only: the store scans all users and the first verifier
//! match wins. Failures count toward a per-source lockout window.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::api::middleware::{bearer_token, AuthSession, ClientIp};
use crate::AppState;
use fv_common::{AppError, AppResult};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/session", get(get_session))
        .with_state(state)
}

async fn login(
    State(state): State<Arc<AppState>>,
    ClientIp(source): ClientIp,
    Json(payload): Json<Value>,
) -> AppResult<Json<Value>> {
    if let Some(retry) = state.login_limiter.at_limit(&source) {
        return Err(AppError::RateLimited(lockout_hint(retry)));
    }

    let password = payload
        .get("password")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::BadRequest("Missing password".into()))?;

    match state.users.authenticate_by_password(password).await {
        Some(user) => {
            state.login_limiter.reset(&source);
            let session = state.sessions.create(&user.id);
            tracing::info!(user_id = %user.id, "User logged in");
            Ok(Json(json!({
                "token": session.token,
                "userId": user.id,
                "displayName": user.display_name,
            })))
        }
        None => {
            let failures = state.login_limiter.record(&source);
            tracing::warn!(%source, failures, "Failed login attempt");
            if failures >= state.config.max_login_attempts {
                let retry = state.login_limiter.at_limit(&source).unwrap_or(60);
                Err(AppError::RateLimited(lockout_hint(retry)))
            } else {
                Err(AppError::Unauthorized("Invalid password".into()))
            }
        }
    }
}

fn lockout_hint(retry_secs: u64) -> String {
    let minutes = retry_secs.div_ceil(60).max(1);
    format!("Too many login attempts. Try again in {minutes} minute(s).")
}

/// Deletes the session if one is presented; always succeeds.
async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<Value> {
    if let Some(token) = bearer_token(&headers) {
        if state.sessions.remove(token) {
            tracing::info!("Session removed on logout");
        }
    }
    Json(json!({ "loggedOut": true }))
}

async fn get_session(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Value>> {
    let user = state
        .users
        .get_user(&auth.user_id)
        .await
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(Json(json!({
        "userId": user.id,
        "displayName": user.display_name,
    })))
}
