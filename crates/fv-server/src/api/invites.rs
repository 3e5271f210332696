//! Share invite API — issue, inspect, revoke.
//!
//! An invite grants anonymous viewer access to one machine until its
//! absolute expiry. Inspection is public (the invite page renders names
//! before any socket is opened); issue and revoke are owner-only.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::api::middleware::AuthSession;
use crate::AppState;
use fv_common::{AppError, AppResult};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/invites/{user_id}/{machine_id}", post(create_invite))
        .route("/invites/{user_id}/{machine_id}", delete(revoke_invite))
        .route("/invite-info/{invite_token}", get(invite_info))
        .with_state(state)
}

async fn create_invite(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
    Path((user_id, machine_id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    auth.require_user(&user_id)?;

    let user = state
        .users
        .get_user(&user_id)
        .await
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    let machine = user
        .machines
        .iter()
        .find(|m| m.id == machine_id)
        .ok_or_else(|| AppError::NotFound("Unknown machine".into()))?;

    let invite = state
        .invites
        .create(&user_id, &machine.id, &user.display_name, &machine.name);
    tracing::info!(%user_id, %machine_id, "Invite created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "token": invite.token,
            "machineName": invite.machine_name,
            "expiresAt": invite.expires_at,
        })),
    ))
}

/// Public: resolves an invite token to its display snapshot.
async fn invite_info(
    State(state): State<Arc<AppState>>,
    Path(invite_token): Path<String>,
) -> AppResult<Json<Value>> {
    let invite = state
        .invites
        .inspect(&invite_token)
        .ok_or_else(|| AppError::NotFound("Invalid or expired invite link".into()))?;

    Ok(Json(json!({
        "userId": invite.user_id,
        "machineId": invite.machine_id,
        "displayName": invite.display_name,
        "machineName": invite.machine_name,
        "expiresAt": invite.expires_at,
    })))
}

async fn revoke_invite(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
    Path((user_id, invite_token)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    auth.require_user(&user_id)?;
    if !state.invites.revoke(&user_id, &invite_token) {
        return Err(AppError::NotFound("Unknown invite".into()));
    }
    tracing::info!(%user_id, "Invite revoked");
    Ok(Json(json!({ "ok": true })))
}
