//! Machine CRUD, Wake-on-LAN addressing, and the wake trigger.
//!
//! All routes are owner-only: the session's user must match the `:userId`
//! path segment.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use regex::Regex;
use serde_json::{json, Value};

use crate::api::middleware::{AuthSession, ClientIp};
use crate::services::wol;
use crate::store::users::Machine;
use crate::AppState;
use fv_common::{AppError, AppResult};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/{user_id}", get(list_machines).post(add_machine))
        .route(
            "/{user_id}/{machine_id}",
            patch(rename_machine).delete(remove_machine),
        )
        .route("/{user_id}/{machine_id}/mac", patch(set_mac))
        .route("/{user_id}/{machine_id}/wake", post(wake))
        .with_state(state)
}

fn machine_json(machine: &Machine, connected: bool) -> Value {
    json!({
        "id": machine.id,
        "name": machine.name,
        "agentKey": machine.agent_key,
        "macAddress": machine.mac_address,
        "broadcastAddress": machine.broadcast_address,
        "connected": connected,
    })
}

async fn find_machine(state: &AppState, user_id: &str, machine_id: &str) -> AppResult<Machine> {
    let machines = state
        .users
        .get_machines(user_id)
        .await
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    machines
        .into_iter()
        .find(|m| m.id == machine_id)
        .ok_or_else(|| AppError::NotFound("Unknown machine".into()))
}

// ─── CRUD ────────────────────────────────────────────────────

async fn list_machines(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Value>> {
    auth.require_user(&user_id)?;
    let machines = state
        .users
        .get_machines(&user_id)
        .await
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let list: Vec<Value> = machines
        .iter()
        .map(|m| machine_json(m, state.registry.agent_present(&m.agent_key)))
        .collect();
    Ok(Json(Value::Array(list)))
}

async fn add_machine(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(payload): Json<Value>,
) -> AppResult<impl IntoResponse> {
    auth.require_user(&user_id)?;
    let name = machine_name(&payload)?;

    let machine = state
        .users
        .add_machine(&user_id, name)
        .await
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    tracing::info!(%user_id, machine_id = %machine.id, "Machine added");

    Ok((StatusCode::CREATED, Json(machine_json(&machine, false))))
}

async fn rename_machine(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
    Path((user_id, machine_id)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> AppResult<Json<Value>> {
    auth.require_user(&user_id)?;
    let name = machine_name(&payload)?;

    let machine = state
        .users
        .rename_machine(&user_id, &machine_id, name)
        .await
        .ok_or_else(|| AppError::NotFound("Unknown machine".into()))?;
    let connected = state.registry.agent_present(&machine.agent_key);
    Ok(Json(machine_json(&machine, connected)))
}

async fn remove_machine(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
    Path((user_id, machine_id)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    auth.require_user(&user_id)?;
    if !state.users.remove_machine(&user_id, &machine_id).await {
        return Err(AppError::NotFound("Unknown machine".into()));
    }
    tracing::info!(%user_id, %machine_id, "Machine removed");
    Ok(Json(json!({ "ok": true })))
}

fn machine_name(payload: &Value) -> AppResult<&str> {
    let name = payload
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing machine name".into()))?;
    if name.chars().count() > 100 {
        return Err(AppError::BadRequest("Machine name too long".into()));
    }
    Ok(name)
}

// ─── Wake-on-LAN addressing ──────────────────────────────────

fn mac_regex() -> &'static Regex {
    static MAC_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    MAC_RE.get_or_init(|| {
        Regex::new(r"^([0-9A-Fa-f]{2}[:\-]){5}[0-9A-Fa-f]{2}$").expect("valid MAC regex")
    })
}

async fn set_mac(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
    Path((user_id, machine_id)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> AppResult<Json<Value>> {
    auth.require_user(&user_id)?;

    let mac_address = match payload.get("macAddress") {
        None | Some(Value::Null) => None,
        Some(Value::String(mac)) if mac_regex().is_match(mac) => Some(mac.clone()),
        Some(_) => return Err(AppError::BadRequest("Invalid MAC address".into())),
    };
    let broadcast_address = match payload.get("broadcastAddress") {
        None | Some(Value::Null) => None,
        Some(Value::String(addr)) if addr.parse::<std::net::Ipv4Addr>().is_ok() => {
            Some(addr.clone())
        }
        Some(_) => return Err(AppError::BadRequest("Invalid broadcast address".into())),
    };

    let machine = state
        .users
        .set_mac_address(&user_id, &machine_id, mac_address, broadcast_address)
        .await
        .ok_or_else(|| AppError::NotFound("Unknown machine".into()))?;
    let connected = state.registry.agent_present(&machine.agent_key);
    Ok(Json(machine_json(&machine, connected)))
}

// ─── Wake trigger ────────────────────────────────────────────

async fn wake(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
    Path((user_id, machine_id)): Path<(String, String)>,
    ClientIp(source): ClientIp,
) -> AppResult<Json<Value>> {
    auth.require_user(&user_id)?;
    let machine = find_machine(&state, &user_id, &machine_id).await?;

    if let Some(retry) = state.wake_limiter.at_limit(&source) {
        return Err(AppError::RateLimited(format!(
            "Too many wake attempts. Try again in {retry} second(s)."
        )));
    }
    state.wake_limiter.record(&source);

    // A connected machine is already awake; don't spam the network.
    if state.registry.agent_present(&machine.agent_key) {
        return Ok(Json(json!({ "ok": true, "alreadyOnline": true })));
    }

    let mac = machine
        .mac_address
        .ok_or_else(|| AppError::BadRequest("Machine has no MAC address configured".into()))?;

    wol::send(&mac, machine.broadcast_address.as_deref())
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    Ok(Json(json!({
        "ok": true,
        "message": format!("Wake-on-LAN packet sent to {mac}"),
    })))
}
