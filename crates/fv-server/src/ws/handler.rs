//! Socket handlers for the three connection roles.
//!
//! Each socket is authenticated from its handshake query before the upgrade
//! completes, then runs a reader loop plus a writer task. Reliable events
//! flow through an unbounded lane; frames go through a small bounded lane
//! that drops on overrun. Group membership and status broadcasts are undone
//! on every exit path of the reader loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use uuid::Uuid;

use super::protocol::{
    self, Envelope, FRAME_LANE_CAPACITY, HEARTBEAT_INTERVAL_SECS, HEARTBEAT_TIMEOUT_SECS,
    MAX_MESSAGE_SIZE,
};
use super::registry::{user_group, viewers_group, AgentConnection, PeerHandle};
use super::validate;
use crate::AppState;
use fv_common::AppError;

// ─── Handshake ───────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeParams {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub agent_key: Option<String>,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub invite_token: Option<String>,
}

/// Connection identity resolved from the handshake. Only the authenticator
/// constructs one; the handlers trust it.
#[derive(Debug)]
pub enum Grant {
    Agent {
        user_id: String,
        machine_id: String,
        agent_key: String,
    },
    Viewer {
        user_id: String,
        agent_key: String,
    },
    Dashboard {
        user_id: String,
    },
}

pub(crate) async fn authenticate(
    state: &AppState,
    params: &HandshakeParams,
) -> Result<Grant, AppError> {
    if params.role.as_deref() == Some("agent") {
        let key = params
            .agent_key
            .as_deref()
            .ok_or_else(|| AppError::Unauthorized("Missing agent key".into()))?;
        let (user, machine) = state
            .users
            .get_by_agent_key(key)
            .await
            .ok_or_else(|| AppError::Unauthorized("Invalid agent key".into()))?;
        return Ok(Grant::Agent {
            user_id: user.id,
            machine_id: machine.id,
            agent_key: machine.agent_key,
        });
    }

    // Invite tokens grant machine-scoped viewing without a login session.
    if let Some(invite_token) = &params.invite_token {
        let invite = state
            .invites
            .inspect(invite_token)
            .ok_or_else(|| AppError::Unauthorized("Invalid or expired invite link".into()))?;
        let machines = state
            .users
            .get_machines(&invite.user_id)
            .await
            .unwrap_or_default();
        let machine = machines
            .into_iter()
            .find(|m| m.id == invite.machine_id)
            .ok_or_else(|| AppError::Unauthorized("Invalid or expired invite link".into()))?;
        return Ok(Grant::Viewer {
            user_id: invite.user_id,
            agent_key: machine.agent_key,
        });
    }

    let token = params
        .token
        .as_deref()
        .ok_or_else(|| AppError::Unauthorized("Missing credentials".into()))?;
    let user_id = state
        .sessions
        .validate(token)
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired session".into()))?;

    match params.role.as_deref() {
        Some("dashboard") => Ok(Grant::Dashboard { user_id }),
        Some("viewer") | None => {
            let machine_id = params
                .machine_id
                .as_deref()
                .ok_or_else(|| AppError::BadRequest("Missing machine id".into()))?;
            let machines = state.users.get_machines(&user_id).await.unwrap_or_default();
            let machine = machines
                .into_iter()
                .find(|m| m.id == machine_id)
                .ok_or_else(|| AppError::NotFound("Unknown machine".into()))?;
            Ok(Grant::Viewer {
                user_id,
                agent_key: machine.agent_key,
            })
        }
        Some(other) => Err(AppError::BadRequest(format!("Unknown role: {other}"))),
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HandshakeParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let grant = match authenticate(&state, &params).await {
        Ok(grant) => grant,
        Err(e) => {
            tracing::warn!("Socket handshake refused: {e}");
            return e.into_response();
        }
    };

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| async move {
            match grant {
                Grant::Agent {
                    user_id,
                    machine_id,
                    agent_key,
                } => handle_agent_socket(socket, state, user_id, machine_id, agent_key).await,
                Grant::Viewer { user_id, agent_key } => {
                    handle_viewer_socket(socket, state, user_id, agent_key).await
                }
                Grant::Dashboard { user_id } => {
                    handle_dashboard_socket(socket, state, user_id).await
                }
            }
        })
}

// ─── Writer tasks ────────────────────────────────────────────

/// Forward the reliable lane to the socket.
fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    })
}

/// Give the writer a moment to flush queued messages (`kicked`, close
/// frames), then stop it. Callers drop their senders first so the writer's
/// channel drains to completion.
async fn drain_writer(mut task: tokio::task::JoinHandle<()>) {
    if tokio::time::timeout(Duration::from_secs(1), &mut task)
        .await
        .is_err()
    {
        task.abort();
    }
}

/// Forward both lanes to the socket, reliable events ahead of frames.
fn spawn_dual_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    mut frame_rx: mpsc::Receiver<Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                msg = rx.recv() => msg,
                msg = frame_rx.recv() => msg,
            };
            let Some(msg) = msg else { break };
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    })
}

// ─── Agent socket ────────────────────────────────────────────

async fn handle_agent_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    user_id: String,
    machine_id: String,
    agent_key: String,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let send_task = spawn_writer(ws_sender, rx);

    let conn_id = Uuid::new_v4();
    let kick = Arc::new(Notify::new());

    // Singleton per key: a fresh connection displaces the old one. The prior
    // agent hears `kicked`, gets a close frame, and its reader is woken.
    let prior = state.registry.register_agent(AgentConnection {
        conn_id,
        agent_key: agent_key.clone(),
        user_id: user_id.clone(),
        machine_id: machine_id.clone(),
        tx: tx.clone(),
        kick: kick.clone(),
        screen_info: None,
    });
    if let Some(prior) = prior {
        tracing::info!(%agent_key, "Evicting previous agent connection");
        let _ = prior
            .tx
            .send(protocol::kicked("Another agent connected for this machine"));
        let _ = prior.tx.send(Message::Close(None));
        prior.kick.notify_one();
    }

    let viewers = viewers_group(&agent_key);
    let users = user_group(&user_id);
    state
        .registry
        .broadcast(&users, protocol::machine_status(&machine_id, true));
    state
        .registry
        .broadcast(&viewers, protocol::agent_status(true));
    // Viewers may already be waiting on this machine.
    if state.registry.group_size(&viewers) > 0 {
        let _ = tx.send(protocol::start_streaming());
    }

    tracing::info!(%agent_key, %machine_id, "Agent socket active");

    let mut ping = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = kick.notified() => {
                tracing::info!(%agent_key, "Agent connection evicted");
                break;
            }
            _ = ping.tick() => {
                if last_pong.elapsed() > Duration::from_secs(HEARTBEAT_TIMEOUT_SECS) {
                    tracing::warn!(%agent_key, "Agent heartbeat timed out");
                    break;
                }
                let _ = tx.send(Message::Ping(Default::default()));
            }
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Some(envelope) = Envelope::parse(text.as_str()) else {
                            tracing::warn!(%agent_key, "Undecodable agent message dropped");
                            continue;
                        };
                        match envelope.event.as_str() {
                            "screen-info" => {
                                state.registry.set_screen_info(&agent_key, envelope.data);
                                state.registry.broadcast(&viewers, Message::Text(text));
                            }
                            // Frames ride the volatile lane: a stalled viewer
                            // misses frames, it never builds a backlog.
                            "frame" => {
                                state.registry.broadcast_frame(&viewers, Message::Text(text));
                            }
                            "displays-list" | "clipboard-content" => {
                                state.registry.broadcast(&viewers, Message::Text(text));
                            }
                            other => {
                                tracing::debug!(event = other, "Ignoring unexpected agent event");
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => last_pong = Instant::now(),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data));
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(%agent_key, "Agent socket error: {e}");
                        break;
                    }
                }
            }
        }
    }

    // ── Cleanup ──────────────────────────────────────────────
    // An evicted connection no longer owns the registry entry; only a real
    // disconnect takes the machine offline.
    let owned = state.registry.remove_agent(&agent_key, conn_id);
    drop(tx);
    drain_writer(send_task).await;
    if owned {
        state
            .registry
            .broadcast(&users, protocol::machine_status(&machine_id, false));
        state
            .registry
            .broadcast(&viewers, protocol::agent_status(false));
        tracing::info!(%agent_key, %machine_id, "Agent disconnected, machine offline");
    }
}

// ─── Viewer socket ───────────────────────────────────────────

async fn handle_viewer_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    user_id: String,
    agent_key: String,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let (frame_tx, frame_rx) = mpsc::channel::<Message>(FRAME_LANE_CAPACITY);
    let send_task = spawn_dual_writer(ws_sender, rx, frame_rx);

    let conn_id = Uuid::new_v4();
    let viewers = viewers_group(&agent_key);
    let users = user_group(&user_id);

    let watchers = state.registry.join(
        &viewers,
        conn_id,
        PeerHandle {
            reliable: tx.clone(),
            frames: Some(frame_tx),
        },
    );
    state.registry.join(
        &users,
        conn_id,
        PeerHandle {
            reliable: tx.clone(),
            frames: None,
        },
    );

    if state.registry.agent_present(&agent_key) {
        let _ = tx.send(protocol::agent_status(true));
        if let Some(info) = state.registry.agent_screen_info(&agent_key) {
            let _ = tx.send(protocol::message("screen-info", info));
        }
        // First watcher wakes the capture loop.
        if watchers == 1 {
            state
                .registry
                .send_to_agent(&agent_key, protocol::start_streaming());
        }
    } else {
        let _ = tx.send(protocol::agent_status(false));
    }

    tracing::info!(%agent_key, watchers, "Viewer attached");

    let mut ping = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if last_pong.elapsed() > Duration::from_secs(HEARTBEAT_TIMEOUT_SECS) {
                    tracing::warn!(%agent_key, "Viewer heartbeat timed out");
                    break;
                }
                let _ = tx.send(Message::Ping(Default::default()));
            }
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Some(envelope) = Envelope::parse(text.as_str()) else {
                            continue;
                        };
                        if envelope.event == "latency-ping" {
                            // RTT probe: echoed straight back, the agent is
                            // never involved.
                            let _ = tx.send(protocol::message("latency-pong", envelope.data));
                            continue;
                        }
                        if validate::viewer_event_allowed(&envelope.event, &envelope.data) {
                            state.registry.send_to_agent(&agent_key, Message::Text(text));
                        } else {
                            tracing::debug!(event = %envelope.event, "Dropped invalid viewer event");
                        }
                    }
                    Some(Ok(Message::Pong(_))) => last_pong = Instant::now(),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data));
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(%agent_key, "Viewer socket error: {e}");
                        break;
                    }
                }
            }
        }
    }

    // ── Cleanup ──────────────────────────────────────────────
    state.registry.leave(&users, conn_id);
    let remaining = state.registry.leave(&viewers, conn_id);
    drop(tx);
    drain_writer(send_task).await;
    // Last watcher gone: let the agent pause capture.
    if remaining == 0 {
        state
            .registry
            .send_to_agent(&agent_key, protocol::stop_streaming());
    }
    tracing::info!(%agent_key, remaining, "Viewer detached");
}

// ─── Dashboard socket ────────────────────────────────────────

async fn handle_dashboard_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let send_task = spawn_writer(ws_sender, rx);

    let conn_id = Uuid::new_v4();
    let users = user_group(&user_id);
    state.registry.join(
        &users,
        conn_id,
        PeerHandle {
            reliable: tx.clone(),
            frames: None,
        },
    );

    // Initial snapshot: one status per owned machine.
    let machines = state.users.get_machines(&user_id).await.unwrap_or_default();
    for machine in &machines {
        let connected = state.registry.agent_present(&machine.agent_key);
        let _ = tx.send(protocol::machine_status(&machine.id, connected));
    }

    tracing::info!(%user_id, machines = machines.len(), "Dashboard attached");

    let mut ping = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if last_pong.elapsed() > Duration::from_secs(HEARTBEAT_TIMEOUT_SECS) {
                    tracing::warn!(%user_id, "Dashboard heartbeat timed out");
                    break;
                }
                let _ = tx.send(Message::Ping(Default::default()));
            }
            msg = ws_receiver.next() => {
                match msg {
                    // Dashboards only listen.
                    Some(Ok(Message::Text(_))) => {}
                    Some(Ok(Message::Pong(_))) => last_pong = Instant::now(),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data));
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(%user_id, "Dashboard socket error: {e}");
                        break;
                    }
                }
            }
        }
    }

    state.registry.leave(&users, conn_id);
    drop(tx);
    drain_writer(send_task).await;
    tracing::info!(%user_id, "Dashboard detached");
}

#[cfg(test)]
mod tests {
    use super::*;
    use fv_common::AppConfig;
    use tempfile::tempdir;

    async fn test_state() -> Arc<AppState> {
        let dir = tempdir().unwrap();
        let config = AppConfig {
            users_file: dir
                .path()
                .join("users.json")
                .to_string_lossy()
                .into_owned(),
            ..AppConfig::default()
        };
        // keep the backing dir alive for the duration of the test process
        std::mem::forget(dir);
        AppState::init(config).await.unwrap()
    }

    fn agent_params(key: &str) -> HandshakeParams {
        HandshakeParams {
            role: Some("agent".into()),
            agent_key: Some(key.into()),
            ..HandshakeParams::default()
        }
    }

    fn viewer_params(token: &str, machine_id: Option<&str>) -> HandshakeParams {
        HandshakeParams {
            role: Some("viewer".into()),
            token: Some(token.into()),
            machine_id: machine_id.map(Into::into),
            ..HandshakeParams::default()
        }
    }

    #[tokio::test]
    async fn agent_handshake_resolves_key_to_machine() {
        let state = test_state().await;
        let machines = state.users.get_machines("kingpin").await.unwrap();
        let key = machines[0].agent_key.clone();

        let grant = authenticate(&state, &agent_params(&key)).await.unwrap();
        match grant {
            Grant::Agent {
                user_id,
                machine_id,
                agent_key,
            } => {
                assert_eq!(user_id, "kingpin");
                assert_eq!(machine_id, machines[0].id);
                assert_eq!(agent_key, key);
            }
            other => panic!("expected agent grant, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bogus_agent_key_is_refused() {
        let state = test_state().await;
        let err = authenticate(&state, &agent_params("bogus")).await.unwrap_err();
        assert!(err.to_string().contains("Invalid agent key"));
    }

    #[tokio::test]
    async fn viewer_handshake_requires_session_and_machine() {
        let state = test_state().await;
        let session = state.sessions.create("kingpin");
        let machines = state.users.get_machines("kingpin").await.unwrap();

        let grant = authenticate(&state, &viewer_params(&session.token, Some(&machines[0].id)))
            .await
            .unwrap();
        assert!(matches!(grant, Grant::Viewer { ref user_id, .. } if user_id == "kingpin"));

        // no machine id → bad request
        let err = authenticate(&state, &viewer_params(&session.token, None))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("machine id"));

        // someone else's machine id → not found
        let tez = state.users.get_machines("tez").await.unwrap();
        let err = authenticate(&state, &viewer_params(&session.token, Some(&tez[0].id)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown machine"));
    }

    #[tokio::test]
    async fn dashboard_handshake_needs_only_a_session() {
        let state = test_state().await;
        let session = state.sessions.create("tez");
        let grant = authenticate(
            &state,
            &HandshakeParams {
                role: Some("dashboard".into()),
                token: Some(session.token.clone()),
                ..HandshakeParams::default()
            },
        )
        .await
        .unwrap();
        assert!(matches!(grant, Grant::Dashboard { ref user_id } if user_id == "tez"));
    }

    #[tokio::test]
    async fn invite_token_grants_machine_scoped_viewing() {
        let state = test_state().await;
        let machines = state.users.get_machines("kingpin").await.unwrap();
        let invite = state
            .invites
            .create("kingpin", &machines[0].id, "Kingpin", "Desktop");

        let invite_params = HandshakeParams {
            invite_token: Some(invite.token.clone()),
            ..HandshakeParams::default()
        };
        let grant = authenticate(&state, &invite_params).await.unwrap();
        match grant {
            Grant::Viewer { user_id, agent_key } => {
                assert_eq!(user_id, "kingpin");
                assert_eq!(agent_key, machines[0].agent_key);
            }
            other => panic!("expected viewer grant, got {other:?}"),
        }

        state.invites.revoke("kingpin", &invite.token);
        let err = authenticate(&state, &invite_params).await.unwrap_err();
        assert!(err.to_string().contains("Invalid or expired invite link"));
    }

    #[tokio::test]
    async fn empty_handshake_is_refused() {
        let state = test_state().await;
        let err = authenticate(&state, &HandshakeParams::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Missing credentials"));
    }
}
