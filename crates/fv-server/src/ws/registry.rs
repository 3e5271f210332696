//! In-memory registry for live socket connections.
//!
//! Tracks the singleton agent connection per agent key and the broadcast
//! groups (rooms) that viewers and dashboards join. Sender handles are
//! cloned out of the maps before any send, so no shard lock is held while a
//! message is pushed into a channel.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use super::protocol;

/// Channel sender for the reliable event lane of a peer.
pub type ReliableSender = mpsc::UnboundedSender<Message>;

/// Bounded sender for the volatile frame lane. Sends use `try_send`: a full
/// lane drops the frame instead of buffering it.
pub type FrameSender = mpsc::Sender<Message>;

/// Sender handles for one non-agent peer (viewer or dashboard).
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub reliable: ReliableSender,
    /// Present only on peers that receive frames.
    pub frames: Option<FrameSender>,
}

/// Metadata kept for the connected agent of one machine.
#[derive(Debug, Clone)]
pub struct AgentConnection {
    pub conn_id: Uuid,
    pub agent_key: String,
    pub user_id: String,
    pub machine_id: String,
    pub tx: ReliableSender,
    /// Signalled when a replacement agent takes over this key.
    pub kick: Arc<Notify>,
    /// Most recent `screen-info` payload from this agent.
    pub screen_info: Option<Value>,
}

/// Group id of all viewers watching one machine.
pub fn viewers_group(agent_key: &str) -> String {
    format!("viewers:{agent_key}")
}

/// Group id of all non-agent sockets (viewers + dashboards) of one user.
pub fn user_group(user_id: &str) -> String {
    format!("user:{user_id}")
}

/// Central registry shared across all socket handler tasks.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// agent key → live agent connection (at most one per key)
    agents: DashMap<String, AgentConnection>,
    /// group id → member conn id → sender handles
    groups: DashMap<String, HashMap<Uuid, PeerHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Agent lifecycle ─────────────────────────────────────

    /// Register the agent for its key and return the displaced predecessor,
    /// if any. The swap is a single map insert: there is no instant with two
    /// live entries, or none, for the same key.
    pub fn register_agent(&self, conn: AgentConnection) -> Option<AgentConnection> {
        tracing::info!(agent_key = %conn.agent_key, machine_id = %conn.machine_id, "Agent registered");
        self.agents.insert(conn.agent_key.clone(), conn)
    }

    /// Remove the agent entry, but only while it still belongs to `conn_id`.
    /// An evicted agent's cleanup must not tear down its replacement.
    pub fn remove_agent(&self, agent_key: &str, conn_id: Uuid) -> bool {
        let removed = self
            .agents
            .remove_if(agent_key, |_, c| c.conn_id == conn_id)
            .is_some();
        if removed {
            tracing::info!(%agent_key, "Agent unregistered");
        }
        removed
    }

    pub fn agent_present(&self, agent_key: &str) -> bool {
        self.agents.contains_key(agent_key)
    }

    /// Latest cached `screen-info` of the connected agent, if both exist.
    pub fn agent_screen_info(&self, agent_key: &str) -> Option<Value> {
        self.agents.get(agent_key).and_then(|c| c.screen_info.clone())
    }

    pub fn set_screen_info(&self, agent_key: &str, info: Value) {
        if let Some(mut conn) = self.agents.get_mut(agent_key) {
            conn.screen_info = Some(info);
        }
    }

    /// Push a reliable message to the connected agent. Returns `false` when
    /// no agent is connected for the key.
    pub fn send_to_agent(&self, agent_key: &str, msg: Message) -> bool {
        let tx = self.agents.get(agent_key).map(|c| c.tx.clone());
        match tx {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    // ─── Groups ──────────────────────────────────────────────

    /// Add a member; returns the group size after the join.
    pub fn join(&self, group: &str, conn_id: Uuid, handle: PeerHandle) -> usize {
        let mut members = self.groups.entry(group.to_string()).or_default();
        members.insert(conn_id, handle);
        members.len()
    }

    /// Drop a member; returns the group size after the leave. Empty groups
    /// are removed from the map.
    pub fn leave(&self, group: &str, conn_id: Uuid) -> usize {
        let mut size = 0;
        if let Some(mut members) = self.groups.get_mut(group) {
            members.remove(&conn_id);
            size = members.len();
        }
        if size == 0 {
            self.groups.remove_if(group, |_, m| m.is_empty());
        }
        size
    }

    pub fn group_size(&self, group: &str) -> usize {
        self.groups.get(group).map(|m| m.len()).unwrap_or(0)
    }

    /// Broadcast a reliable event to every member of a group.
    pub fn broadcast(&self, group: &str, msg: Message) {
        let senders: Vec<ReliableSender> = match self.groups.get(group) {
            Some(members) => members.values().map(|h| h.reliable.clone()).collect(),
            None => return,
        };
        for tx in senders {
            let _ = tx.send(msg.clone());
        }
    }

    /// Broadcast a frame on the volatile lane. Members whose lane is full
    /// simply miss this frame; members without a frame lane are skipped.
    pub fn broadcast_frame(&self, group: &str, msg: Message) {
        let senders: Vec<FrameSender> = match self.groups.get(group) {
            Some(members) => members.values().filter_map(|h| h.frames.clone()).collect(),
            None => return,
        };
        for tx in senders {
            let _ = tx.try_send(msg.clone());
        }
    }

    // ─── Shutdown ────────────────────────────────────────────

    /// Push the shutdown notice and a close frame to every connected socket.
    pub fn broadcast_shutdown(&self, text: &str) {
        let note = protocol::server_shutdown(text);

        let mut peers: HashMap<Uuid, ReliableSender> = HashMap::new();
        for entry in self.groups.iter() {
            for (conn_id, handle) in entry.value() {
                peers
                    .entry(*conn_id)
                    .or_insert_with(|| handle.reliable.clone());
            }
        }
        for tx in peers.values() {
            let _ = tx.send(note.clone());
            let _ = tx.send(Message::Close(None));
        }

        let agents: Vec<ReliableSender> =
            self.agents.iter().map(|c| c.tx.clone()).collect();
        for tx in agents {
            let _ = tx.send(note.clone());
            let _ = tx.send(Message::Close(None));
        }

        tracing::info!(
            peers = peers.len(),
            agents = self.agents.len(),
            "Shutdown notice broadcast"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agent_conn(key: &str, tx: ReliableSender) -> AgentConnection {
        AgentConnection {
            conn_id: Uuid::new_v4(),
            agent_key: key.to_string(),
            user_id: "kingpin".to_string(),
            machine_id: "m1".to_string(),
            tx,
            kick: Arc::new(Notify::new()),
            screen_info: None,
        }
    }

    #[tokio::test]
    async fn second_agent_evicts_the_first() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let first = agent_conn("key", tx1);
        let first_id = first.conn_id;
        assert!(registry.register_agent(first).is_none());

        let second = agent_conn("key", tx2);
        let second_id = second.conn_id;
        let prior = registry.register_agent(second).expect("prior connection");
        assert_eq!(prior.conn_id, first_id);

        // The evicted connection's cleanup is a no-op ...
        assert!(!registry.remove_agent("key", first_id));
        assert!(registry.agent_present("key"));
        // ... while the replacement still owns the entry.
        assert!(registry.remove_agent("key", second_id));
        assert!(!registry.agent_present("key"));
    }

    #[tokio::test]
    async fn join_and_leave_report_group_sizes() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = PeerHandle {
            reliable: tx,
            frames: None,
        };

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(registry.join("viewers:k", a, handle.clone()), 1);
        assert_eq!(registry.join("viewers:k", b, handle.clone()), 2);
        assert_eq!(registry.group_size("viewers:k"), 2);

        assert_eq!(registry.leave("viewers:k", a), 1);
        assert_eq!(registry.leave("viewers:k", b), 0);
        assert_eq!(registry.group_size("viewers:k"), 0);
        // leaving an unknown group is harmless
        assert_eq!(registry.leave("viewers:k", b), 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.join(
            "user:kingpin",
            Uuid::new_v4(),
            PeerHandle {
                reliable: tx_a,
                frames: None,
            },
        );
        registry.join(
            "user:kingpin",
            Uuid::new_v4(),
            PeerHandle {
                reliable: tx_b,
                frames: None,
            },
        );

        registry.broadcast("user:kingpin", protocol::machine_status("m1", true));

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn full_frame_lane_drops_instead_of_buffering() {
        let registry = ConnectionRegistry::new();
        let (reliable, _r) = mpsc::unbounded_channel();
        let (frames, mut frame_rx) = mpsc::channel(1);
        registry.join(
            "viewers:k",
            Uuid::new_v4(),
            PeerHandle {
                reliable,
                frames: Some(frames),
            },
        );

        let frame = protocol::message("frame", json!({"frame": 1}));
        registry.broadcast_frame("viewers:k", frame.clone());
        registry.broadcast_frame("viewers:k", frame.clone());
        registry.broadcast_frame("viewers:k", frame);

        // Lane capacity is one: exactly one frame was queued, the rest vanished.
        assert!(frame_rx.try_recv().is_ok());
        assert!(frame_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn screen_info_cache_tracks_latest_emission() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register_agent(agent_conn("key", tx));

        assert!(registry.agent_screen_info("key").is_none());
        registry.set_screen_info("key", json!({"width": 2560, "height": 1440}));
        registry.set_screen_info("key", json!({"width": 1920, "height": 1080}));

        let info = registry.agent_screen_info("key").unwrap();
        assert_eq!(info["width"], 1920);
    }

    #[tokio::test]
    async fn send_to_agent_reports_presence() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to_agent("key", protocol::stop_streaming()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register_agent(agent_conn("key", tx));
        assert!(registry.send_to_agent("key", protocol::stop_streaming()));
        assert!(rx.try_recv().is_ok());
    }
}
