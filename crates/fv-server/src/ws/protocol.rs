//! Wire protocol for the relay's socket channel.
//!
//! Every message is a JSON text frame `{"event": <name>, "data": <payload>}`.
//! Payloads are opaque to the relay except where validation demands a look
//! inside; frame contents in particular are never decoded, only fanned out.

use axum::extract::ws::Message;
use serde::Deserialize;
use serde_json::{json, Value};

/// Hard cap on a single socket message (oversize disconnects the peer).
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Server ping cadence.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 25;

/// A peer with no pong for this long is considered dead.
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 60;

/// High-water mark of the volatile frame lane. A viewer whose lane is full
/// misses frames instead of building a backlog.
pub const FRAME_LANE_CAPACITY: usize = 8;

/// One incoming named event.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn parse(text: &str) -> Option<Envelope> {
        serde_json::from_str(text).ok()
    }
}

/// Build an outbound event message.
pub fn message(event: &str, data: Value) -> Message {
    Message::Text(json!({ "event": event, "data": data }).to_string().into())
}

pub fn agent_status(connected: bool) -> Message {
    message("agent-status", json!({ "connected": connected }))
}

pub fn machine_status(machine_id: &str, connected: bool) -> Message {
    message(
        "machine-status",
        json!({ "machineId": machine_id, "connected": connected }),
    )
}

pub fn kicked(reason: &str) -> Message {
    message("kicked", json!({ "reason": reason }))
}

pub fn server_shutdown(text: &str) -> Message {
    message("server-shutdown", json!({ "message": text }))
}

pub fn start_streaming() -> Message {
    message("start-streaming", Value::Null)
}

pub fn stop_streaming() -> Message {
    message("stop-streaming", Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_event_and_data() {
        let env = Envelope::parse(r#"{"event":"mouse-move","data":{"x":1,"y":2}}"#).unwrap();
        assert_eq!(env.event, "mouse-move");
        assert_eq!(env.data["x"], 1);
    }

    #[test]
    fn envelope_data_defaults_to_null() {
        let env = Envelope::parse(r#"{"event":"list-screens"}"#).unwrap();
        assert_eq!(env.event, "list-screens");
        assert!(env.data.is_null());
    }

    #[test]
    fn envelope_rejects_garbage() {
        assert!(Envelope::parse("not json").is_none());
        assert!(Envelope::parse(r#"{"data":{}}"#).is_none());
    }

    #[test]
    fn outbound_messages_are_well_formed() {
        let Message::Text(text) = machine_status("m1", true) else {
            panic!("expected text frame");
        };
        let v: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(v["event"], "machine-status");
        assert_eq!(v["data"]["machineId"], "m1");
        assert_eq!(v["data"]["connected"], true);
    }
}
