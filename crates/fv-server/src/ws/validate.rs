//! Validation of viewer-originated input events.
//!
//! Every viewer event is checked against a closed set of shapes before it is
//! forwarded to the agent. A failing payload is dropped without a reply so a
//! hostile viewer learns nothing and the agent's injection layer never sees
//! malformed input. Unknown event names fail the same way.

use serde_json::Value;

const COORD_MIN: f64 = -10.0;
const COORD_MAX: f64 = 100_000.0;
const MAX_KEY_LEN: usize = 20;
const MAX_TEXT_LEN: usize = 500;

/// Returns `true` when `event` is a known viewer event and `data` passes its
/// shape checks.
pub fn viewer_event_allowed(event: &str, data: &Value) -> bool {
    match event {
        "mouse-move" | "mouse-click" | "mouse-double-click" | "mouse-right-click"
        | "mouse-down" | "mouse-up" => valid_mouse(data),
        "mouse-scroll" => valid_scroll(data),
        "key-press" => valid_key(data),
        "key-type" => valid_text(data),
        "update-quality" => int_in_range(data.get("quality"), 10, 100),
        "update-fps" => int_in_range(data.get("fps"), 1, 60),
        "switch-screen" => valid_display_id(data),
        "clipboard-write" => data.get("text").map(Value::is_string).unwrap_or(false),
        "list-screens" | "clipboard-read" => true,
        _ => false,
    }
}

fn finite(value: Option<&Value>) -> Option<f64> {
    value?.as_f64().filter(|n| n.is_finite())
}

fn coord(value: Option<&Value>) -> bool {
    finite(value)
        .map(|n| (COORD_MIN..=COORD_MAX).contains(&n))
        .unwrap_or(false)
}

fn valid_mouse(data: &Value) -> bool {
    if !coord(data.get("x")) || !coord(data.get("y")) {
        return false;
    }
    match data.get("button") {
        None | Some(Value::Null) => true,
        Some(Value::String(b)) => matches!(b.as_str(), "left" | "right" | "middle"),
        Some(_) => false,
    }
}

fn valid_scroll(data: &Value) -> bool {
    coord(data.get("x"))
        && coord(data.get("y"))
        && finite(data.get("deltaX")).is_some()
        && finite(data.get("deltaY")).is_some()
}

fn valid_key(data: &Value) -> bool {
    let key_ok = data
        .get("key")
        .and_then(Value::as_str)
        .map(|k| !k.is_empty() && k.chars().count() <= MAX_KEY_LEN)
        .unwrap_or(false);
    if !key_ok {
        return false;
    }
    match data.get("modifiers") {
        None | Some(Value::Null) => true,
        Some(Value::Array(mods)) => mods.iter().all(Value::is_string),
        Some(_) => false,
    }
}

fn valid_text(data: &Value) -> bool {
    data.get("text")
        .and_then(Value::as_str)
        .map(|t| t.chars().count() <= MAX_TEXT_LEN)
        .unwrap_or(false)
}

fn int_in_range(value: Option<&Value>, lo: i64, hi: i64) -> bool {
    value
        .and_then(Value::as_i64)
        .map(|n| (lo..=hi).contains(&n))
        .unwrap_or(false)
}

fn valid_display_id(data: &Value) -> bool {
    data.get("displayId").and_then(Value::as_u64).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mouse_move_accepts_plain_coordinates() {
        assert!(viewer_event_allowed(
            "mouse-move",
            &json!({"x": 512.5, "y": 300})
        ));
        assert!(viewer_event_allowed("mouse-move", &json!({"x": -10, "y": 0})));
        assert!(viewer_event_allowed(
            "mouse-move",
            &json!({"x": 100000, "y": 99999.9})
        ));
    }

    #[test]
    fn mouse_move_rejects_non_numeric_coordinates() {
        // The canonical hostile payload: a string where a number belongs.
        assert!(!viewer_event_allowed(
            "mouse-move",
            &json!({"x": "NaN", "y": 10})
        ));
        assert!(!viewer_event_allowed("mouse-move", &json!({"x": null, "y": 10})));
        assert!(!viewer_event_allowed("mouse-move", &json!({"y": 10})));
    }

    #[test]
    fn mouse_move_rejects_out_of_range_coordinates() {
        assert!(!viewer_event_allowed(
            "mouse-move",
            &json!({"x": -10.5, "y": 10})
        ));
        assert!(!viewer_event_allowed(
            "mouse-move",
            &json!({"x": 100001, "y": 10})
        ));
    }

    #[test]
    fn mouse_click_checks_button_names() {
        assert!(viewer_event_allowed(
            "mouse-click",
            &json!({"x": 5, "y": 5, "button": "left"})
        ));
        assert!(viewer_event_allowed("mouse-click", &json!({"x": 5, "y": 5})));
        assert!(!viewer_event_allowed(
            "mouse-click",
            &json!({"x": 5, "y": 5, "button": "fourth"})
        ));
        assert!(!viewer_event_allowed(
            "mouse-click",
            &json!({"x": 5, "y": 5, "button": 3})
        ));
    }

    #[test]
    fn scroll_requires_finite_deltas() {
        assert!(viewer_event_allowed(
            "mouse-scroll",
            &json!({"x": 5, "y": 5, "deltaX": 0, "deltaY": -120})
        ));
        assert!(!viewer_event_allowed(
            "mouse-scroll",
            &json!({"x": 5, "y": 5, "deltaY": -120})
        ));
        assert!(!viewer_event_allowed(
            "mouse-scroll",
            &json!({"x": 5, "y": 5, "deltaX": "1", "deltaY": 2})
        ));
    }

    #[test]
    fn key_press_length_and_modifiers() {
        assert!(viewer_event_allowed("key-press", &json!({"key": "Enter"})));
        assert!(viewer_event_allowed(
            "key-press",
            &json!({"key": "a", "modifiers": ["ctrl", "shift"]})
        ));
        assert!(!viewer_event_allowed(
            "key-press",
            &json!({"key": "x".repeat(21)})
        ));
        assert!(!viewer_event_allowed(
            "key-press",
            &json!({"key": "a", "modifiers": "ctrl"})
        ));
        assert!(!viewer_event_allowed(
            "key-press",
            &json!({"key": "a", "modifiers": [1, 2]})
        ));
    }

    #[test]
    fn key_type_caps_text_length() {
        assert!(viewer_event_allowed(
            "key-type",
            &json!({"text": "x".repeat(500)})
        ));
        assert!(!viewer_event_allowed(
            "key-type",
            &json!({"text": "x".repeat(501)})
        ));
        assert!(!viewer_event_allowed("key-type", &json!({})));
    }

    #[test]
    fn quality_and_fps_are_bounded_integers() {
        assert!(viewer_event_allowed("update-quality", &json!({"quality": 10})));
        assert!(viewer_event_allowed("update-quality", &json!({"quality": 100})));
        assert!(!viewer_event_allowed("update-quality", &json!({"quality": 9})));
        assert!(!viewer_event_allowed("update-quality", &json!({"quality": 101})));
        assert!(!viewer_event_allowed(
            "update-quality",
            &json!({"quality": 50.5})
        ));

        assert!(viewer_event_allowed("update-fps", &json!({"fps": 1})));
        assert!(viewer_event_allowed("update-fps", &json!({"fps": 60})));
        assert!(!viewer_event_allowed("update-fps", &json!({"fps": 0})));
        assert!(!viewer_event_allowed("update-fps", &json!({"fps": 61})));
    }

    #[test]
    fn payloadless_events_pass() {
        assert!(viewer_event_allowed("list-screens", &Value::Null));
        assert!(viewer_event_allowed("clipboard-read", &Value::Null));
    }

    #[test]
    fn switch_screen_wants_a_display_index() {
        assert!(viewer_event_allowed("switch-screen", &json!({"displayId": 1})));
        assert!(!viewer_event_allowed(
            "switch-screen",
            &json!({"displayId": -1})
        ));
        assert!(!viewer_event_allowed("switch-screen", &json!({})));
    }

    #[test]
    fn unknown_events_are_rejected() {
        assert!(!viewer_event_allowed("frame", &json!({})));
        assert!(!viewer_event_allowed("run-shell", &json!({"cmd": "rm -rf /"})));
        assert!(!viewer_event_allowed("", &Value::Null));
    }
}
