//! Status events for the robot display.
//!
//! Published on a `tokio::sync::broadcast` channel by the state machine and
//! the watchdog. The daemon serialises each one as a `CHAT_STATUS:{json}`
//! line on the display log, which the front panel tails.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::state::InteractionState;

/// Broadcast channel capacity; slow display consumers lag rather than block.
pub const STATUS_CHANNEL_CAP: usize = 64;

/// Discriminator the display expects in every record.
pub const CHAT_STATUS_KIND: &str = "chat_status";

/// One display update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub state: InteractionState,
    /// Caption shown under the state (transcript, answer, progress text).
    #[serde(default)]
    pub text: String,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

impl StatusEvent {
    pub fn new(state: InteractionState, text: impl Into<String>) -> Self {
        Self {
            kind: CHAT_STATUS_KIND.to_owned(),
            state,
            text: text.into(),
            timestamp: unix_now(),
        }
    }

    /// Line format used on the display log.
    pub fn to_display_line(&self) -> serde_json::Result<String> {
        Ok(format!("CHAT_STATUS:{}", serde_json::to_string(self)?))
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_uses_display_field_names() {
        let event = StatusEvent::new(InteractionState::WakeListening, "");
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["type"], "chat_status");
        assert_eq!(json["state"], "wake_listening");
        assert_eq!(json["text"], "");
        assert!(json["timestamp"].as_f64().is_some_and(|t| t > 0.0));
    }

    #[test]
    fn display_line_is_prefixed_json() {
        let event = StatusEvent::new(InteractionState::Speaking, "Hello there");
        let line = event.to_display_line().expect("line");
        let body = line.strip_prefix("CHAT_STATUS:").expect("prefix");
        let parsed: StatusEvent = serde_json::from_str(body).expect("parse back");
        assert_eq!(parsed.state, InteractionState::Speaking);
        assert_eq!(parsed.text, "Hello there");
    }

    #[test]
    fn unknown_state_is_rejected() {
        let raw = r#"{"type":"chat_status","state":"dancing","text":"","timestamp":1.0}"#;
        assert!(serde_json::from_str::<StatusEvent>(raw).is_err());
    }
}
