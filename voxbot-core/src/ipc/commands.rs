//! Text protocol of the command socket.
//!
//! One ASCII command per connection, terminated by newline or EOF. Every
//! command gets a reply: `OK`, or a JSON document for `STATUS`.

use serde::{Deserialize, Serialize};

use crate::arbiter::RecordingSource;
use crate::state::InteractionState;

/// Acknowledgement for everything except STATUS.
pub const ACK: &str = "OK";

/// Longest command line accepted; anything after is ignored.
pub const MAX_COMMAND_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartRecording,
    StopRecording,
    CameraCapture,
    Status,
    Reset,
    /// Acknowledged and ignored.
    Unknown(String),
}

impl Command {
    pub fn parse(raw: &str) -> Self {
        let line = raw.lines().next().unwrap_or("").trim();
        match line {
            "START_RECORDING" => Self::StartRecording,
            "STOP_RECORDING" => Self::StopRecording,
            "CAMERA_CAPTURE" => Self::CameraCapture,
            "STATUS" => Self::Status,
            "RESET" => Self::Reset,
            other => Self::Unknown(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::StartRecording => "START_RECORDING",
            Self::StopRecording => "STOP_RECORDING",
            Self::CameraCapture => "CAMERA_CAPTURE",
            Self::Status => "STATUS",
            Self::Reset => "RESET",
            Self::Unknown(raw) => raw,
        }
    }
}

/// Body of the STATUS reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub state: InteractionState,
    pub conversation_length: usize,
    pub wake_word_enabled: bool,
    pub recording_source: Option<RecordingSource>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands_with_line_endings() {
        assert_eq!(Command::parse("START_RECORDING\n"), Command::StartRecording);
        assert_eq!(Command::parse("  STOP_RECORDING\r\n"), Command::StopRecording);
        assert_eq!(Command::parse("STATUS"), Command::Status);
        assert_eq!(Command::parse("RESET\nRESET\n"), Command::Reset);
    }

    #[test]
    fn anything_else_is_unknown() {
        assert_eq!(Command::parse("start_recording"), Command::Unknown("start_recording".into()));
        assert_eq!(Command::parse(""), Command::Unknown(String::new()));
    }

    #[test]
    fn status_reply_shape() {
        let reply = StatusReply {
            state: InteractionState::Listening,
            conversation_length: 4,
            wake_word_enabled: true,
            recording_source: Some(RecordingSource::ButtonTriggered),
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["state"], "listening");
        assert_eq!(json["conversation_length"], 4);
        assert_eq!(json["wake_word_enabled"], true);
        assert_eq!(json["recording_source"], "button_triggered");
    }
}
