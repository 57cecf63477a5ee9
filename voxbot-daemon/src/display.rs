//! Status forwarding to the front-panel display log.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use voxbot_core::StatusEvent;

/// Appends every status event to the display log as a `CHAT_STATUS:` line.
pub struct DisplayForwarder {
    path: PathBuf,
}

impl DisplayForwarder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one event. The file is reopened per event to follow rotation.
    pub fn write_event(&self, event: &StatusEvent) -> io::Result<()> {
        let line = event.to_display_line().map_err(io::Error::other)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")
    }

    /// Forward until every sender is gone. Blocking; run on its own thread.
    pub fn run(&self, mut rx: broadcast::Receiver<StatusEvent>) {
        debug!(path = %self.path.display(), "display forwarder started");
        loop {
            match rx.blocking_recv() {
                Ok(event) => {
                    if let Err(e) = self.write_event(&event) {
                        warn!(path = %self.path.display(), error = %e, "display write failed");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "display forwarder lagged, status events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("display forwarder stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxbot_core::InteractionState;

    #[test]
    fn events_are_appended_as_prefixed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("robot-ai.log");
        let forwarder = DisplayForwarder::new(&path);

        let (tx, rx) = broadcast::channel(8);
        tx.send(StatusEvent::new(InteractionState::Listening, "")).unwrap();
        tx.send(StatusEvent::new(InteractionState::Speaking, "Hello there")).unwrap();
        drop(tx);
        forwarder.run(rx);

        let log = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.starts_with("CHAT_STATUS:{")));
        assert!(lines[0].contains(r#""state":"listening""#));
        assert!(lines[1].contains("Hello there"));
    }

    #[test]
    fn unwritable_path_is_reported() {
        let forwarder = DisplayForwarder::new("/nonexistent-dir/robot-ai.log");
        let event = StatusEvent::new(InteractionState::Idle, "");
        assert!(forwarder.write_event(&event).is_err());
    }
}
