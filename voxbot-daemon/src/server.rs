//! Unix socket command server. One command per connection, read in a single
//! read, one thread per connection; the reply is written before any follow-up
//! turn runs.

use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use voxbot_core::ipc::commands::MAX_COMMAND_LEN;
use voxbot_core::{Assistant, Command};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Any local user (the button service, the display) may send commands.
const SOCKET_MODE: u32 = 0o666;

pub struct CommandServer {
    listener: UnixListener,
    path: PathBuf,
}

impl CommandServer {
    /// Bind `path`, replacing a stale socket from an earlier run.
    pub fn bind(path: &Path) -> Result<Self> {
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
        }
        let listener = UnixListener::bind(path)
            .with_context(|| format!("failed to bind command socket {}", path.display()))?;
        fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_MODE))
            .context("failed to set command socket permissions")?;
        listener
            .set_nonblocking(true)
            .context("failed to make command socket non-blocking")?;

        info!(path = %path.display(), "command socket listening");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Accept connections until `running` clears.
    pub fn serve(&self, assistant: Arc<Assistant>, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    let assistant = Arc::clone(&assistant);
                    let spawned = thread::Builder::new()
                        .name("voxbot-conn".into())
                        .spawn(move || {
                            if let Err(e) = handle_connection(stream, &assistant) {
                                debug!(error = %e, "command connection failed");
                            }
                        });
                    if let Err(e) = spawned {
                        warn!(error = %e, "failed to spawn connection thread");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        debug!("command server stopped");
    }
}

impl Drop for CommandServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn handle_connection(mut stream: UnixStream, assistant: &Assistant) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let raw = read_command(&mut stream)?;
    let command = Command::parse(&raw);
    let outcome = assistant.handle_command(&command, Instant::now());

    let written = stream
        .write_all(outcome.reply.as_bytes())
        .and_then(|()| stream.flush());
    drop(stream);

    // The state already moved on; the turn must run even if the client left.
    if let Some(job) = outcome.follow_up {
        assistant.run_job(job);
    }
    written
}

/// One command per connection. Clients send it without a terminator and
/// then wait for the reply, so the first non-empty read is the whole command.
fn read_command(stream: &mut impl Read) -> io::Result<String> {
    let mut buf = [0u8; MAX_COMMAND_LEN];
    let n = loop {
        match stream.read(&mut buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            read => break read?,
        }
    };
    Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
}
