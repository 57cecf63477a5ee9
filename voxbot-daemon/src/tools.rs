//! Tool execution against the robot: mixer, clock, power and the motor
//! controller socket.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use chrono::Local;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use voxbot_core::dispatch::tools::{Tool, ToolExecutor};

use crate::collaborators::run_with_timeout;

const MIXER_TIMEOUT: Duration = Duration::from_secs(2);
const MOTOR_TIMEOUT: Duration = Duration::from_secs(5);
const MOTOR_REPLY_MAX: usize = 1024;

/// Ultrasonic sensor range; readings at or above it mean nothing in sight.
const MAX_SENSOR_CM: f64 = 400.0;
const CLOSE_OBSTACLE_CM: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MotorReply {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub distance_cm: Option<f64>,
}

impl MotorReply {
    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            message: Some(message.into()),
            distance_cm: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    fn is_blocked(&self) -> bool {
        self.status == "blocked"
    }

    fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("unknown")
    }
}

/// JSON request/response client for the motor controller's Unix socket.
pub struct MotorClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl MotorClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: MOTOR_TIMEOUT,
        }
    }

    /// One request. Transport failures come back as an `error` reply.
    pub fn send(&self, request: &Value) -> MotorReply {
        if !self.socket_path.exists() {
            return MotorReply::error("Motor controller not running");
        }
        match self.exchange(request) {
            Ok(reply) => reply,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                MotorReply::error("Motor controller timeout")
            }
            Err(e) => MotorReply::error(e.to_string()),
        }
    }

    fn exchange(&self, request: &Value) -> std::io::Result<MotorReply> {
        let mut stream = UnixStream::connect(&self.socket_path)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.write_all(request.to_string().as_bytes())?;

        let mut buf = [0u8; MOTOR_REPLY_MAX];
        let n = stream.read(&mut buf)?;
        serde_json::from_slice(&buf[..n])
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// The robot's [`ToolExecutor`].
pub struct SystemTools {
    motor: MotorClient,
    speak_command: String,
    mixer_control: String,
}

impl SystemTools {
    pub fn new(motor: MotorClient, speak_command: impl Into<String>) -> Self {
        Self {
            motor,
            speak_command: speak_command.into(),
            mixer_control: "Speaker".into(),
        }
    }

    fn set_volume(&self, percent: u8) -> String {
        let result = run_with_timeout(
            Command::new("amixer").args(["set", &self.mixer_control, &format!("{percent}%")]),
            MIXER_TIMEOUT,
        );
        match result {
            Ok(out) if out.status.success() => format!("Volume set to {percent}%"),
            Ok(out) => format!(
                "Failed to set volume: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ),
            Err(e) => format!("Error setting volume: {e}"),
        }
    }

    fn shutdown(&self) -> String {
        warn!("shutdown requested by voice command");
        if let Err(e) = run_with_timeout(
            Command::new(&self.speak_command).arg("System is shutting down in 3 2 1"),
            Duration::from_secs(10),
        ) {
            warn!(error = %e, "shutdown warning could not be spoken");
        }
        match Command::new("shutdown").args(["-h", "now"]).spawn() {
            Ok(_) => "Shutting down system".into(),
            Err(e) => format!("Error shutting down: {e}"),
        }
    }
}

impl ToolExecutor for SystemTools {
    fn execute(&self, tool: &Tool) -> String {
        info!(tool = tool.name(), "running tool");
        match *tool {
            Tool::SetVolume(args) => self.set_volume(args.percent),
            Tool::TakePicture => "camera_capture_triggered".into(),
            Tool::CurrentTime => current_time_sentence(),
            Tool::CurrentDate => current_date_sentence(),
            Tool::Shutdown => self.shutdown(),
            _ => {
                let Some(request) = motor_request(tool) else {
                    return format!("{} is not available", tool.name());
                };
                motor_sentence(tool, &self.motor.send(&request))
            }
        }
    }
}

pub fn current_time_sentence() -> String {
    format!("The current time is {}", Local::now().format("%I:%M %p"))
}

pub fn current_date_sentence() -> String {
    format!("Today is {}", Local::now().format("%A, %B %d, %Y"))
}

/// Wire request for a motor-controller tool.
pub fn motor_request(tool: &Tool) -> Option<Value> {
    let request = match *tool {
        Tool::MotorForward(a) => json!({
            "action": "move_forward",
            "speed": a.speed,
            "duration": a.duration_secs,
        }),
        Tool::MotorBackward(a) => json!({
            "action": "move_backward",
            "speed": a.speed,
            "duration": a.duration_secs,
        }),
        Tool::MotorLeft(a) => {
            json!({ "action": "turn_left", "speed": a.speed, "angle": a.angle_deg })
        }
        Tool::MotorRight(a) => {
            json!({ "action": "turn_right", "speed": a.speed, "angle": a.angle_deg })
        }
        Tool::MotorStop => json!({ "action": "stop" }),
        Tool::MotorExplore => json!({ "action": "explore_start" }),
        Tool::Distance => json!({ "action": "get_distance" }),
        _ => return None,
    };
    Some(request)
}

/// Spoken result of a motor-controller reply.
pub fn motor_sentence(tool: &Tool, reply: &MotorReply) -> String {
    match *tool {
        Tool::MotorForward(a) if reply.is_ok() => {
            if a.duration_secs > 0.0 {
                format!("Moving forward at {}% speed for {} seconds", a.speed, a.duration_secs)
            } else {
                format!("Moving forward at {}% speed", a.speed)
            }
        }
        Tool::MotorForward(_) if reply.is_blocked() => {
            "Cannot move forward - obstacle detected".into()
        }
        Tool::MotorBackward(a) if reply.is_ok() => {
            if a.duration_secs > 0.0 {
                format!("Moving backward at {}% speed for {} seconds", a.speed, a.duration_secs)
            } else {
                format!("Moving backward at {}% speed", a.speed)
            }
        }
        Tool::MotorLeft(a) if reply.is_ok() => format!("Turning left {} degrees", a.angle_deg),
        Tool::MotorRight(a) if reply.is_ok() => format!("Turning right {} degrees", a.angle_deg),
        Tool::MotorStop if reply.is_ok() => "Motors stopped".into(),
        Tool::MotorExplore if reply.is_ok() => "Exploration mode started! I will move around and avoid \
            obstacles automatically. Say 'stop' when you want me to stop exploring."
            .into(),
        Tool::MotorExplore if reply.is_blocked() => "Cannot start exploring - obstacle in the way. \
            Please clear the path and try again."
            .into(),
        Tool::MotorExplore => format!("Failed to start exploration: {}", reply.message()),
        Tool::Distance if reply.is_ok() => {
            let cm = reply.distance_cm.unwrap_or(0.0);
            if cm >= MAX_SENSOR_CM {
                "No obstacle detected - path is clear".into()
            } else if cm < CLOSE_OBSTACLE_CM {
                format!("Warning! Obstacle very close at {cm:.1} centimeters")
            } else {
                format!("Distance to nearest obstacle is {cm:.1} centimeters")
            }
        }
        Tool::Distance => format!("Sensor error: {}", reply.message()),
        _ => format!("Motor error: {}", reply.message()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use voxbot_core::dispatch::tools::{DriveArgs, TurnArgs};

    fn ok() -> MotorReply {
        MotorReply {
            status: "ok".into(),
            message: None,
            distance_cm: None,
        }
    }

    #[test]
    fn drive_sentences() {
        let forward = Tool::MotorForward(DriveArgs { speed: 60, duration_secs: 2.5 });
        assert_eq!(motor_sentence(&forward, &ok()), "Moving forward at 60% speed for 2.5 seconds");

        let forever = Tool::MotorForward(DriveArgs { speed: 40, duration_secs: 0.0 });
        assert_eq!(motor_sentence(&forever, &ok()), "Moving forward at 40% speed");

        let blocked = MotorReply { status: "blocked".into(), ..ok() };
        assert_eq!(motor_sentence(&forward, &blocked), "Cannot move forward - obstacle detected");

        let left = Tool::MotorLeft(TurnArgs { speed: 50, angle_deg: 45.0 });
        assert_eq!(motor_sentence(&left, &ok()), "Turning left 45 degrees");
        assert_eq!(
            motor_sentence(&left, &MotorReply::error("driver fault")),
            "Motor error: driver fault"
        );
    }

    #[test]
    fn distance_sentences() {
        let reading = |cm| MotorReply { distance_cm: Some(cm), ..ok() };
        assert_eq!(
            motor_sentence(&Tool::Distance, &reading(450.0)),
            "No obstacle detected - path is clear"
        );
        assert_eq!(
            motor_sentence(&Tool::Distance, &reading(12.34)),
            "Warning! Obstacle very close at 12.3 centimeters"
        );
        assert_eq!(
            motor_sentence(&Tool::Distance, &reading(87.0)),
            "Distance to nearest obstacle is 87.0 centimeters"
        );
    }

    #[test]
    fn missing_socket_is_reported() {
        let client = MotorClient::new("/nonexistent/motor.sock");
        let reply = client.send(&json!({ "action": "stop" }));
        assert_eq!(reply, MotorReply::error("Motor controller not running"));
        assert_eq!(
            motor_sentence(&Tool::MotorStop, &reply),
            "Motor error: Motor controller not running"
        );
    }

    #[test]
    fn client_round_trips_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motor.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let n = conn.read(&mut buf).unwrap();
            let request: Value = serde_json::from_slice(&buf[..n]).unwrap();
            conn.write_all(br#"{"status":"ok","distance_cm":150.0}"#).unwrap();
            request
        });

        let client = MotorClient::new(&path);
        let request = motor_request(&Tool::Distance).unwrap();
        let reply = client.send(&request);
        assert_eq!(reply.distance_cm, Some(150.0));
        assert_eq!(server.join().unwrap()["action"], "get_distance");
    }

    #[test]
    fn non_motor_tools_have_no_request() {
        assert!(motor_request(&Tool::CurrentTime).is_none());
        assert!(current_time_sentence().starts_with("The current time is "));
        assert!(current_date_sentence().starts_with("Today is "));
    }
}
