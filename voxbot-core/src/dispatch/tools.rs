//! The closed set of tools the language model may call.
//!
//! Tool calls arrive as a name plus loosely typed JSON arguments. They are
//! turned into a [`Tool`] with typed, clamped arguments before anything
//! runs; an unknown name is a [`GenerationError::UnknownTool`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::classify::CommandCategory;
use crate::error::GenerationError;

/// A tool invocation as requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeArgs {
    /// 0 (mute) ..= 100.
    pub percent: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveArgs {
    /// 0 ..= 100.
    pub speed: u8,
    /// Seconds; 0 means keep moving.
    pub duration_secs: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnArgs {
    /// 0 ..= 100.
    pub speed: u8,
    /// 0 ..= 360 degrees.
    pub angle_deg: f32,
}

const DEFAULT_SPEED: f64 = 50.0;
const DEFAULT_DURATION: f64 = 2.0;
const DEFAULT_ANGLE: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tool {
    SetVolume(VolumeArgs),
    TakePicture,
    CurrentTime,
    CurrentDate,
    Shutdown,
    MotorForward(DriveArgs),
    MotorBackward(DriveArgs),
    MotorLeft(TurnArgs),
    MotorRight(TurnArgs),
    MotorStop,
    MotorExplore,
    Distance,
}

impl Tool {
    /// Name advertised to the model.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetVolume(_) => "set_volume",
            Self::TakePicture => "take_picture",
            Self::CurrentTime => "get_current_time",
            Self::CurrentDate => "get_current_date",
            Self::Shutdown => "shutdown_system",
            Self::MotorForward(_) => "motor_forward",
            Self::MotorBackward(_) => "motor_backward",
            Self::MotorLeft(_) => "motor_left",
            Self::MotorRight(_) => "motor_right",
            Self::MotorStop => "motor_stop",
            Self::MotorExplore => "motor_explore",
            Self::Distance => "get_distance",
        }
    }

    /// Hands the turn to the camera flow instead of producing text.
    pub fn is_camera(&self) -> bool {
        matches!(self, Self::TakePicture)
    }

    /// Tools run straight from the fast path, without asking the model.
    pub fn immediate(category: CommandCategory) -> Option<Self> {
        match category {
            CommandCategory::MotorStop => Some(Self::MotorStop),
            CommandCategory::MotorExplore => Some(Self::MotorExplore),
            _ => None,
        }
    }

    /// Validate a model tool call. Unknown keys in `arguments` are ignored.
    pub fn from_call(call: &ToolCall) -> Result<Self, GenerationError> {
        let args = &call.arguments;
        let tool = match call.name.as_str() {
            "set_volume" => {
                let percent = number_arg(args, "percent")?.ok_or_else(|| {
                    GenerationError::Malformed("set_volume requires `percent`".into())
                })?;
                Self::SetVolume(VolumeArgs {
                    percent: clamp_percent(percent),
                })
            }
            "take_picture" => Self::TakePicture,
            "get_current_time" => Self::CurrentTime,
            "get_current_date" => Self::CurrentDate,
            "shutdown_system" => Self::Shutdown,
            "motor_forward" => Self::MotorForward(drive_args(args)?),
            "motor_backward" => Self::MotorBackward(drive_args(args)?),
            "motor_left" => Self::MotorLeft(turn_args(args)?),
            "motor_right" => Self::MotorRight(turn_args(args)?),
            "motor_stop" => Self::MotorStop,
            "motor_explore" => Self::MotorExplore,
            "get_distance" => Self::Distance,
            other => return Err(GenerationError::UnknownTool(other.to_owned())),
        };
        Ok(tool)
    }
}

/// Runs tools against the robot. Failures are reported in the returned
/// sentence, since the result is spoken either way.
pub trait ToolExecutor: Send + Sync {
    fn execute(&self, tool: &Tool) -> String;
}

fn clamp_percent(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

/// Read a numeric argument. Models sometimes quote numbers, so strings that
/// parse are accepted.
fn number_arg(args: &Value, key: &str) -> Result<Option<f64>, GenerationError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse().map(Some).map_err(|_| {
            GenerationError::Malformed(format!("argument `{key}` is not a number: {s:?}"))
        }),
        Some(other) => Err(GenerationError::Malformed(format!(
            "argument `{key}` is not a number: {other}"
        ))),
    }
}

fn drive_args(args: &Value) -> Result<DriveArgs, GenerationError> {
    Ok(DriveArgs {
        speed: clamp_percent(number_arg(args, "speed")?.unwrap_or(DEFAULT_SPEED)),
        duration_secs: number_arg(args, "duration")?
            .unwrap_or(DEFAULT_DURATION)
            .max(0.0) as f32,
    })
}

fn turn_args(args: &Value) -> Result<TurnArgs, GenerationError> {
    Ok(TurnArgs {
        speed: clamp_percent(number_arg(args, "speed")?.unwrap_or(DEFAULT_SPEED)),
        angle_deg: number_arg(args, "angle")?
            .unwrap_or(DEFAULT_ANGLE)
            .clamp(0.0, 360.0) as f32,
    })
}

fn function(name: &str, description: &str, properties: Value, required: &[&str]) -> Value {
    let mut parameters = json!({ "type": "object", "properties": properties });
    if !required.is_empty() {
        parameters["required"] = json!(required);
    }
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

/// JSON schema of every tool, in the function-calling format Ollama accepts.
pub fn tool_definitions() -> Value {
    let speed = json!({
        "type": "integer",
        "description": "Speed percentage from 0 to 100 (default: 50)",
    });
    let angle = json!({ "type": "number", "description": "Degrees to turn (default: 90)" });

    json!([
        function(
            "set_volume",
            "Set the speaker volume to a specific percentage between 0 and 100",
            json!({ "percent": {
                "type": "integer",
                "description": "Volume level from 0 (mute) to 100 (maximum)",
            }}),
            &["percent"],
        ),
        function(
            "take_picture",
            "Take a picture with the camera and describe what you see in the image",
            json!({}),
            &[],
        ),
        function("get_current_time", "Get the current time", json!({}), &[]),
        function(
            "get_current_date",
            "Get the current date (day, month, year)",
            json!({}),
            &[],
        ),
        function(
            "shutdown_system",
            "Safely shutdown the robot system. ONLY use this when explicitly asked to shutdown or turn off.",
            json!({}),
            &[],
        ),
        function(
            "motor_forward",
            "Move the robot forward. Use this when asked to go forward, move ahead, or drive forward.",
            json!({
                "speed": speed,
                "duration": {
                    "type": "number",
                    "description": "How many seconds to move (default: 2). Use 0 for continuous movement.",
                },
            }),
            &[],
        ),
        function(
            "motor_backward",
            "Move the robot backward. Use this when asked to go back, reverse, or move backward.",
            json!({
                "speed": speed,
                "duration": { "type": "number", "description": "How many seconds to move (default: 2)" },
            }),
            &[],
        ),
        function(
            "motor_left",
            "Turn the robot left. Use this when asked to turn left, go left, or rotate left.",
            json!({ "speed": speed, "angle": angle }),
            &[],
        ),
        function(
            "motor_right",
            "Turn the robot right. Use this when asked to turn right, go right, or rotate right.",
            json!({ "speed": speed, "angle": angle }),
            &[],
        ),
        function(
            "motor_stop",
            "Stop all motor movement immediately. Use this when asked to stop, halt, or freeze.",
            json!({}),
            &[],
        ),
        function(
            "motor_explore",
            "Start autonomous exploration mode. The robot will move continuously, automatically avoiding obstacles by backing up and turning. It will keep exploring until told to stop.",
            json!({}),
            &[],
        ),
        function(
            "get_distance",
            "Get the distance reading from the ultrasonic sensor. Use this when asked about distance to obstacles or how far something is.",
            json!({}),
            &[],
        ),
    ])
}
