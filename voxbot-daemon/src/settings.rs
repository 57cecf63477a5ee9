//! Persistent daemon settings (JSON file, `/etc/voxbot/settings.json` by default).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_SETTINGS_PATH: &str = "/etc/voxbot/settings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Settings {
    pub wake_word_enabled: bool,
    pub wake_word_threshold: f32,
    pub wake_keyword: String,
    pub vad_enabled: bool,
    pub vad_aggressiveness: u8,
    pub silence_threshold_seconds: f32,
    pub max_recording_seconds: f32,
    pub min_recording_seconds: f32,
    pub history_timeout_seconds: u64,
    pub max_history_messages: usize,
    pub tts_cooldown_seconds: f32,
    pub stuck_threshold_seconds: u64,
    pub watchdog_interval_seconds: u64,
    pub native_sample_rate: u32,
    pub target_sample_rate: u32,
    pub input_device: Option<String>,
    pub socket_path: PathBuf,
    pub display_log_path: PathBuf,
    pub recordings_dir: PathBuf,
    pub camera_dir: PathBuf,
    pub camera_enabled: bool,
    pub system_prompt: String,
    pub primary_llm_url: Option<String>,
    pub primary_model: String,
    pub local_llm_url: String,
    pub local_model: String,
    pub vision_model: String,
    pub llm_timeout_seconds: u64,
    pub motor_socket_path: PathBuf,
    pub asr_command: String,
    pub speak_command: String,
    pub asr_model_path: PathBuf,
    /// Played on wake-word detection; `None` only logs.
    pub cue_command: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wake_word_enabled: true,
            wake_word_threshold: 0.5,
            wake_keyword: "hey_robot".into(),
            vad_enabled: true,
            vad_aggressiveness: 2,
            silence_threshold_seconds: 1.5,
            max_recording_seconds: 10.0,
            min_recording_seconds: 0.5,
            history_timeout_seconds: 300,
            max_history_messages: 10,
            tts_cooldown_seconds: 2.0,
            stuck_threshold_seconds: 60,
            watchdog_interval_seconds: 5,
            native_sample_rate: 48_000,
            target_sample_rate: 16_000,
            input_device: None,
            socket_path: "/tmp/ai-chatbot.sock".into(),
            display_log_path: "/var/log/robot-ai.log".into(),
            recordings_dir: "/tmp/ai-recordings".into(),
            camera_dir: "/tmp/ai-camera".into(),
            camera_enabled: true,
            system_prompt: "You are a helpful robot assistant. Answer questions in 2-3 sentences \
                            maximum. Be concise, direct, and friendly."
                .into(),
            primary_llm_url: None,
            primary_model: "qwen2.5:3b".into(),
            local_llm_url: "http://127.0.0.1:11434".into(),
            local_model: "qwen2.5:1.5b".into(),
            vision_model: "qwen2-vl:2b".into(),
            llm_timeout_seconds: 60,
            motor_socket_path: "/tmp/shatrox-motor-control.sock".into(),
            asr_command: "whisper-transcribe".into(),
            speak_command: "speak".into(),
            asr_model_path: "/usr/share/whisper/ggml-base.bin".into(),
            cue_command: None,
        }
    }
}

impl Settings {
    pub fn normalize(&mut self) {
        let defaults = Settings::default();

        self.wake_word_threshold = clamp_finite(
            self.wake_word_threshold,
            0.0,
            1.0,
            defaults.wake_word_threshold,
        );
        self.wake_keyword = non_empty(&self.wake_keyword, &defaults.wake_keyword);
        self.vad_aggressiveness = self.vad_aggressiveness.min(3);
        self.silence_threshold_seconds = clamp_finite(
            self.silence_threshold_seconds,
            0.2,
            10.0,
            defaults.silence_threshold_seconds,
        );
        self.max_recording_seconds = clamp_finite(
            self.max_recording_seconds,
            1.0,
            120.0,
            defaults.max_recording_seconds,
        );
        self.min_recording_seconds = clamp_finite(
            self.min_recording_seconds,
            0.0,
            self.max_recording_seconds,
            defaults.min_recording_seconds,
        );
        self.history_timeout_seconds = self.history_timeout_seconds.clamp(10, 86_400);
        self.max_history_messages = self.max_history_messages.clamp(2, 100);
        self.tts_cooldown_seconds = clamp_finite(
            self.tts_cooldown_seconds,
            0.0,
            30.0,
            defaults.tts_cooldown_seconds,
        );

        // The watchdog must never fire on a legitimate recording.
        let min_stuck = self.max_recording_seconds.ceil() as u64 + 5;
        self.stuck_threshold_seconds = self.stuck_threshold_seconds.clamp(min_stuck, 3_600);
        self.watchdog_interval_seconds = self.watchdog_interval_seconds.clamp(1, 60);

        if self.native_sample_rate == 0 {
            self.native_sample_rate = defaults.native_sample_rate;
        }
        if self.target_sample_rate == 0 {
            self.target_sample_rate = defaults.target_sample_rate;
        }

        self.input_device = trimmed(self.input_device.as_deref());
        self.primary_llm_url = trimmed(self.primary_llm_url.as_deref());
        self.cue_command = trimmed(self.cue_command.as_deref());
        self.system_prompt = non_empty(&self.system_prompt, &defaults.system_prompt);
        self.primary_model = non_empty(&self.primary_model, &defaults.primary_model);
        self.local_llm_url = non_empty(&self.local_llm_url, &defaults.local_llm_url);
        self.local_model = non_empty(&self.local_model, &defaults.local_model);
        self.vision_model = non_empty(&self.vision_model, &defaults.vision_model);
        self.asr_command = non_empty(&self.asr_command, &defaults.asr_command);
        self.speak_command = non_empty(&self.speak_command, &defaults.speak_command);
        self.llm_timeout_seconds = self.llm_timeout_seconds.clamp(5, 600);
    }

    pub fn silence_threshold(&self) -> Duration {
        Duration::from_secs_f32(self.silence_threshold_seconds)
    }

    pub fn max_recording(&self) -> Duration {
        Duration::from_secs_f32(self.max_recording_seconds)
    }

    pub fn min_recording(&self) -> Duration {
        Duration::from_secs_f32(self.min_recording_seconds)
    }

    pub fn tts_cooldown(&self) -> Duration {
        Duration::from_secs_f32(self.tts_cooldown_seconds)
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_secs(self.history_timeout_seconds)
    }

    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_threshold_seconds)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_seconds)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds)
    }
}

fn clamp_finite(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

fn trimmed(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

fn non_empty(raw: &str, fallback: &str) -> String {
    let value = raw.trim();
    if value.is_empty() {
        fallback.to_owned()
    } else {
        value.to_owned()
    }
}

/// Missing or unreadable files give defaults; a corrupt file is logged.
pub fn load_settings(path: &Path) -> Settings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<Settings>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "settings file corrupt, using defaults");
            Settings::default()
        }),
        Err(_) => Settings::default(),
    };
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &Settings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
