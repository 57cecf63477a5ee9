//! Input device enumeration for the robot's capture hardware.

use serde::{Deserialize, Serialize};

/// Metadata about an audio input device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Device name as reported by ALSA / PulseAudio.
    pub name: String,
    /// Whether this is the host's default input device.
    pub is_default: bool,
    /// Monitor/loopback/null sinks that never carry microphone audio.
    pub is_virtual: bool,
    /// Best guess at the robot's physical microphone.
    pub is_recommended: bool,
}

const VIRTUAL_KEYWORDS: &[&str] = &[
    "monitor of",
    "loopback",
    "null",
    "dmix",
    "dsnoop",
    "pipewire",
    "pulse",
    "jack",
    "oss",
    "speex",
    "upmix",
    "vdownmix",
];

const MIC_KEYWORDS: &[&str] = &[
    "usb",
    "mic",
    "respeaker",
    "seeed",
    "array",
    "capture",
    "plughw",
    "webcam",
    "headset",
];

/// ALSA plugin and sound-server names that are not capture hardware.
pub fn is_virtual_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    VIRTUAL_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Higher is better. Physical USB/array microphones score highest.
pub fn mic_preference_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = if is_virtual_name(&lowered) { -16 } else { 8 };
    score += MIC_KEYWORDS
        .iter()
        .filter(|k| lowered.contains(*k))
        .count() as i32
        * 3;
    if lowered == "default" || lowered.starts_with("sysdefault") {
        score += 1;
    }
    score
}

/// Rank devices in place: recommended first, virtual last.
pub fn rank_devices(list: &mut [DeviceInfo]) {
    for d in list.iter_mut() {
        d.is_recommended = false;
    }
    if let Some(best) = list
        .iter_mut()
        .max_by_key(|d| mic_preference_score(&d.name) + if d.is_default { 2 } else { 0 })
    {
        best.is_recommended = !best.is_virtual;
    }
    list.sort_by_key(|d| {
        (
            !d.is_recommended,
            d.is_virtual,
            !d.is_default,
            d.name.to_ascii_lowercase(),
        )
    });
}

/// List all available audio input devices.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            return Vec::new();
        }
    };

    let mut list = devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
            DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                is_virtual: is_virtual_name(&name),
                is_recommended: false,
                name,
            }
        })
        .collect::<Vec<_>>();
    rank_devices(&mut list);
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}
