//! Audio device enumeration for the settings picker.

use serde::{Deserialize, Serialize};

/// Which side of the audio graph a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about one audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub direction: DeviceDirection,
    /// Whether this is the system default for its direction.
    pub is_default: bool,
    /// Input devices that most likely capture system output rather than a voice.
    pub is_loopback_like: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
    "virtual output",
];

const MIC_KEYWORDS: &[&str] = &["microphone", "mic", "headset", "array", "webcam", "usb"];

pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Higher is a better guess for a speaking microphone.
pub fn mic_preference_score(info: &DeviceInfo) -> i32 {
    let lowered = info.name.trim().to_ascii_lowercase();
    let mut score = if info.is_loopback_like { -16 } else { 8 };
    if MIC_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    if info.is_default {
        score += 2;
    }
    score
}

/// Order input devices best-first: likely microphones, then defaults, then name.
pub fn rank_input_devices(devices: &mut [DeviceInfo]) {
    devices.sort_by(|a, b| {
        mic_preference_score(b)
            .cmp(&mic_preference_score(a))
            .then_with(|| a.name.to_ascii_lowercase().cmp(&b.name.to_ascii_lowercase()))
    });
}

/// List input and output devices on the default host.
///
/// Returns an empty `Vec` if cpal is not available or enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_in = host.default_input_device().and_then(|d| d.name().ok());
    let default_out = host.default_output_device().and_then(|d| d.name().ok());

    let mut inputs = match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                DeviceInfo {
                    is_default: default_in.as_deref() == Some(name.as_str()),
                    is_loopback_like: is_loopback_like_name(&name),
                    direction: DeviceDirection::Input,
                    name,
                }
            })
            .collect::<Vec<_>>(),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            Vec::new()
        }
    };
    rank_input_devices(&mut inputs);

    let outputs = match host.output_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                DeviceInfo {
                    is_default: default_out.as_deref() == Some(name.as_str()),
                    is_loopback_like: false,
                    direction: DeviceDirection::Output,
                    name,
                }
            })
            .collect::<Vec<_>>(),
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            Vec::new()
        }
    };

    inputs.into_iter().chain(outputs).collect()
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, is_default: bool) -> DeviceInfo {
        DeviceInfo {
            name: name.into(),
            direction: DeviceDirection::Input,
            is_default,
            is_loopback_like: is_loopback_like_name(name),
        }
    }

    #[test]
    fn detects_common_loopback_names() {
        assert!(is_loopback_like_name("Stereo Mix (Realtek Audio)"));
        assert!(is_loopback_like_name("Monitor of Built-in Audio"));
        assert!(!is_loopback_like_name("Built-in Microphone"));
    }

    #[test]
    fn microphones_rank_above_loopback_even_when_default() {
        let mut devices = vec![
            input("Stereo Mix (Realtek Audio)", true),
            input("Line In", false),
            input("USB Headset Microphone", false),
        ];
        rank_input_devices(&mut devices);
        assert_eq!(devices[0].name, "USB Headset Microphone");
        assert_eq!(devices[2].name, "Stereo Mix (Realtek Audio)");
    }
}
