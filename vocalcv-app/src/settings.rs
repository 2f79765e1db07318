//! Persistent application settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vocalcv_core::{
    transport::{DEFAULT_MODEL, DEFAULT_VOICE},
    AgentConfig,
};

/// Environment variables checked for the API key, in order.
const API_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];

/// Voices the service offers.
const KNOWN_VOICES: &[&str] = &["Aoede", "Charon", "Fenrir", "Kore", "Puck"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub model: String,
    pub voice_name: String,
    pub api_key: Option<String>,
    /// Resume JSON to answer from. `None` uses `resume.json` next to the settings file.
    pub resume_path: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub outbound_queue_frames: usize,
    /// Canvas width handed to the visualizer. The terminal line prints one
    /// character per bar that fits.
    pub visualizer_width: u16,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            model: DEFAULT_MODEL.into(),
            voice_name: DEFAULT_VOICE.into(),
            api_key: None,
            resume_path: None,
            connect_timeout_secs: 15,
            outbound_queue_frames: 32,
            visualizer_width: 128,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.model = normalize_model(&self.model);
        self.voice_name = normalize_voice(&self.voice_name);
        self.connect_timeout_secs = self.connect_timeout_secs.clamp(1, 120);
        self.outbound_queue_frames = self.outbound_queue_frames.clamp(1, 1024);
        self.visualizer_width = self.visualizer_width.clamp(16, 1024);
        self.api_key = self
            .api_key
            .as_ref()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            outbound_queue_frames: self.outbound_queue_frames,
            preferred_input_device: self.preferred_input_device.clone(),
            model: self.model.clone(),
            voice_name: self.voice_name.clone(),
            ..AgentConfig::default()
        }
    }

    /// Environment first, then the settings file.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_api_key_with(self, |name| std::env::var(name).ok())
    }

    pub fn resume_path(&self, settings_path: &Path) -> PathBuf {
        self.resume_path.clone().unwrap_or_else(|| {
            settings_path
                .parent()
                .map(|dir| dir.join("resume.json"))
                .unwrap_or_else(|| PathBuf::from("resume.json"))
        })
    }
}

fn resolve_api_key_with(
    settings: &AppSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .map(|k| k.trim().to_string())
        .find(|k| !k.is_empty())
        .or_else(|| settings.api_key.clone())
}

pub fn normalize_model(raw: &str) -> String {
    let model = raw.trim();
    if model.is_empty() {
        DEFAULT_MODEL.into()
    } else if model.starts_with("models/") {
        model.into()
    } else {
        format!("models/{model}")
    }
}

pub fn normalize_voice(raw: &str) -> String {
    let voice = raw.trim();
    KNOWN_VOICES
        .iter()
        .find(|v| v.eq_ignore_ascii_case(voice))
        .map(|v| (*v).to_string())
        .unwrap_or_else(|| DEFAULT_VOICE.into())
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vocalcv")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("vocalcv")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| match serde_json::from_str::<AppSettings>(&raw) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!("ignoring unreadable settings at {}: {e}", path.display());
                None
            }
        })
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("absent.json"));
        assert_eq!(settings, AppSettings::default());
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = AppSettings {
            voice_name: "Puck".into(),
            preferred_input_device: Some("USB Headset".into()),
            connect_timeout_secs: 30,
            ..AppSettings::default()
        };
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path), settings);
    }

    #[test]
    fn partial_file_fills_defaults_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"voiceName": "kore", "model": "gemini-2.0-flash-exp", "connectTimeoutSecs": 0, "apiKey": "  "}"#,
        )
        .unwrap();
        let settings = load_settings(&path);
        assert_eq!(settings.voice_name, "Kore");
        assert_eq!(settings.model, "models/gemini-2.0-flash-exp");
        assert_eq!(settings.connect_timeout_secs, 1);
        assert_eq!(settings.api_key, None);
        assert_eq!(settings.outbound_queue_frames, 32);
    }

    #[test]
    fn unknown_voice_falls_back() {
        assert_eq!(normalize_voice("Robot"), "Charon");
    }

    #[test]
    fn environment_key_wins_over_file() {
        let settings = AppSettings {
            api_key: Some("from-file".into()),
            ..AppSettings::default()
        };
        let env = |name: &str| (name == "API_KEY").then(|| "from-env".to_string());
        assert_eq!(
            resolve_api_key_with(&settings, env).as_deref(),
            Some("from-env")
        );
        assert_eq!(
            resolve_api_key_with(&settings, |_| None).as_deref(),
            Some("from-file")
        );
    }

    #[test]
    fn agent_config_carries_settings() {
        let settings = AppSettings {
            connect_timeout_secs: 5,
            voice_name: "Fenrir".into(),
            ..AppSettings::default()
        };
        let config = settings.agent_config();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.voice_name, "Fenrir");
        assert_eq!(config.input_sample_rate, 16_000);
    }

    #[test]
    fn resume_defaults_next_to_settings() {
        let settings = AppSettings::default();
        assert_eq!(
            settings.resume_path(Path::new("/data/vocalcv/settings.json")),
            PathBuf::from("/data/vocalcv/resume.json")
        );
    }
}
