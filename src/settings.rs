use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

const API_KEY_VARS: [&str; 2] = ["FOCUSCOACH_API_KEY", "GEMINI_API_KEY"];
const DEBUG_ANALYSIS_INTERVAL_SECS: u64 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CoachSettings {
    pub analysis_interval_secs: u64,
    pub elapsed_tick_secs: u64,
    /// Upper bound on a single capture; a slower capture counts as a miss.
    pub capture_timeout_secs: u64,
    pub history_limit: usize,
    pub feedback_enabled: bool,
    pub feedback_volume: f32,
    pub api_base_url: String,
    pub posture_model: String,
    pub speech_model: String,
    pub summary_model: String,
    pub voice_name: String,
    pub request_timeout_secs: u64,
}

impl Default for CoachSettings {
    fn default() -> Self {
        Self {
            analysis_interval_secs: 8,
            elapsed_tick_secs: 1,
            capture_timeout_secs: 10,
            history_limit: 50,
            feedback_enabled: true,
            feedback_volume: 1.0,
            api_base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            posture_model: "gemini-2.5-flash".into(),
            speech_model: "gemini-2.5-flash-preview-tts".into(),
            summary_model: "gemini-2.5-flash".into(),
            voice_name: "Zephyr".into(),
            request_timeout_secs: 30,
        }
    }
}

impl CoachSettings {
    pub fn analysis_interval(&self) -> Duration {
        Duration::from_secs(self.analysis_interval_secs.max(1))
    }

    pub fn elapsed_tick(&self) -> Duration {
        Duration::from_secs(self.elapsed_tick_secs.max(1))
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Applies `FOCUSCOACH_DEBUG`, which shortens the analysis interval.
    pub fn with_env_overrides(mut self) -> Self {
        let debug_mode = std::env::var("FOCUSCOACH_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.analysis_interval_secs = DEBUG_ANALYSIS_INTERVAL_SECS;
        }
        self
    }
}

/// The API key is read from the environment only and never persisted.
pub fn api_key_from_env() -> Option<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<CoachSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring unreadable settings at {}: {err}",
                    path.display()
                );
                CoachSettings::default()
            })
        } else {
            CoachSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> CoachSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: CoachSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &CoachSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, CoachSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CoachSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
