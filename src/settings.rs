use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

const APP_DIR: &str = "screenguard";

/// What to do when the classifier fails or refuses to judge a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum FailPolicy {
    /// Treat as inconclusive: no verdict, overlay untouched, nothing recorded.
    #[default]
    Open,
    /// Treat as unsafe: show the overlay and record an `OTHER` detection.
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureSettings {
    /// Command that writes one PNG screenshot to stdout, e.g. `["grim", "-"]`.
    pub command: Vec<String>,
    pub interval_ms: u64,
    /// Dwell time after a classification completes before the next frame is admitted.
    pub cooldown_secs: u64,
    pub max_width: u32,
    /// Consecutive capture failures after which the surface is considered lost.
    pub failure_limit: u32,
    pub skip_unchanged_frames: bool,
    /// Hamming distance under which two frames count as unchanged.
    pub unchanged_threshold: u32,
    /// How long a previous verdict may be reused for an unchanged frame.
    pub unchanged_reuse_secs: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            interval_ms: 1000,
            cooldown_secs: 5,
            max_width: 720,
            failure_limit: 3,
            skip_unchanged_frames: true,
            unchanged_threshold: 4,
            unchanged_reuse_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    /// JSON-lines feed of posted notifications (a file or FIFO); `None` disables text screening.
    pub feed_path: Option<PathBuf>,
    pub monitored_packages: Vec<String>,
    pub queue_capacity: usize,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            feed_path: None,
            monitored_packages: [
                "com.whatsapp",
                "com.instagram.android",
                "com.snapchat.android",
                "com.facebook.orca",
                "com.discord",
                "com.twitter.android",
                "com.zhiliaoapp.musically",
                "com.google.android.apps.messaging",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassifierSettings {
    pub endpoint: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub on_error: FailPolicy,
    pub on_safety_block: FailPolicy,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".into(),
            model: "gemini-1.5-flash".into(),
            api_key: None,
            timeout_secs: 20,
            on_error: FailPolicy::Open,
            on_safety_block: FailPolicy::Open,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlaySettings {
    /// Full-screen blocker launched while the overlay is shown; `None` only logs.
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Base URL of the document store; `None` keeps events buffered locally.
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub batch_size: usize,
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
    pub periodic_secs: u64,
    pub run_timeout_secs: u64,
    pub require_network: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            batch_size: 500,
            backoff_min_secs: 10,
            backoff_max_secs: 3600,
            periodic_secs: 900,
            run_timeout_secs: 120,
            require_network: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageSettings {
    /// Command printing `<app-id>\t<last-used-epoch-ms>` lines.
    pub command: Option<Vec<String>>,
    pub window_secs: u64,
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            command: None,
            window_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub child_id: String,
    pub data_dir: PathBuf,
    pub capture: CaptureSettings,
    pub notifications: NotificationSettings,
    pub classifier: ClassifierSettings,
    pub overlay: OverlaySettings,
    pub sync: SyncSettings,
    pub usage: UsageSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            child_id: String::new(),
            data_dir: default_data_dir(),
            capture: CaptureSettings::default(),
            notifications: NotificationSettings::default(),
            classifier: ClassifierSettings::default(),
            overlay: OverlaySettings::default(),
            sync: SyncSettings::default(),
            usage: UsageSettings::default(),
        }
    }
}

impl Settings {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("pending_events.sqlite3")
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier.timeout_secs.max(1))
    }

    pub fn capture_cooldown(&self) -> Duration {
        Duration::from_secs(self.capture.cooldown_secs)
    }

    /// Secrets and the device identity may come from the environment instead of the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("SCREENGUARD_CLASSIFIER_KEY") {
            if !key.is_empty() {
                self.classifier.api_key = Some(key);
            }
        }
        if let Ok(token) = std::env::var("SCREENGUARD_SYNC_TOKEN") {
            if !token.is_empty() {
                self.sync.token = Some(token);
            }
        }
        if let Ok(child_id) = std::env::var("SCREENGUARD_CHILD_ID") {
            if !child_id.is_empty() {
                self.child_id = child_id;
            }
        }
    }
}

pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Settings>,
}

impl SettingsStore {
    /// Load settings from `path`; a missing file yields defaults.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid settings in {}", path.display()))?
        } else {
            Settings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current settings with environment overrides applied.
    pub fn effective(&self) -> Settings {
        let mut settings = self.snapshot();
        settings.apply_env_overrides();
        settings
    }

    pub fn snapshot(&self) -> Settings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update<F>(&self, mutate: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        mutate(&mut guard);
        self.persist(&guard)?;
        Ok(guard.clone())
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recorded_behaviour() {
        let settings = Settings::default();
        assert_eq!(settings.capture.cooldown_secs, 5);
        assert_eq!(settings.capture.max_width, 720);
        assert_eq!(settings.sync.batch_size, 500);
        assert_eq!(settings.classifier.on_error, FailPolicy::Open);
        assert_eq!(settings.classifier.on_safety_block, FailPolicy::Open);
        assert_eq!(settings.usage.window_secs, 10);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{ "childId": "kid-7", "classifier": { "onSafetyBlock": "closed" } }"#,
        )
        .unwrap();

        let store = SettingsStore::new(path).unwrap();
        let settings = store.snapshot();
        assert_eq!(settings.child_id, "kid-7");
        assert_eq!(settings.classifier.on_safety_block, FailPolicy::Closed);
        assert_eq!(settings.classifier.on_error, FailPolicy::Open);
        assert_eq!(settings.sync.batch_size, 500);
    }

    #[test]
    fn update_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        store
            .update(|settings| settings.sync.batch_size = 50)
            .unwrap();

        let reloaded = SettingsStore::new(path).unwrap();
        assert_eq!(reloaded.snapshot().sync.batch_size, 50);
    }
}
