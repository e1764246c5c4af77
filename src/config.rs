//! Host configuration.
//!
//! The live configuration is an immutable snapshot behind [`ConfigStore`].
//! A reload stores a fresh `Arc`; anyone still holding the previous snapshot
//! keeps a consistent view of it.

use crate::error::ConfigError;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const APP_DIR: &str = "capyhost";

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.json")
}

pub fn default_style_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("style.css")
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    /// Panel executable. Defaults to `capy-panel` next to the host binary,
    /// then on `PATH`.
    pub panel_binary: Option<PathBuf>,
    /// Shared library the panel process needs preloaded.
    pub layer_shell_preload: Option<String>,
    pub queue: QueueConfig,
    pub timeouts: TimeoutConfig,
    pub panels: Vec<PanelConfig>,
    pub hyprland: HyprlandConfig,
    pub audio: AudioConfig,
    pub notifications: ServiceToggle,
    pub systray: ServiceToggle,
    pub brightness: BrightnessConfig,
    pub host_api: ServiceToggle,
    pub capture: CaptureConfig,
    pub apps: AppsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            panel_binary: None,
            layer_shell_preload: None,
            queue: QueueConfig::default(),
            timeouts: TimeoutConfig::default(),
            panels: Vec::new(),
            hyprland: HyprlandConfig::default(),
            audio: AudioConfig::default(),
            notifications: ServiceToggle::default(),
            systray: ServiceToggle::default(),
            brightness: BrightnessConfig::default(),
            host_api: ServiceToggle::default(),
            capture: CaptureConfig::default(),
            apps: AppsConfig::default(),
        }
    }
}

/// What to do when a panel's queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    /// Wait for room. A frozen panel eventually stalls every panel.
    #[default]
    Block,
    /// Skip the panel's oldest undelivered events.
    DropOldest,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub input_depth: usize,
    pub panel_depth: usize,
    pub policy: QueuePolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            input_depth: 256,
            panel_depth: 64,
            policy: QueuePolicy::Block,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_ms: u64,
    pub connect_retry_ms: u64,
    pub handshake_ms: u64,
    pub close_ms: u64,
    pub request_ms: u64,
    pub capture_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5000,
            connect_retry_ms: 250,
            handshake_ms: 10000,
            close_ms: 2000,
            request_ms: 2000,
            capture_ms: 2000,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms.max(1))
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    pub fn close(&self) -> Duration {
        Duration::from_millis(self.close_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn capture(&self) -> Duration {
        Duration::from_millis(self.capture_ms)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub id: String,
    pub monitor: Option<String>,
    /// Forwarded to the panel untouched.
    pub settings: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceToggle {
    pub enabled: bool,
    /// Fail startup when the service cannot be reached.
    pub required: bool,
}

impl Default for ServiceToggle {
    fn default() -> Self {
        Self {
            enabled: true,
            required: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyprlandConfig {
    pub enabled: bool,
    pub required: bool,
    /// Rebuild all panels when a monitor is plugged in or removed.
    pub reload_on_hotplug: bool,
}

impl Default for HyprlandConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            required: true,
            reload_on_hotplug: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    pub required: bool,
    pub step_percent: u32,
    pub max_percent: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            required: false,
            step_percent: 5,
            max_percent: 150,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrightnessConfig {
    pub enabled: bool,
    pub required: bool,
    pub step_percent: u32,
    pub poll_ms: u64,
    pub sysfs_root: PathBuf,
}

impl Default for BrightnessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            required: false,
            step_percent: 5,
            poll_ms: 500,
            sysfs_root: PathBuf::from("/sys/class/backlight"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,
    pub program: String,
    /// Output scale passed to the capture program.
    pub scale: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "grim".to_string(),
            scale: 0.5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppsConfig {
    pub enabled: bool,
    /// Extra application directories searched before the XDG ones.
    pub dirs: Vec<PathBuf>,
}

impl Default for AppsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dirs: Vec::new(),
        }
    }
}

impl Config {
    /// Parse and validate.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from disk. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for panel in &self.panels {
            if panel.id.trim().is_empty() {
                return Err(ConfigError::Invalid("panel id must not be empty".to_string()));
            }
            if !seen.insert(panel.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate panel id {:?}",
                    panel.id
                )));
            }
        }
        if self.queue.input_depth == 0 || self.queue.panel_depth == 0 {
            return Err(ConfigError::Invalid("queue depths must be positive".to_string()));
        }
        if self.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown log level {:?}",
                self.log_level
            )));
        }
        Ok(())
    }

    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

/// Stylesheet bytes; a missing file is an empty stylesheet.
pub fn load_stylesheet(path: &Path) -> std::io::Result<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Process-wide configuration and stylesheet snapshots.
pub struct ConfigStore {
    config: ArcSwap<Config>,
    stylesheet: ArcSwap<Vec<u8>>,
}

impl ConfigStore {
    pub fn new(config: Config, stylesheet: Vec<u8>) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            stylesheet: ArcSwap::from_pointee(stylesheet),
        }
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    pub fn stylesheet(&self) -> Arc<Vec<u8>> {
        self.stylesheet.load_full()
    }

    pub fn replace_config(&self, config: Arc<Config>) {
        self.config.store(config);
    }

    pub fn replace_stylesheet(&self, stylesheet: Arc<Vec<u8>>) {
        self.stylesheet.store(stylesheet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_object_is_all_defaults() {
        assert_eq!(Config::from_json("{}").unwrap(), Config::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_json(
            r#"{
                "queue": { "policy": "drop_oldest" },
                "audio": { "enabled": false },
                "panels": [
                    { "id": "top", "monitor": "DP-1", "settings": { "height": 32 } },
                    { "id": "bottom" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.queue.policy, QueuePolicy::DropOldest);
        assert_eq!(config.queue.panel_depth, 64);
        assert!(!config.audio.enabled);
        assert_eq!(config.audio.step_percent, 5);
        assert_eq!(config.panels.len(), 2);
        assert_eq!(config.panels[0].settings["height"], 32);
        assert_eq!(config.panels[1].monitor, None);
        assert!(config.hyprland.required);
    }

    #[test]
    fn duplicate_and_empty_ids_are_rejected() {
        let dup = r#"{ "panels": [ { "id": "a" }, { "id": "a" } ] }"#;
        assert!(matches!(Config::from_json(dup), Err(ConfigError::Invalid(_))));

        let empty = r#"{ "panels": [ { "id": " " } ] }"#;
        assert!(matches!(Config::from_json(empty), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn bad_level_and_syntax_are_rejected() {
        assert!(matches!(
            Config::from_json(r#"{ "log_level": "loud" }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(Config::from_json("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_files_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::default());
        assert!(load_stylesheet(&dir.path().join("nope.css")).unwrap().is_empty());
    }

    #[test]
    fn store_swaps_without_touching_old_snapshot() {
        let store = ConfigStore::new(Config::default(), b"a{}".to_vec());
        let before = store.config();

        let mut next = Config::default();
        next.log_level = "debug".to_string();
        store.replace_config(Arc::new(next));
        store.replace_stylesheet(Arc::new(b"b{}".to_vec()));

        assert_eq!(before.log_level, "info");
        assert_eq!(store.config().log_level, "debug");
        assert_eq!(store.stylesheet().as_slice(), b"b{}");
    }
}
