//! Error types for CapyHost

use capy_rpc::HostCallError;
use std::fmt;

/// An integration that can be turned off in the configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
    Wm,
    Audio,
    Notifications,
    Systray,
    Brightness,
    HostApi,
    Capture,
    Apps,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Feature::Wm => "wm",
            Feature::Audio => "audio",
            Feature::Notifications => "notifications",
            Feature::Systray => "systray",
            Feature::Brightness => "brightness",
            Feature::HostApi => "host_api",
            Feature::Capture => "capture",
            Feature::Apps => "apps",
        };
        f.write_str(name)
    }
}

/// Spawn step that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpawnStep {
    SocketDir,
    Bind,
    Launch,
    Handshake,
    Connect,
    Init,
}

impl fmt::Display for SpawnStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Host errors
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("could not connect to {service}: {reason}")]
    ConnectFailed {
        service: &'static str,
        reason: String,
    },

    #[error("spawning panel {panel:?} failed at {step}: {reason}")]
    SpawnFailed {
        panel: String,
        step: SpawnStep,
        reason: String,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    /// Not a failure. Returned by a run cycle to ask for the next one.
    #[error("reload requested")]
    ReloadRequested,

    #[error("panel {panel:?} exited unexpectedly ({status})")]
    PanelExited { panel: String, status: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    pub fn is_reload(&self) -> bool {
        matches!(self, HostError::ReloadRequested)
    }

    /// Short label for log lines.
    pub fn as_label(&self) -> &'static str {
        match self {
            HostError::ConnectFailed { .. } => "connect_failed",
            HostError::SpawnFailed { .. } => "spawn_failed",
            HostError::Protocol(_) => "protocol_error",
            HostError::ReloadRequested => "reload_requested",
            HostError::PanelExited { .. } => "panel_exited",
            HostError::Config(_) => "config_error",
            HostError::Io(_) => "io_error",
        }
    }

    pub(crate) fn spawn(panel: &str, step: SpawnStep, reason: impl ToString) -> Self {
        HostError::SpawnFailed {
            panel: panel.to_string(),
            step,
            reason: reason.to_string(),
        }
    }
}

impl From<capy_events::EventError> for HostError {
    fn from(e: capy_events::EventError) -> Self {
        HostError::Protocol(e.to_string())
    }
}

/// Result of a routed command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{0} is disabled")]
    Disabled(Feature),

    #[error("{0}")]
    Failed(String),

    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl CommandError {
    pub fn failed(e: impl fmt::Display) -> Self {
        CommandError::Failed(e.to_string())
    }
}

impl From<zbus::Error> for CommandError {
    fn from(e: zbus::Error) -> Self {
        CommandError::Failed(e.to_string())
    }
}

impl From<CommandError> for HostCallError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::Disabled(feature) => HostCallError::Disabled(feature.to_string()),
            CommandError::Failed(reason) => HostCallError::Failed(reason),
            CommandError::Timeout(what) => HostCallError::Timeout(what.to_string()),
        }
    }
}
