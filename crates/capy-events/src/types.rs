//! Payload types carried by events and command results.

use serde::{Deserialize, Serialize};

/// Direction of a relative adjustment (volume, brightness).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustDirection {
    Up,
    Down,
}

impl AdjustDirection {
    /// Map a signed step from a key binding or RPC argument: positive is up,
    /// anything else is down.
    pub fn from_sign(value: i32) -> Self {
        if value > 0 {
            AdjustDirection::Up
        } else {
            AdjustDirection::Down
        }
    }

    pub fn as_sign(self) -> i32 {
        match self {
            AdjustDirection::Up => 1,
            AdjustDirection::Down => -1,
        }
    }
}

/// Active workspace on the focused monitor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceChange {
    pub id: i32,
    pub name: String,
    pub monitor: String,
}

/// Currently focused window.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveWindow {
    /// Compositor address of the window, empty when nothing is focused.
    pub address: String,
    pub class: String,
    pub title: String,
    pub monitor: String,
}

/// A monitor that was plugged in or removed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorChange {
    pub name: String,
}

/// State of an audio sink or source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioDevice {
    /// Server-side name (e.g. "alsa_output.pci-0000_00_1f.3.analog-stereo").
    pub id: String,
    pub description: String,
    /// Volume percentage (0-100+, can exceed 100 for amplified audio).
    pub volume_percent: i32,
    pub muted: bool,
    pub is_default: bool,
}

/// An audio sink or source that disappeared.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioDeviceRemoved {
    pub id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub key: String,
    pub label: String,
}

/// A desktop notification posted by an application.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u32,
    pub app_name: String,
    pub app_icon: String,
    pub summary: String,
    pub body: String,
    pub actions: Vec<NotificationAction>,
    /// 0 low, 1 normal, 2 critical.
    pub urgency: u8,
    /// -1 means server default, 0 means never expire.
    pub expire_timeout_ms: i32,
    /// Unix seconds.
    pub received_at: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationClosed {
    pub id: u32,
    /// 1 expired, 2 dismissed, 3 closed by call, 4 undefined.
    pub reason: u32,
}

/// A status notifier (systray) item.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystrayItem {
    pub bus_name: String,
    pub object_path: String,
    pub id: String,
    pub title: String,
    pub status: String,
    pub icon_name: String,
    pub menu_path: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystrayItemRemoved {
    pub bus_name: String,
}

/// Backlight device state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Brightness {
    pub device: String,
    pub brightness: u32,
    pub max_brightness: u32,
}

impl Brightness {
    pub fn percent(&self) -> f64 {
        if self.max_brightness == 0 {
            return 0.0;
        }
        self.brightness as f64 * 100.0 / self.max_brightness as f64
    }
}

/// On-screen display request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Hud {
    pub icon: String,
    pub title: String,
    pub body: String,
    pub percent: f64,
}

/// Request to launch a program through the compositor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecRequest {
    pub command: String,
}

/// Request to step a sink or source volume. An empty id means the default device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeAdjustRequest {
    pub id: String,
    pub direction: AdjustDirection,
}

/// Request to toggle mute on a sink or source. An empty id means the default device.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MuteToggleRequest {
    pub id: String,
}

/// Request to step a backlight. An empty device means the first device found.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrightnessAdjustRequest {
    pub device: String,
    pub direction: AdjustDirection,
}

/// Application metadata resolved from a desktop entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppInfo {
    pub desktop_file: String,
    pub name: String,
    pub icon: Option<String>,
    pub exec: String,
    pub try_exec: Option<String>,
    pub path: Option<String>,
    pub startup_wm_class: Option<String>,
    pub terminal: bool,
    pub actions: Vec<AppAction>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppAction {
    pub id: String,
    pub name: String,
    pub exec: String,
    pub icon: Option<String>,
}

/// Data attached to a dbusmenu event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum MenuEventData {
    #[default]
    Empty,
    Int(i32),
    Bool(bool),
    Text(String),
}
