#![allow(dead_code)]

use capy_events::{Event, EventPayload, WorkspaceChange};
use capyhost::config::{Config, PanelConfig};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Headless panels only, no system integrations.
pub fn headless_config(panels: Vec<PanelConfig>) -> Config {
    let mut config = Config::default();
    config.panel_binary = Some(PathBuf::from(env!("CARGO_BIN_EXE_capy-panel-headless")));
    config.panels = panels;
    config.hyprland.enabled = false;
    config.audio.enabled = false;
    config.notifications.enabled = false;
    config.systray.enabled = false;
    config.brightness.enabled = false;
    config.host_api.enabled = false;
    config.capture.enabled = false;
    config.apps.enabled = false;
    config
}

pub fn panel(id: &str, event_log: &Path) -> PanelConfig {
    PanelConfig {
        id: id.to_string(),
        monitor: None,
        settings: json!({ "event_log": event_log }),
    }
}

pub fn workspace(name: &str) -> Event {
    Event::new(EventPayload::WorkspaceChanged(WorkspaceChange {
        id: name.parse().unwrap_or_default(),
        name: name.to_string(),
        monitor: "DP-1".to_string(),
    }))
}

/// Events a headless panel logged so far.
pub fn logged(path: &Path) -> Vec<Event> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| Event::from_wire(line).unwrap())
        .collect()
}

/// Workspace names in the order a panel saw them.
pub fn workspace_names(path: &Path) -> Vec<String> {
    logged(path)
        .iter()
        .map(|e| e.decode::<WorkspaceChange>().unwrap().name.clone())
        .collect()
}

/// Poll until `path` holds `count` events.
pub async fn wait_for_events(path: &Path, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while logged(path).len() < count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "{} has {} of {} events",
            path.display(),
            logged(path).len(),
            count
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn process_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}

/// Children of this test process whose command name starts with `prefix`,
/// zombies included.
pub fn children_named(prefix: &str) -> Vec<u32> {
    let me = std::process::id();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| {
            let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
                return false;
            };
            let (Some(open), Some(close)) = (stat.find('('), stat.rfind(')')) else {
                return false;
            };
            let comm = &stat[open + 1..close];
            let ppid = stat[close + 1..]
                .split_whitespace()
                .nth(1)
                .and_then(|p| p.parse::<u32>().ok());
            ppid == Some(me) && comm.starts_with(prefix)
        })
        .collect()
}

/// Poll until `path` holds exactly `contents`.
pub async fn wait_for_contents(path: &Path, contents: &[u8]) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while std::fs::read(path).ok().as_deref() != Some(contents) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "{} never held {:?}",
            path.display(),
            String::from_utf8_lossy(contents)
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
