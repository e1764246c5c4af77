//! Hyprland adapter.
//!
//! Hyprland's event listener is a blocking loop that cannot be stopped, so it
//! runs on one process-wide thread started on first use. Each run cycle
//! installs its own sink; the thread forwards to whichever sink is current.

use crate::error::{CommandError, HostError};
use crate::event_bus::EventSender;
use crate::reload::ReloadSignal;
use capy_events::{ActiveWindow, Event, EventPayload, MonitorChange, WorkspaceChange};
use hyprland::data::{Client, Clients, Monitors};
use hyprland::dispatch::{Dispatch, DispatchType};
use hyprland::event_listener::EventListener;
use hyprland::shared::{HyprData, HyprDataActiveOptional};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock};
use std::thread;
use tokio::sync::mpsc;

static RUNNING: AtomicBool = AtomicBool::new(false);
static GENERATION: AtomicU64 = AtomicU64::new(0);
static SINK: OnceLock<RwLock<Option<Sink>>> = OnceLock::new();

#[derive(Clone)]
struct Sink {
    generation: u64,
    wm: EventSender,
    hotplug: Option<mpsc::Sender<ReloadSignal>>,
}

fn sink_store() -> &'static RwLock<Option<Sink>> {
    SINK.get_or_init(|| RwLock::new(None))
}

fn current_sink() -> Option<Sink> {
    sink_store().read().ok().and_then(|guard| guard.clone())
}

/// Called on the listener thread.
fn emit(payload: EventPayload) {
    let Some(sink) = current_sink() else {
        return;
    };
    let kind = payload.kind();
    if sink.wm.blocking_submit(Event::new(payload)).is_err() {
        debug!("Dropping {}, no running multiplexer", kind);
    }
}

fn hotplug(monitor: String) {
    let Some(hotplug) = current_sink().and_then(|sink| sink.hotplug) else {
        return;
    };
    // A full queue already holds a pending reload.
    if hotplug.try_send(ReloadSignal::Hotplug(monitor)).is_err() {
        debug!("Reload already pending, hotplug coalesced");
    }
}

/// Window position and size in layout coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

pub struct HyprlandService {
    generation: u64,
}

impl HyprlandService {
    /// Install this cycle's sink and make sure the listener runs. Fails when
    /// Hyprland is not reachable.
    pub async fn start(
        wm: EventSender,
        hotplug: Option<mpsc::Sender<ReloadSignal>>,
    ) -> Result<Self, HostError> {
        let initial = tokio::task::spawn_blocking(|| -> Result<_, String> {
            let monitors = Monitors::get().map_err(|e| e.to_string())?;
            let workspace = focused_workspace(&monitors);
            Ok((workspace, active_window(&monitors)))
        })
        .await
        .map_err(|e| connect_failed(e.to_string()))?
        .map_err(connect_failed)?;

        let generation = GENERATION.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut guard) = sink_store().write() {
            *guard = Some(Sink {
                generation,
                wm: wm.clone(),
                hotplug,
            });
        }

        start_listener();

        // Panels start from the current state rather than the next change.
        let (workspace, window) = initial;
        if let Some(workspace) = workspace {
            let _ = wm
                .submit(Event::new(EventPayload::WorkspaceChanged(workspace)))
                .await;
        }
        let _ = wm
            .submit(Event::new(EventPayload::ActiveWindowChanged(window)))
            .await;

        Ok(Self { generation })
    }

    /// Launch a program through the compositor.
    pub async fn exec(&self, command: &str) -> Result<(), CommandError> {
        let command = command.to_string();
        info!("Exec: {}", command);
        tokio::task::spawn_blocking(move || Dispatch::call(DispatchType::Exec(&command)))
            .await
            .map_err(CommandError::failed)?
            .map_err(CommandError::failed)
    }

    pub async fn client_geometry(&self, address: &str) -> Result<Geometry, CommandError> {
        let wanted = normalize_address(address);
        tokio::task::spawn_blocking(move || {
            let clients = Clients::get().map_err(CommandError::failed)?;
            clients
                .iter()
                .find(|c| normalize_address(&c.address.to_string()) == wanted)
                .map(|c| Geometry {
                    x: c.at.0 as i32,
                    y: c.at.1 as i32,
                    width: c.size.0 as i32,
                    height: c.size.1 as i32,
                })
                .ok_or_else(|| CommandError::Failed(format!("no window at {}", wanted)))
        })
        .await
        .map_err(CommandError::failed)?
    }

    /// Detach from the listener thread. Only clears the sink if no newer
    /// cycle installed its own.
    pub fn close(&self) {
        if let Ok(mut guard) = sink_store().write() {
            if guard.as_ref().map(|s| s.generation) == Some(self.generation) {
                *guard = None;
            }
        }
    }
}

impl Drop for HyprlandService {
    fn drop(&mut self) {
        self.close();
    }
}

fn connect_failed(reason: String) -> HostError {
    HostError::ConnectFailed {
        service: "hyprland",
        reason,
    }
}

/// Addresses show up both with and without the `0x` prefix.
fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    let bare = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    format!("0x{}", bare.to_ascii_lowercase())
}

fn focused_workspace(monitors: &Monitors) -> Option<WorkspaceChange> {
    monitors.iter().find(|m| m.focused).map(|m| WorkspaceChange {
        id: m.active_workspace.id,
        name: m.active_workspace.name.clone(),
        monitor: m.name.clone(),
    })
}

fn focused_monitor_name() -> String {
    Monitors::get()
        .ok()
        .and_then(|monitors| monitors.iter().find(|m| m.focused).map(|m| m.name.clone()))
        .unwrap_or_default()
}

fn active_window(monitors: &Monitors) -> ActiveWindow {
    let monitor = monitors
        .iter()
        .find(|m| m.focused)
        .map(|m| m.name.clone())
        .unwrap_or_default();

    match Client::get_active() {
        Ok(Some(client)) => ActiveWindow {
            address: client.address.to_string(),
            class: client.class,
            title: client.title,
            monitor,
        },
        Ok(None) => ActiveWindow {
            monitor,
            ..Default::default()
        },
        Err(e) => {
            warn!("Failed to query active window: {}", e);
            ActiveWindow::default()
        }
    }
}

fn start_listener() {
    if RUNNING.swap(true, Ordering::SeqCst) {
        debug!("Hyprland listener already running");
        return;
    }

    info!("Starting Hyprland event listener...");

    thread::spawn(move || {
        let mut listener = EventListener::new();

        // Monitor hotplug handlers
        listener.add_monitor_added_handler(|event_data| {
            info!("Monitor added: {}", event_data.name);
            // Let Hyprland settle before anyone queries the new layout.
            thread::sleep(std::time::Duration::from_millis(200));
            emit(EventPayload::MonitorAdded(MonitorChange {
                name: event_data.name.clone(),
            }));
            hotplug(event_data.name);
        });

        listener.add_monitor_removed_handler(|name| {
            info!("Monitor removed: {}", name);
            thread::sleep(std::time::Duration::from_millis(200));
            emit(EventPayload::MonitorRemoved(MonitorChange { name: name.clone() }));
            hotplug(name);
        });

        // Workspace and focus handlers
        listener.add_workspace_changed_handler(|ws| {
            debug!("Workspace changed event: {:?}", ws);
            if let Some(workspace) = Monitors::get().ok().and_then(|m| focused_workspace(&m)) {
                emit(EventPayload::WorkspaceChanged(workspace));
            }
        });

        listener.add_active_window_changed_handler(|win| {
            debug!("Active window changed: {:?}", win);
            let window = match win {
                Some(w) => ActiveWindow {
                    address: w.address.to_string(),
                    class: w.class,
                    title: w.title,
                    monitor: focused_monitor_name(),
                },
                None => ActiveWindow {
                    monitor: focused_monitor_name(),
                    ..Default::default()
                },
            };
            emit(EventPayload::ActiveWindowChanged(window));
        });

        listener.add_window_title_changed_handler(|title_info| {
            let Ok(Some(active)) = Client::get_active() else {
                return;
            };
            if active.address.to_string() != title_info.address.to_string() {
                return;
            }
            emit(EventPayload::ActiveWindowChanged(ActiveWindow {
                address: active.address.to_string(),
                class: active.class,
                title: title_info.title,
                monitor: focused_monitor_name(),
            }));
        });

        info!("Hyprland event listener active");
        if let Err(e) = listener.start_listener() {
            error!("Hyprland listener failed: {}", e);
            RUNNING.store(false, Ordering::SeqCst);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_compare_with_or_without_prefix() {
        assert_eq!(normalize_address("0x55D1AB"), "0x55d1ab");
        assert_eq!(normalize_address("55d1ab"), "0x55d1ab");
        assert_eq!(normalize_address(" 0x55d1ab "), "0x55d1ab");
    }
}
