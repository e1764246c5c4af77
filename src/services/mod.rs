//! Event source adapters.
//!
//! Each adapter wraps one system integration. It pushes typed events into the
//! multiplexer from its own task or thread and exposes a few command methods
//! used by the router. One adapter set lives per run cycle; the host closes it
//! on reload and shutdown.
//!
//! - `hyprland` - workspaces, focus, monitor hotplug, exec (WM lane)
//! - `audio` - PulseAudio/PipeWire sinks and sources
//! - `notifications` - org.freedesktop.Notifications server
//! - `systray` - StatusNotifierWatcher and item actions
//! - `brightness` - backlight via sysfs and logind
//! - `host_api` - session bus entry point for key bindings
//! - `apps` - desktop entry lookup
//! - `capture` - window screenshots through an external program

pub mod apps;
pub mod audio;
pub mod brightness;
pub mod capture;
pub mod host_api;
pub mod hyprland;
pub mod notifications;
pub mod systray;

use crate::config::Config;
use crate::error::HostError;
use crate::event_bus::EventSender;
use crate::reload::ReloadSignal;
use log::{info, warn};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Input lanes of the current multiplexer.
#[derive(Clone)]
pub struct Lanes {
    pub events: EventSender,
    pub wm: EventSender,
}

/// The adapter set of one run cycle. `None` means disabled or, for optional
/// integrations, unreachable.
#[derive(Default)]
pub struct Services {
    pub wm: Option<hyprland::HyprlandService>,
    pub audio: Option<audio::AudioService>,
    pub notifications: Option<notifications::NotificationService>,
    pub systray: Option<systray::SystrayService>,
    pub brightness: Option<brightness::BrightnessService>,
    pub host_api: Option<host_api::HostApiService>,
    pub apps: Option<apps::AppsService>,
    pub capture: Option<capture::CaptureService>,
}

impl Services {
    /// No adapters at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Construct every enabled adapter. A required adapter that cannot
    /// connect fails the whole set; an optional one is left out.
    pub async fn start(
        config: &Config,
        lanes: Lanes,
        reload: mpsc::Sender<ReloadSignal>,
    ) -> Result<Self, HostError> {
        info!("Starting services...");
        let mut services = Services::none();
        let timeouts = &config.timeouts;

        if config.hyprland.enabled {
            let hotplug = config.hyprland.reload_on_hotplug.then(|| reload.clone());
            services.wm = optional(
                config.hyprland.required,
                hyprland::HyprlandService::start(lanes.wm.clone(), hotplug).await,
            )?;
        }

        if config.audio.enabled {
            services.audio = optional(
                config.audio.required,
                audio::AudioService::start(&config.audio, timeouts, lanes.events.clone()).await,
            )?;
        }

        if config.notifications.enabled {
            services.notifications = optional(
                config.notifications.required,
                notifications::NotificationService::start(timeouts, lanes.events.clone()).await,
            )?;
        }

        if config.systray.enabled {
            services.systray = optional(
                config.systray.required,
                systray::SystrayService::start(timeouts, lanes.events.clone()).await,
            )?;
        }

        if config.brightness.enabled {
            services.brightness = optional(
                config.brightness.required,
                brightness::BrightnessService::start(
                    &config.brightness,
                    timeouts,
                    lanes.events.clone(),
                )
                .await,
            )?;
        }

        if config.host_api.enabled {
            services.host_api = optional(
                config.host_api.required,
                host_api::HostApiService::start(timeouts, lanes.events.clone()).await,
            )?;
        }

        if config.apps.enabled {
            services.apps = Some(apps::AppsService::start(&config.apps));
        }

        if config.capture.enabled {
            services.capture = Some(capture::CaptureService::new(
                &config.capture,
                timeouts.capture(),
            ));
        }

        Ok(services)
    }

    /// Stop every adapter task and release bus names. The next cycle may
    /// claim the same names right after this returns.
    pub async fn close(&self) {
        if let Some(wm) = &self.wm {
            wm.close();
        }
        if let Some(audio) = &self.audio {
            audio.close();
        }
        if let Some(notifications) = &self.notifications {
            notifications.close().await;
        }
        if let Some(systray) = &self.systray {
            systray.close().await;
        }
        if let Some(brightness) = &self.brightness {
            brightness.close();
        }
        if let Some(host_api) = &self.host_api {
            host_api.close().await;
        }
        if let Some(apps) = &self.apps {
            apps.close();
        }
    }
}

fn optional<T>(required: bool, result: Result<T, HostError>) -> Result<Option<T>, HostError> {
    match result {
        Ok(service) => Ok(Some(service)),
        Err(e) if !required => {
            warn!("Optional service unavailable, continuing without it: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Retry `attempt` every `interval` until it succeeds or `deadline` passes.
pub(crate) async fn retry_until<T, E, F, Fut>(
    service: &'static str,
    deadline: Duration,
    interval: Duration,
    mut attempt: F,
) -> Result<T, HostError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let started = tokio::time::Instant::now();
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if started.elapsed() + interval >= deadline => {
                return Err(HostError::ConnectFailed {
                    service,
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                log::debug!("{} not reachable yet: {}", service, e);
                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Background tasks owned by an adapter. Aborted on close and on drop.
#[derive(Default)]
pub(crate) struct Tasks(Mutex<Vec<JoinHandle<()>>>);

impl Tasks {
    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        if let Ok(mut tasks) = self.0.lock() {
            tasks.push(handle);
        }
    }

    pub(crate) fn abort_all(&self) {
        if let Ok(mut tasks) = self.0.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

impl Drop for Tasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}
