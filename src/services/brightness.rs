//! Backlight adapter.
//!
//! Reads `/sys/class/backlight/*` and polls it for changes made by anyone.
//! Writes go through logind so the host needs no write access to sysfs.

use crate::config::{BrightnessConfig, TimeoutConfig};
use crate::error::{CommandError, HostError};
use crate::event_bus::EventSender;
use crate::services::{Tasks, retry_until};
use capy_events::{AdjustDirection, Brightness, Event, EventPayload, Hud};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zbus::Connection;

const SUBSYSTEM: &str = "backlight";
const HUD_ICON: &str = "display-brightness-symbolic";

#[zbus::proxy(
    interface = "org.freedesktop.login1.Session",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1/session/auto",
    gen_blocking = false
)]
trait LogindSession {
    fn set_brightness(&self, subsystem: &str, name: &str, brightness: u32) -> zbus::Result<()>;
}

type Known = Arc<Mutex<HashMap<String, Brightness>>>;

pub struct BrightnessService {
    root: PathBuf,
    step_percent: u32,
    session: LogindSessionProxy<'static>,
    known: Known,
    events: EventSender,
    tasks: Tasks,
}

impl BrightnessService {
    pub async fn start(
        config: &BrightnessConfig,
        timeouts: &TimeoutConfig,
        events: EventSender,
    ) -> Result<Self, HostError> {
        info!("Starting brightness service...");

        let devices = read_devices(&config.sysfs_root).map_err(|e| HostError::ConnectFailed {
            service: "brightness",
            reason: format!("{}: {}", config.sysfs_root.display(), e),
        })?;
        if devices.is_empty() {
            return Err(HostError::ConnectFailed {
                service: "brightness",
                reason: "no backlight devices".to_string(),
            });
        }

        let conn = retry_until(
            "logind",
            timeouts.connect(),
            timeouts.connect_retry(),
            Connection::system,
        )
        .await?;
        let session = LogindSessionProxy::builder(&conn)
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await
            .map_err(|e| HostError::ConnectFailed {
                service: "logind",
                reason: e.to_string(),
            })?;

        let known: Known = Arc::new(Mutex::new(HashMap::new()));
        for device in &devices {
            remember(&known, device);
            let _ = events
                .submit(Event::new(EventPayload::BrightnessChanged(device.clone())))
                .await;
        }

        let tasks = Tasks::default();
        tasks.spawn(poll_loop(
            config.sysfs_root.clone(),
            Duration::from_millis(config.poll_ms.max(50)),
            Arc::clone(&known),
            events.clone(),
        ));

        info!("Brightness service watching {} device(s)", devices.len());
        Ok(Self {
            root: config.sysfs_root.clone(),
            step_percent: config.step_percent,
            session,
            known,
            events,
            tasks,
        })
    }

    /// Step a backlight. An empty device name picks the first device.
    pub async fn adjust(&self, device: &str, direction: AdjustDirection) -> Result<(), CommandError> {
        let devices = read_devices(&self.root).map_err(CommandError::failed)?;
        let current = if device.is_empty() {
            devices.into_iter().next()
        } else {
            devices.into_iter().find(|d| d.device == device)
        }
        .ok_or_else(|| CommandError::Failed(format!("no backlight device {:?}", device)))?;

        let value = step_value(&current, direction, self.step_percent);
        debug!(
            "Brightness {}: {} -> {}",
            current.device, current.brightness, value
        );
        self.session
            .set_brightness(SUBSYSTEM, &current.device, value)
            .await?;

        let updated = Brightness {
            brightness: value,
            ..current
        };
        remember(&self.known, &updated);

        let hud = Hud {
            icon: HUD_ICON.to_string(),
            title: "Brightness".to_string(),
            body: updated.device.clone(),
            percent: updated.percent(),
        };
        self.events
            .submit(Event::new(EventPayload::BrightnessChanged(updated)))
            .await
            .map_err(CommandError::failed)?;
        self.events
            .submit(Event::new(EventPayload::Hud(hud)))
            .await
            .map_err(CommandError::failed)
    }

    pub fn close(&self) {
        self.tasks.abort_all();
    }
}

/// Store `device` and report whether it changed.
fn remember(known: &Known, device: &Brightness) -> bool {
    let Ok(mut known) = known.lock() else {
        return false;
    };
    if known.get(&device.device) == Some(device) {
        return false;
    }
    known.insert(device.device.clone(), device.clone());
    true
}

async fn poll_loop(root: PathBuf, interval: Duration, known: Known, events: EventSender) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let devices = match read_devices(&root) {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Failed to read {}: {}", root.display(), e);
                continue;
            }
        };
        for device in devices {
            if !remember(&known, &device) {
                continue;
            }
            debug!("Brightness changed: {} {:.0}%", device.device, device.percent());
            if events
                .submit(Event::new(EventPayload::BrightnessChanged(device)))
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

/// Every readable backlight under `root`, sorted by name.
fn read_devices(root: &Path) -> std::io::Result<Vec<Brightness>> {
    let mut devices = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match (read_value(&path, "brightness"), read_value(&path, "max_brightness")) {
            (Some(brightness), Some(max_brightness)) => devices.push(Brightness {
                device: name.to_string(),
                brightness,
                max_brightness,
            }),
            _ => debug!("Skipping {}, no readable brightness", path.display()),
        }
    }
    devices.sort_by(|a, b| a.device.cmp(&b.device));
    Ok(devices)
}

fn read_value(dir: &Path, file: &str) -> Option<u32> {
    std::fs::read_to_string(dir.join(file))
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Next raw value after one step. Never goes fully dark.
fn step_value(current: &Brightness, direction: AdjustDirection, step_percent: u32) -> u32 {
    let max = current.max_brightness as i64;
    let step = (max * step_percent as i64 / 100).max(1);
    let floor = if max > 0 { 1 } else { 0 };
    (current.brightness as i64 + direction.as_sign() as i64 * step).clamp(floor, max) as u32
}
