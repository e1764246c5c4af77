//! Session bus entry point for key bindings.
//!
//! `busctl --user call org.capyshell.CapyHost /org/capyshell/CapyHost
//! org.capyshell.CapyHost1 AudioSinkVolumeAdjust i 1`
//!
//! Every method only submits an event. Command kinds are picked off by the
//! multiplexer and end up in the command router, so a key binding and a
//! panel button take the same path.

use crate::config::TimeoutConfig;
use crate::error::HostError;
use crate::event_bus::EventSender;
use crate::services::retry_until;
use capy_events::{
    AdjustDirection, BrightnessAdjustRequest, Event, EventPayload, ExecRequest, Hud,
    MuteToggleRequest, VolumeAdjustRequest,
};
use log::{info, warn};
use zbus::{Connection, fdo};

pub const BUS_NAME: &str = "org.capyshell.CapyHost";
const OBJECT_PATH: &str = "/org/capyshell/CapyHost";

struct HostApi {
    events: EventSender,
}

impl HostApi {
    async fn submit(&self, payload: EventPayload) -> fdo::Result<()> {
        self.events
            .submit(Event::new(payload))
            .await
            .map_err(|e| fdo::Error::Failed(e.to_string()))
    }
}

#[zbus::interface(name = "org.capyshell.CapyHost1")]
impl HostApi {
    async fn exec(&self, command: String) -> fdo::Result<()> {
        self.submit(EventPayload::ExecRequested(ExecRequest { command }))
            .await
    }

    async fn audio_sink_volume_adjust(&self, direction: i32) -> fdo::Result<()> {
        self.submit(EventPayload::AudioSinkVolumeAdjustRequested(volume(direction)))
            .await
    }

    async fn audio_sink_mute_toggle(&self) -> fdo::Result<()> {
        self.submit(EventPayload::AudioSinkMuteToggleRequested(
            MuteToggleRequest::default(),
        ))
        .await
    }

    async fn audio_source_volume_adjust(&self, direction: i32) -> fdo::Result<()> {
        self.submit(EventPayload::AudioSourceVolumeAdjustRequested(volume(
            direction,
        )))
        .await
    }

    async fn audio_source_mute_toggle(&self) -> fdo::Result<()> {
        self.submit(EventPayload::AudioSourceMuteToggleRequested(
            MuteToggleRequest::default(),
        ))
        .await
    }

    async fn brightness_adjust(&self, direction: i32) -> fdo::Result<()> {
        self.submit(EventPayload::BrightnessAdjustRequested(
            BrightnessAdjustRequest {
                device: String::new(),
                direction: AdjustDirection::from_sign(direction),
            },
        ))
        .await
    }

    async fn hud(&self, icon: String, title: String, body: String, percent: f64) -> fdo::Result<()> {
        self.submit(EventPayload::Hud(Hud {
            icon,
            title,
            body,
            percent,
        }))
        .await
    }
}

/// Key bindings always target the default device.
fn volume(direction: i32) -> VolumeAdjustRequest {
    VolumeAdjustRequest {
        id: String::new(),
        direction: AdjustDirection::from_sign(direction),
    }
}

pub struct HostApiService {
    conn: Connection,
}

impl HostApiService {
    pub async fn start(timeouts: &TimeoutConfig, events: EventSender) -> Result<Self, HostError> {
        let conn = retry_until(
            "host_api",
            timeouts.connect(),
            timeouts.connect_retry(),
            || {
                let api = HostApi {
                    events: events.clone(),
                };
                async move {
                    zbus::connection::Builder::session()?
                        .name(BUS_NAME)?
                        .serve_at(OBJECT_PATH, api)?
                        .build()
                        .await
                }
            },
        )
        .await?;

        info!("Host API available as {}", BUS_NAME);
        Ok(Self { conn })
    }

    pub async fn close(&self) {
        if let Err(e) = self.conn.release_name(BUS_NAME).await {
            warn!("Failed to release {}: {}", BUS_NAME, e);
        }
        let _ = self
            .conn
            .object_server()
            .remove::<HostApi, _>(OBJECT_PATH)
            .await;
    }
}
