//! Command router: side-effecting requests from panels (over RPC) and
//! intercepted command events (from the multiplexer), dispatched to the
//! owning adapter.
//!
//! Every method first checks that the feature is enabled in the snapshot
//! this router was built with and that its adapter exists. Otherwise the
//! answer is [`CommandError::Disabled`]; that is a normal outcome and only
//! logged at debug level.

use crate::config::Config;
use crate::error::{CommandError, Feature};
use crate::event_bus::CommandSink;
use crate::services::Services;
use crate::services::audio::DeviceKind;
use capy_events::{AdjustDirection, AppInfo, Event, EventPayload, MenuEventData};
use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct CommandRouter {
    config: Arc<Config>,
    services: Arc<Services>,
}

impl CommandRouter {
    pub fn new(config: Arc<Config>, services: Arc<Services>) -> Self {
        Self { config, services }
    }

    fn require<'a, T>(
        &self,
        feature: Feature,
        enabled: bool,
        adapter: Option<&'a T>,
    ) -> Result<&'a T, CommandError> {
        match adapter {
            Some(adapter) if enabled => Ok(adapter),
            _ => {
                debug!("Ignoring {} request, feature disabled", feature);
                Err(CommandError::Disabled(feature))
            }
        }
    }

    fn request_timeout(&self) -> Duration {
        self.config.timeouts.request()
    }

    async fn bounded<T, F>(&self, what: &'static str, call: F) -> Result<T, CommandError>
    where
        F: Future<Output = Result<T, CommandError>>,
    {
        tokio::time::timeout(self.request_timeout(), call)
            .await
            .map_err(|_| CommandError::Timeout(what))?
    }

    pub async fn exec(&self, command: &str) -> Result<(), CommandError> {
        let wm = self.require(
            Feature::Wm,
            self.config.hyprland.enabled,
            self.services.wm.as_ref(),
        )?;
        self.bounded("exec", wm.exec(command)).await
    }

    pub async fn find_application(&self, class: &str) -> Result<AppInfo, CommandError> {
        let apps = self.require(
            Feature::Apps,
            self.config.apps.enabled,
            self.services.apps.as_ref(),
        )?;
        apps.find(class)
            .ok_or_else(|| CommandError::Failed(format!("no application for class {:?}", class)))
    }

    pub async fn audio_sink_volume_adjust(
        &self,
        id: &str,
        direction: AdjustDirection,
    ) -> Result<(), CommandError> {
        self.audio_volume(DeviceKind::Sink, id, direction).await
    }

    pub async fn audio_sink_mute_toggle(&self, id: &str) -> Result<(), CommandError> {
        self.audio_mute(DeviceKind::Sink, id).await
    }

    pub async fn audio_source_volume_adjust(
        &self,
        id: &str,
        direction: AdjustDirection,
    ) -> Result<(), CommandError> {
        self.audio_volume(DeviceKind::Source, id, direction).await
    }

    pub async fn audio_source_mute_toggle(&self, id: &str) -> Result<(), CommandError> {
        self.audio_mute(DeviceKind::Source, id).await
    }

    async fn audio_volume(
        &self,
        kind: DeviceKind,
        id: &str,
        direction: AdjustDirection,
    ) -> Result<(), CommandError> {
        let audio = self.require(
            Feature::Audio,
            self.config.audio.enabled,
            self.services.audio.as_ref(),
        )?;
        self.bounded("audio volume", audio.adjust_volume(kind, id, direction))
            .await
    }

    async fn audio_mute(&self, kind: DeviceKind, id: &str) -> Result<(), CommandError> {
        let audio = self.require(
            Feature::Audio,
            self.config.audio.enabled,
            self.services.audio.as_ref(),
        )?;
        self.bounded("audio mute", audio.toggle_mute(kind, id)).await
    }

    pub async fn brightness_adjust(
        &self,
        device: &str,
        direction: AdjustDirection,
    ) -> Result<(), CommandError> {
        let brightness = self.require(
            Feature::Brightness,
            self.config.brightness.enabled,
            self.services.brightness.as_ref(),
        )?;
        self.bounded("brightness", brightness.adjust(device, direction))
            .await
    }

    pub async fn systray_activate(&self, bus_name: &str, x: i32, y: i32) -> Result<(), CommandError> {
        let tray = self.systray()?;
        self.bounded("systray activate", tray.activate(bus_name, x, y))
            .await
    }

    pub async fn systray_secondary_activate(
        &self,
        bus_name: &str,
        x: i32,
        y: i32,
    ) -> Result<(), CommandError> {
        let tray = self.systray()?;
        self.bounded(
            "systray secondary activate",
            tray.secondary_activate(bus_name, x, y),
        )
        .await
    }

    pub async fn systray_context_menu(
        &self,
        bus_name: &str,
        x: i32,
        y: i32,
    ) -> Result<(), CommandError> {
        let tray = self.systray()?;
        self.bounded("systray context menu", tray.context_menu(bus_name, x, y))
            .await
    }

    pub async fn systray_scroll(
        &self,
        bus_name: &str,
        delta: i32,
        orientation: &str,
    ) -> Result<(), CommandError> {
        let tray = self.systray()?;
        self.bounded("systray scroll", tray.scroll(bus_name, delta, orientation))
            .await
    }

    pub async fn systray_menu_about_to_show(
        &self,
        bus_name: &str,
        id: i32,
    ) -> Result<bool, CommandError> {
        let tray = self.systray()?;
        self.bounded("systray menu", tray.menu_about_to_show(bus_name, id))
            .await
    }

    pub async fn systray_menu_event(
        &self,
        bus_name: &str,
        id: i32,
        event_id: &str,
        data: MenuEventData,
        timestamp: u32,
    ) -> Result<(), CommandError> {
        let tray = self.systray()?;
        self.bounded(
            "systray menu event",
            tray.menu_event(bus_name, id, event_id, data, timestamp),
        )
        .await
    }

    fn systray(&self) -> Result<&crate::services::systray::SystrayService, CommandError> {
        self.require(
            Feature::Systray,
            self.config.systray.enabled,
            self.services.systray.as_ref(),
        )
    }

    pub async fn notification_closed(&self, id: u32, reason: u32) -> Result<(), CommandError> {
        let notifications = self.notifications()?;
        self.bounded("notification closed", notifications.closed(id, reason))
            .await
    }

    pub async fn notification_action(&self, id: u32, key: &str) -> Result<(), CommandError> {
        let notifications = self.notifications()?;
        self.bounded("notification action", notifications.action(id, key))
            .await
    }

    fn notifications(
        &self,
    ) -> Result<&crate::services::notifications::NotificationService, CommandError> {
        self.require(
            Feature::Notifications,
            self.config.notifications.enabled,
            self.services.notifications.as_ref(),
        )
    }

    /// Capture needs the compositor for the window geometry.
    pub async fn capture_window(&self, address: &str) -> Result<Vec<u8>, CommandError> {
        let capture = self.require(
            Feature::Capture,
            self.config.capture.enabled,
            self.services.capture.as_ref(),
        )?;
        let wm = self.require(
            Feature::Wm,
            self.config.hyprland.enabled,
            self.services.wm.as_ref(),
        )?;

        let geometry = self
            .bounded("window lookup", wm.client_geometry(address))
            .await?;
        capture.capture(geometry).await
    }

    /// Run a command event. Results only go to the log: the producer of a
    /// command event is not waiting for an answer.
    async fn run_command(&self, event: &Event) -> Result<(), CommandError> {
        match event.payload() {
            EventPayload::ExecRequested(req) => self.exec(&req.command).await,
            EventPayload::AudioSinkVolumeAdjustRequested(req) => {
                self.audio_sink_volume_adjust(&req.id, req.direction).await
            }
            EventPayload::AudioSinkMuteToggleRequested(req) => {
                self.audio_sink_mute_toggle(&req.id).await
            }
            EventPayload::AudioSourceVolumeAdjustRequested(req) => {
                self.audio_source_volume_adjust(&req.id, req.direction)
                    .await
            }
            EventPayload::AudioSourceMuteToggleRequested(req) => {
                self.audio_source_mute_toggle(&req.id).await
            }
            EventPayload::BrightnessAdjustRequested(req) => {
                self.brightness_adjust(&req.device, req.direction).await
            }
            other => {
                warn!("{} is not a command, dropping", other.kind());
                Ok(())
            }
        }
    }
}

impl CommandSink for CommandRouter {
    async fn dispatch(&self, event: Arc<Event>) {
        match self.run_command(&event).await {
            Ok(()) => debug!("{} handled", event.kind()),
            Err(CommandError::Disabled(_)) => {}
            Err(e) => warn!("{} failed: {}", event.kind(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capy_events::{ExecRequest, MuteToggleRequest};

    fn all_disabled() -> Config {
        let mut config = Config::default();
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

    fn router(config: Config) -> CommandRouter {
        CommandRouter::new(Arc::new(config), Arc::new(Services::none()))
    }

    fn disabled<T: std::fmt::Debug>(result: Result<T, CommandError>) -> Feature {
        match result {
            Err(CommandError::Disabled(feature)) => feature,
            other => panic!("expected Disabled, got {:?}", other),
        }
    }

    async fn call_everything(router: &CommandRouter) -> Vec<Feature> {
        use AdjustDirection::{Down, Up};
        vec![
            disabled(router.exec("foot").await),
            disabled(router.find_application("firefox").await),
            disabled(router.audio_sink_volume_adjust("", Up).await),
            disabled(router.audio_sink_mute_toggle("").await),
            disabled(router.audio_source_volume_adjust("", Down).await),
            disabled(router.audio_source_mute_toggle("").await),
            disabled(router.brightness_adjust("", Up).await),
            disabled(router.systray_activate(":1.42", 0, 0).await),
            disabled(router.systray_secondary_activate(":1.42", 0, 0).await),
            disabled(router.systray_context_menu(":1.42", 0, 0).await),
            disabled(router.systray_scroll(":1.42", 1, "vertical").await),
            disabled(router.systray_menu_about_to_show(":1.42", 0).await),
            disabled(
                router
                    .systray_menu_event(":1.42", 3, "clicked", MenuEventData::Empty, 0)
                    .await,
            ),
            disabled(router.notification_closed(7, 2).await),
            disabled(router.notification_action(7, "default").await),
            disabled(router.capture_window("0x55d1").await),
        ]
    }

    #[tokio::test]
    async fn audio_mute_toggle_when_audio_disabled() {
        let router = router(all_disabled());
        assert_eq!(
            disabled(router.audio_sink_mute_toggle("").await),
            Feature::Audio
        );
    }

    #[tokio::test]
    async fn every_method_is_disabled_and_stays_disabled() {
        let router = router(all_disabled());
        let first = call_everything(&router).await;
        let second = call_everything(&router).await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 16);
        assert!(first.contains(&Feature::Systray));
        assert!(first.contains(&Feature::Capture));
    }

    #[tokio::test]
    async fn enabled_but_absent_adapter_is_disabled() {
        // Default config enables everything, but no adapter was constructed.
        let router = router(Config::default());
        let features = call_everything(&router).await;
        assert_eq!(features[0], Feature::Wm);
        assert_eq!(features[3], Feature::Audio);
        assert_eq!(features[15], Feature::Capture);
    }

    #[tokio::test]
    async fn command_events_to_disabled_features_are_harmless() {
        let router = router(all_disabled());
        let exec = Event::new(EventPayload::ExecRequested(ExecRequest {
            command: "foot".to_string(),
        }));
        let mute = Event::new(EventPayload::AudioSinkMuteToggleRequested(
            MuteToggleRequest::default(),
        ));

        assert!(matches!(
            router.run_command(&exec).await,
            Err(CommandError::Disabled(Feature::Wm))
        ));
        assert!(matches!(
            router.run_command(&mute).await,
            Err(CommandError::Disabled(Feature::Audio))
        ));
        router.dispatch(Arc::new(mute)).await;
    }
}
