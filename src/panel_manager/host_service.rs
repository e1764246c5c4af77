//! `org.capyshell.Host1`, served to one panel over its own connection.
//!
//! Thin shell around the [`CommandRouter`]: decode arguments, call the
//! router, map [`CommandError`](crate::error::CommandError) to the D-Bus
//! error the panel sees.

use crate::router::CommandRouter;
use capy_events::{AdjustDirection, MenuEventData};
use capy_rpc::HostCallError;
use log::debug;
use std::sync::Arc;

pub struct HostService {
    panel: String,
    router: Arc<CommandRouter>,
}

impl HostService {
    pub fn new(panel: &str, router: Arc<CommandRouter>) -> Self {
        Self {
            panel: panel.to_string(),
            router,
        }
    }
}

#[zbus::interface(name = "org.capyshell.Host1")]
impl HostService {
    async fn exec(&self, command: String) -> Result<(), HostCallError> {
        debug!("[{}] exec {:?}", self.panel, command);
        Ok(self.router.exec(&command).await?)
    }

    async fn find_application(&self, class: String) -> Result<String, HostCallError> {
        let app = self.router.find_application(&class).await?;
        serde_json::to_string(&app).map_err(|e| HostCallError::Failed(e.to_string()))
    }

    async fn audio_sink_volume_adjust(&self, id: String, direction: i32) -> Result<(), HostCallError> {
        Ok(self
            .router
            .audio_sink_volume_adjust(&id, AdjustDirection::from_sign(direction))
            .await?)
    }

    async fn audio_sink_mute_toggle(&self, id: String) -> Result<(), HostCallError> {
        Ok(self.router.audio_sink_mute_toggle(&id).await?)
    }

    async fn audio_source_volume_adjust(
        &self,
        id: String,
        direction: i32,
    ) -> Result<(), HostCallError> {
        Ok(self
            .router
            .audio_source_volume_adjust(&id, AdjustDirection::from_sign(direction))
            .await?)
    }

    async fn audio_source_mute_toggle(&self, id: String) -> Result<(), HostCallError> {
        Ok(self.router.audio_source_mute_toggle(&id).await?)
    }

    async fn brightness_adjust(&self, device: String, direction: i32) -> Result<(), HostCallError> {
        Ok(self
            .router
            .brightness_adjust(&device, AdjustDirection::from_sign(direction))
            .await?)
    }

    async fn systray_activate(&self, bus_name: String, x: i32, y: i32) -> Result<(), HostCallError> {
        Ok(self.router.systray_activate(&bus_name, x, y).await?)
    }

    async fn systray_secondary_activate(
        &self,
        bus_name: String,
        x: i32,
        y: i32,
    ) -> Result<(), HostCallError> {
        Ok(self
            .router
            .systray_secondary_activate(&bus_name, x, y)
            .await?)
    }

    async fn systray_context_menu(
        &self,
        bus_name: String,
        x: i32,
        y: i32,
    ) -> Result<(), HostCallError> {
        Ok(self.router.systray_context_menu(&bus_name, x, y).await?)
    }

    async fn systray_scroll(
        &self,
        bus_name: String,
        delta: i32,
        orientation: String,
    ) -> Result<(), HostCallError> {
        Ok(self
            .router
            .systray_scroll(&bus_name, delta, &orientation)
            .await?)
    }

    async fn systray_menu_about_to_show(
        &self,
        bus_name: String,
        id: i32,
    ) -> Result<bool, HostCallError> {
        Ok(self.router.systray_menu_about_to_show(&bus_name, id).await?)
    }

    async fn systray_menu_event(
        &self,
        bus_name: String,
        id: i32,
        event_id: String,
        data: String,
        timestamp: u32,
    ) -> Result<(), HostCallError> {
        let data = parse_menu_data(&data)?;
        Ok(self
            .router
            .systray_menu_event(&bus_name, id, &event_id, data, timestamp)
            .await?)
    }

    async fn notification_closed(&self, id: u32, reason: u32) -> Result<(), HostCallError> {
        Ok(self.router.notification_closed(id, reason).await?)
    }

    async fn notification_action(&self, id: u32, key: String) -> Result<(), HostCallError> {
        Ok(self.router.notification_action(id, &key).await?)
    }

    async fn capture_window(&self, address: String) -> Result<Vec<u8>, HostCallError> {
        Ok(self.router.capture_window(&address).await?)
    }
}

/// Empty means no data.
fn parse_menu_data(data: &str) -> Result<MenuEventData, HostCallError> {
    if data.trim().is_empty() {
        return Ok(MenuEventData::Empty);
    }
    serde_json::from_str(data)
        .map_err(|e| HostCallError::Failed(format!("invalid menu event data: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::Services;

    #[test]
    fn menu_data_is_json_tagged() {
        assert_eq!(parse_menu_data("").unwrap(), MenuEventData::Empty);
        assert_eq!(parse_menu_data(r#"{"Int":3}"#).unwrap(), MenuEventData::Int(3));
        assert_eq!(
            parse_menu_data(r#"{"Text":"on"}"#).unwrap(),
            MenuEventData::Text("on".to_string())
        );
        assert!(parse_menu_data("{oops").is_err());
    }

    #[tokio::test]
    async fn disabled_features_surface_as_disabled_errors() {
        let mut config = Config::default();
        config.audio.enabled = false;
        let router = CommandRouter::new(Arc::new(config), Arc::new(Services::none()));
        let service = HostService::new("top", Arc::new(router));

        let err = service.audio_sink_mute_toggle(String::new()).await.unwrap_err();
        assert!(err.is_disabled());
    }
}
