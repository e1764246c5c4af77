//! D-Bus interface definitions shared by both ends of a panel connection.
//!
//! The connection is peer-to-peer, so bus names are never resolved. The
//! `default_service` values only fill the destination header.

use crate::error::HostCallError;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};

pub const PANEL_PATH: &str = "/org/capyshell/Panel";

pub const HOST_PATH_PREFIX: &str = "/org/capyshell/Host";

/// Host to panel.
#[zbus::proxy(
    interface = "org.capyshell.Panel1",
    default_service = "org.capyshell.Panel",
    default_path = "/org/capyshell/Panel",
    gen_blocking = false
)]
pub trait Panel {
    /// First call after the handshake. `host_path` is where this panel's
    /// `org.capyshell.Host1` object lives on the same connection.
    fn init(
        &self,
        host_path: &ObjectPath<'_>,
        id: &str,
        log_level: &str,
        config: &str,
        stylesheet: &[u8],
    ) -> zbus::Result<()>;

    /// One JSON-encoded event.
    fn notify(&self, event: &str) -> zbus::Result<()>;

    fn close(&self) -> zbus::Result<()>;
}

/// Panel to host. Every method may answer `Disabled` when the integration
/// behind it is turned off.
#[zbus::proxy(
    interface = "org.capyshell.Host1",
    default_service = "org.capyshell.Host",
    default_path = "/org/capyshell/Host",
    gen_blocking = false
)]
pub trait Host {
    fn exec(&self, command: &str) -> Result<(), HostCallError>;

    /// JSON-encoded `AppInfo` for the given window class.
    fn find_application(&self, class: &str) -> Result<String, HostCallError>;

    fn audio_sink_volume_adjust(&self, id: &str, direction: i32) -> Result<(), HostCallError>;
    fn audio_sink_mute_toggle(&self, id: &str) -> Result<(), HostCallError>;
    fn audio_source_volume_adjust(&self, id: &str, direction: i32)
    -> Result<(), HostCallError>;
    fn audio_source_mute_toggle(&self, id: &str) -> Result<(), HostCallError>;

    fn brightness_adjust(&self, device: &str, direction: i32) -> Result<(), HostCallError>;

    fn systray_activate(&self, bus_name: &str, x: i32, y: i32) -> Result<(), HostCallError>;
    fn systray_secondary_activate(
        &self,
        bus_name: &str,
        x: i32,
        y: i32,
    ) -> Result<(), HostCallError>;
    fn systray_context_menu(&self, bus_name: &str, x: i32, y: i32)
    -> Result<(), HostCallError>;
    fn systray_scroll(
        &self,
        bus_name: &str,
        delta: i32,
        orientation: &str,
    ) -> Result<(), HostCallError>;
    fn systray_menu_about_to_show(&self, bus_name: &str, id: i32)
    -> Result<bool, HostCallError>;
    /// `data` is a JSON-encoded `MenuEventData`.
    fn systray_menu_event(
        &self,
        bus_name: &str,
        id: i32,
        event_id: &str,
        data: &str,
        timestamp: u32,
    ) -> Result<(), HostCallError>;

    fn notification_closed(&self, id: u32, reason: u32) -> Result<(), HostCallError>;
    fn notification_action(&self, id: u32, key: &str) -> Result<(), HostCallError>;

    /// PNG bytes of the window with the given compositor address.
    fn capture_window(&self, address: &str) -> Result<Vec<u8>, HostCallError>;
}

/// Object path of the host service for one panel. Characters that are not
/// valid in a path element are replaced by `_`.
pub fn host_object_path(panel_id: &str) -> OwnedObjectPath {
    let mut element: String = panel_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if element.is_empty() {
        element.push('_');
    }

    // Only [A-Za-z0-9_] remain, so the path is always valid.
    OwnedObjectPath::try_from(format!("{}/{}", HOST_PATH_PREFIX, element))
        .unwrap_or_else(|_| OwnedObjectPath::from(ObjectPath::from_static_str_unchecked(HOST_PATH_PREFIX)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_path_keeps_simple_ids() {
        assert_eq!(host_object_path("top").as_str(), "/org/capyshell/Host/top");
    }

    #[test]
    fn host_path_sanitizes() {
        assert_eq!(
            host_object_path("bar-DP-1.left").as_str(),
            "/org/capyshell/Host/bar_DP_1_left"
        );
        assert_eq!(host_object_path("").as_str(), "/org/capyshell/Host/_");
    }
}
