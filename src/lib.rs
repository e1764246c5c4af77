//! CapyHost - control plane for CapyShell panels on Hyprland
//!
//! The host owns every system integration and runs each panel as its own
//! process. Panels receive a single ordered event stream and call back into
//! the host for anything with side effects.
//!
//! - `event_bus` - multiplexer between adapters and panels
//! - `panel_manager` - panel processes, handshake and per-panel RPC
//! - `router` - panel and key binding commands to adapters
//! - `host` - run loop and reload controller
//! - `services` - system integrations (Hyprland, audio, D-Bus services)

pub mod config;
pub mod error;
pub mod event_bus;
pub mod host;
pub mod panel_manager;
pub mod reload;
pub mod router;
pub mod services;
pub mod shutdown;

pub use config::{Config, ConfigStore};
pub use error::{CommandError, HostError};
pub use host::{Host, LivePanel};
pub use reload::{ReloadSignal, ReloadState};
