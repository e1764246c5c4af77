//! capy-rpc - the wire contract between CapyHost and panel processes
//!
//! One Unix stream per panel carries two opposite-direction services:
//! - `org.capyshell.Panel1` served by the panel at [`PANEL_PATH`]: `Init`, `Notify`, `Close`
//! - `org.capyshell.Host1` served by the host at a per-panel path handed over in `Init`
//!
//! Before any D-Bus traffic the panel proves it was launched by a compatible host
//! with a versioned magic-cookie handshake (see [`handshake`]). After that the host
//! acts as the peer-to-peer server and the panel as the client.

pub mod error;
pub mod handshake;
pub mod interfaces;
pub mod worker;

pub use error::{HostCallError, RpcError};
pub use handshake::Handshake;
pub use interfaces::{HOST_PATH_PREFIX, HostProxy, PANEL_PATH, PanelProxy, host_object_path};
pub use worker::{PanelRequest, WorkerSession};
