//! Error types for capy-rpc

/// Transport and handshake errors
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("missing environment variable {0}")]
    Env(String),

    #[error("D-Bus error: {0}")]
    ZBus(#[from] zbus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by `org.capyshell.Host1` methods.
///
/// `Disabled` is the normal answer when the integration behind a method is
/// turned off in the host configuration.
#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "org.capyshell.Host1.Error")]
pub enum HostCallError {
    #[zbus(error)]
    ZBus(zbus::Error),
    Disabled(String),
    Failed(String),
    Timeout(String),
}

impl HostCallError {
    pub fn is_disabled(&self) -> bool {
        matches!(self, HostCallError::Disabled(_))
    }
}
