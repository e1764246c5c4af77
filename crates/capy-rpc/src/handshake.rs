//! Versioned magic-cookie handshake.
//!
//! The host passes the cookie to the panel through its environment and tells it
//! where the control socket is. The panel refuses to start when the cookie is
//! wrong (so it can't be run by hand by accident), connects, and sends
//! `<version>|<cookie>\n`. The host answers `OK\n` or `ERR <reason>\n`.
//!
//! Lines are read one byte at a time: the same stream carries D-Bus right after
//! the handshake and nothing past the newline may be consumed here.

use crate::error::RpcError;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const PROTOCOL_VERSION: u32 = 1;
pub const COOKIE_KEY: &str = "CAPYHOST_PLUGIN";
pub const COOKIE_VALUE: &str = "9c2a7e4f0b1d4d38a6f5e3c1capyhost";

/// Path of the control socket the panel must dial.
pub const SOCKET_ENV: &str = "CAPYHOST_CONTROL_SOCKET";
pub const VERSION_ENV: &str = "CAPYHOST_PROTOCOL_VERSION";
pub const PANEL_ID_ENV: &str = "CAPYHOST_PANEL_ID";

const ACK: &str = "OK";
const MAX_LINE: usize = 512;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: u32,
    pub cookie_key: String,
    pub cookie_value: String,
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            cookie_key: COOKIE_KEY.to_string(),
            cookie_value: COOKIE_VALUE.to_string(),
        }
    }
}

impl Handshake {
    /// Environment the host sets on a panel process.
    pub fn env(&self, socket: &std::path::Path, panel_id: &str) -> Vec<(String, String)> {
        vec![
            (self.cookie_key.clone(), self.cookie_value.clone()),
            (VERSION_ENV.to_string(), self.protocol_version.to_string()),
            (SOCKET_ENV.to_string(), socket.display().to_string()),
            (PANEL_ID_ENV.to_string(), panel_id.to_string()),
        ]
    }

    /// Panel side: check that we were launched by a compatible host and
    /// return the control socket path.
    pub fn check_env(&self) -> Result<PathBuf, RpcError> {
        let cookie = std::env::var(&self.cookie_key)
            .map_err(|_| RpcError::Env(self.cookie_key.clone()))?;
        if cookie != self.cookie_value {
            return Err(RpcError::Handshake(
                "magic cookie mismatch, this binary is meant to be launched by capyhost"
                    .to_string(),
            ));
        }

        if let Ok(version) = std::env::var(VERSION_ENV) {
            if version != self.protocol_version.to_string() {
                return Err(RpcError::Handshake(format!(
                    "host speaks protocol {}, panel speaks {}",
                    version, self.protocol_version
                )));
            }
        }

        std::env::var(SOCKET_ENV)
            .map(PathBuf::from)
            .map_err(|_| RpcError::Env(SOCKET_ENV.to_string()))
    }

    fn hello(&self) -> String {
        format!("{}|{}\n", self.protocol_version, self.cookie_value)
    }

    /// Host side: validate a hello line.
    pub fn verify(&self, line: &str) -> Result<(), RpcError> {
        let (version, cookie) = line
            .split_once('|')
            .ok_or_else(|| RpcError::Handshake(format!("malformed hello {:?}", line)))?;

        let version: u32 = version
            .parse()
            .map_err(|_| RpcError::Handshake(format!("bad protocol version {:?}", version)))?;
        if version != self.protocol_version {
            return Err(RpcError::Handshake(format!(
                "protocol version {} not supported, expected {}",
                version, self.protocol_version
            )));
        }
        if cookie != self.cookie_value {
            return Err(RpcError::Handshake("magic cookie mismatch".to_string()));
        }
        Ok(())
    }

    /// Host side of the exchange.
    pub async fn accept<S>(&self, stream: &mut S) -> Result<(), RpcError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let line = read_line(stream).await?;
        match self.verify(&line) {
            Ok(()) => {
                stream.write_all(format!("{}\n", ACK).as_bytes()).await?;
                stream.flush().await?;
                Ok(())
            }
            Err(e) => {
                let _ = stream.write_all(format!("ERR {}\n", e).as_bytes()).await;
                Err(e)
            }
        }
    }

    /// Panel side of the exchange.
    pub async fn initiate<S>(&self, stream: &mut S) -> Result<(), RpcError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream.write_all(self.hello().as_bytes()).await?;
        stream.flush().await?;

        let reply = read_line(stream).await?;
        if reply == ACK {
            Ok(())
        } else {
            Err(RpcError::Handshake(format!("host refused: {}", reply)))
        }
    }
}

/// Read a single `\n`-terminated line without buffering past it.
async fn read_line<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, RpcError> {
    let mut buf = Vec::with_capacity(64);
    loop {
        let byte = match stream.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(RpcError::Handshake(
                    "peer closed the stream during handshake".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        if byte == b'\n' {
            break;
        }
        if buf.len() >= MAX_LINE {
            return Err(RpcError::Handshake("handshake line too long".to_string()));
        }
        buf.push(byte);
    }
    String::from_utf8(buf).map_err(|_| RpcError::Handshake("handshake is not UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixStream;

    #[test]
    fn verify_accepts_own_hello() {
        let hs = Handshake::default();
        let hello = hs.hello();
        assert!(hs.verify(hello.trim_end()).is_ok());
    }

    #[test]
    fn verify_rejects_wrong_cookie() {
        let hs = Handshake::default();
        let err = hs.verify("1|not-the-cookie").unwrap_err();
        assert!(err.to_string().contains("cookie"));
    }

    #[test]
    fn verify_rejects_wrong_version() {
        let hs = Handshake::default();
        let line = format!("{}|{}", PROTOCOL_VERSION + 1, COOKIE_VALUE);
        assert!(hs.verify(&line).is_err());
        assert!(hs.verify("garbage").is_err());
    }

    #[test]
    fn missing_cookie_names_the_configured_key() {
        let hs = Handshake {
            cookie_key: "CAPYRPC_TEST_UNSET_COOKIE".to_string(),
            ..Handshake::default()
        };
        let err = hs.check_env().unwrap_err();
        assert!(matches!(err, RpcError::Env(ref key) if key == "CAPYRPC_TEST_UNSET_COOKIE"));
    }

    #[tokio::test]
    async fn exchange_over_socket_pair() {
        let (mut host, mut panel) = UnixStream::pair().unwrap();
        let hs = Handshake::default();
        let host_hs = hs.clone();

        let host_side = tokio::spawn(async move { host_hs.accept(&mut host).await });
        hs.initiate(&mut panel).await.unwrap();
        host_side.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn mismatched_cookie_is_refused_on_both_sides() {
        let (mut host, mut panel) = UnixStream::pair().unwrap();
        let host_hs = Handshake::default();
        let panel_hs = Handshake {
            cookie_value: "stale".to_string(),
            ..Handshake::default()
        };

        let host_side = tokio::spawn(async move { host_hs.accept(&mut host).await });
        let panel_result = panel_hs.initiate(&mut panel).await;
        assert!(panel_result.is_err());
        assert!(host_side.await.unwrap().is_err());
    }
}
