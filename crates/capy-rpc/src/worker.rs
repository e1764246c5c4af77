//! Panel-side runtime.
//!
//! A panel process calls [`connect`] once at startup and then pulls
//! [`PanelRequest`]s from the returned [`WorkerSession`] in the order the host
//! issued them.

use crate::error::RpcError;
use crate::handshake::{Handshake, PANEL_ID_ENV};
use crate::interfaces::{HostProxy, PANEL_PATH};
use capy_events::Event;
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use zbus::Connection;
use zbus::zvariant::ObjectPath;

const REQUEST_QUEUE: usize = 64;

/// A call from the host, in arrival order.
#[derive(Debug)]
pub enum PanelRequest {
    Init {
        /// Ready proxy for calling back into the host.
        host: HostProxy<'static>,
        id: String,
        log_level: String,
        /// JSON-encoded panel configuration.
        config: String,
        stylesheet: Vec<u8>,
    },
    Notify(Event),
    /// Delivered at most once, also when the host connection drops.
    Close,
}

struct PanelService {
    tx: mpsc::Sender<PanelRequest>,
    closed: Arc<AtomicBool>,
}

#[zbus::interface(name = "org.capyshell.Panel1")]
impl PanelService {
    async fn init(
        &self,
        #[zbus(connection)] conn: &Connection,
        host_path: ObjectPath<'_>,
        id: String,
        log_level: String,
        config: String,
        stylesheet: Vec<u8>,
    ) -> zbus::fdo::Result<()> {
        let host = HostProxy::builder(conn)
            .path(host_path.into_owned())?
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await?;

        self.forward(PanelRequest::Init {
            host,
            id,
            log_level,
            config,
            stylesheet,
        })
        .await
    }

    async fn notify(&self, event: String) -> zbus::fdo::Result<()> {
        let event = Event::from_wire(&event).map_err(|e| {
            warn!("Dropping malformed event: {}", e);
            zbus::fdo::Error::InvalidArgs(e.to_string())
        })?;
        self.forward(PanelRequest::Notify(event)).await
    }

    async fn close(&self) -> zbus::fdo::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.forward(PanelRequest::Close).await
    }
}

impl PanelService {
    async fn forward(&self, request: PanelRequest) -> zbus::fdo::Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| zbus::fdo::Error::Failed("panel is shutting down".to_string()))
    }
}

/// Live connection to the host.
pub struct WorkerSession {
    _connection: Connection,
    requests: mpsc::Receiver<PanelRequest>,
}

impl WorkerSession {
    /// Next host request. `None` once the session is over.
    pub async fn next(&mut self) -> Option<PanelRequest> {
        self.requests.recv().await
    }
}

/// Connect to the host that launched this process.
pub async fn connect() -> Result<WorkerSession, RpcError> {
    connect_with(&Handshake::default()).await
}

pub async fn connect_with(handshake: &Handshake) -> Result<WorkerSession, RpcError> {
    let socket = handshake.check_env()?;
    let panel_id = std::env::var(PANEL_ID_ENV).unwrap_or_default();

    debug!("Dialing host at {}", socket.display());
    let mut stream = UnixStream::connect(&socket).await?;
    handshake.initiate(&mut stream).await?;

    let (tx, requests) = mpsc::channel(REQUEST_QUEUE);
    let closed = Arc::new(AtomicBool::new(false));
    let service = PanelService {
        tx: tx.clone(),
        closed: Arc::clone(&closed),
    };

    let connection = zbus::connection::Builder::unix_stream(stream)
        .p2p()
        .serve_at(PANEL_PATH, service)?
        .build()
        .await?;

    info!("Panel {} connected to host", panel_id);

    // The message stream ends when the socket does. Treat that as Close.
    let mut messages = zbus::MessageStream::from(&connection);
    tokio::spawn(async move {
        while messages.next().await.is_some() {}
        if !closed.swap(true, Ordering::SeqCst) {
            debug!("Host connection ended");
            let _ = tx.send(PanelRequest::Close).await;
        }
    });

    Ok(WorkerSession {
        _connection: connection,
        requests,
    })
}
