//! Panel supervisor: one worker process per configured panel.
//!
//! Spawning a panel is a fixed sequence of steps. Any failure after the
//! process was launched kills and reaps it before [`HostError::SpawnFailed`]
//! is returned, so a failed spawn never leaves an orphan.
//!
//! 1. allocate the control socket directory (once per supervisor)
//! 2. bind a per-spawn socket
//! 3. launch the worker with the handshake environment
//! 4. accept its connection and check the magic cookie
//! 5. stand up the peer-to-peer D-Bus server with our `Host1` object
//! 6. call `Init`
//!
//! A supervise task per panel reaps the process and reports unexpected exits.

mod host_service;
pub mod launch;

pub use host_service::HostService;

use crate::config::{Config, PanelConfig};
use crate::error::{HostError, SpawnStep};
use crate::event_bus::Subscriber;
use crate::router::CommandRouter;
use capy_events::Event;
use capy_rpc::{Handshake, PanelProxy, host_object_path};
use launch::{PRELOAD_ENV, SocketDir, panel_binary, preload_value};
use log::{debug, info, warn};
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};

/// A panel process that went away on its own.
#[derive(Clone, Debug)]
pub struct PanelExit {
    pub panel: String,
    /// Identifies the spawn; stale exits from a previous cycle don't match.
    pub serial: u64,
    pub status: String,
}

pub struct Supervisor {
    handshake: Handshake,
    socket_dir: Option<SocketDir>,
    serial: u64,
    exits_tx: mpsc::UnboundedSender<PanelExit>,
    exits_rx: mpsc::UnboundedReceiver<PanelExit>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(Handshake::default())
    }
}

impl Supervisor {
    pub fn new(handshake: Handshake) -> Self {
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Self {
            handshake,
            socket_dir: None,
            serial: 0,
            exits_tx,
            exits_rx,
        }
    }

    /// Next unexpected exit.
    pub async fn next_exit(&mut self) -> Option<PanelExit> {
        self.exits_rx.recv().await
    }

    fn socket_dir(&mut self) -> std::io::Result<&SocketDir> {
        if self.socket_dir.is_none() {
            let dir = SocketDir::allocate()?;
            debug!("Control sockets in {}", dir.path().display());
            self.socket_dir = Some(dir);
        }
        self.socket_dir
            .as_ref()
            .ok_or_else(|| std::io::Error::other("socket directory unavailable"))
    }

    /// Launch and initialize one panel.
    pub async fn spawn(
        &mut self,
        panel: &PanelConfig,
        config: &Config,
        stylesheet: &[u8],
        router: Arc<CommandRouter>,
    ) -> Result<Panel, HostError> {
        let id = panel.id.as_str();
        self.serial += 1;
        let serial = self.serial;
        let timeouts = &config.timeouts;

        let socket = self
            .socket_dir()
            .map_err(|e| HostError::spawn(id, SpawnStep::SocketDir, e))?
            .socket_path(id, serial);

        let _ = std::fs::remove_file(&socket);
        let listener =
            UnixListener::bind(&socket).map_err(|e| HostError::spawn(id, SpawnStep::Bind, e))?;
        let _unlink = Unlink(&socket);

        let binary = panel_binary(config.panel_binary.as_deref())
            .ok_or_else(|| HostError::spawn(id, SpawnStep::Launch, "panel binary not found"))?;

        let mut command = Command::new(&binary);
        command
            .envs(self.handshake.env(&socket, id))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(library) = &config.layer_shell_preload {
            command.env(PRELOAD_ENV, preload_value(library, std::env::var_os(PRELOAD_ENV)));
        }

        let mut child = command.spawn().map_err(|e| {
            HostError::spawn(id, SpawnStep::Launch, format!("{}: {}", binary.display(), e))
        })?;
        let pid = child.id().unwrap_or_default();
        debug!("Panel {} launched as pid {}", id, pid);

        let connected = connect(
            &self.handshake,
            &listener,
            &mut child,
            panel,
            config,
            stylesheet,
            router,
        )
        .await;

        let (connection, proxy) = match connected {
            Ok(connected) => connected,
            Err(e) => {
                let _ = child.start_kill();
                let _ = tokio::time::timeout(timeouts.close(), child.wait()).await;
                return Err(e);
            }
        };

        let (alive_tx, alive) = watch::channel(true);
        let (kill_tx, kill_rx) = oneshot::channel();
        let closing = Arc::new(AtomicBool::new(false));

        tokio::spawn(supervise(
            child,
            id.to_string(),
            serial,
            kill_rx,
            alive_tx,
            Arc::clone(&closing),
            self.exits_tx.clone(),
        ));

        info!("Panel {} ready (pid {})", id, pid);
        Ok(Panel {
            id: id.to_string(),
            serial,
            pid,
            _connection: connection,
            proxy,
            alive,
            kill: Mutex::new(Some(kill_tx)),
            closing,
            close_timeout: timeouts.close(),
        })
    }
}

/// Removes the socket file once the spawn attempt is over.
struct Unlink<'a>(&'a Path);

impl Drop for Unlink<'_> {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.0);
    }
}

/// Steps 4 to 6. The child is watched throughout so a worker that dies
/// early fails the spawn right away instead of at the deadline.
async fn connect(
    handshake: &Handshake,
    listener: &UnixListener,
    child: &mut Child,
    panel: &PanelConfig,
    config: &Config,
    stylesheet: &[u8],
    router: Arc<CommandRouter>,
) -> Result<(zbus::Connection, PanelProxy<'static>), HostError> {
    let id = panel.id.as_str();
    let timeouts = &config.timeouts;

    let stream = step(id, SpawnStep::Handshake, timeouts.handshake(), child, async {
        let (mut stream, _) = listener.accept().await.map_err(|e| e.to_string())?;
        handshake
            .accept(&mut stream)
            .await
            .map_err(|e| e.to_string())?;
        Ok::<UnixStream, String>(stream)
    })
    .await?;

    let host_path = host_object_path(id);
    let service = HostService::new(id, router);
    let connection = step(id, SpawnStep::Connect, timeouts.connect(), child, async {
        zbus::connection::Builder::unix_stream(stream)
            .server(zbus::Guid::generate())
            .map_err(|e| e.to_string())?
            .p2p()
            .serve_at(host_path.as_str(), service)
            .map_err(|e| e.to_string())?
            .build()
            .await
            .map_err(|e| e.to_string())
    })
    .await?;

    let settings = serde_json::to_string(panel)
        .map_err(|e| HostError::spawn(id, SpawnStep::Init, e))?;
    let proxy = step(id, SpawnStep::Init, timeouts.handshake(), child, async {
        let proxy = PanelProxy::builder(&connection)
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await
            .map_err(|e| e.to_string())?;
        proxy
            .init(&host_path, id, &config.log_level, &settings, stylesheet)
            .await
            .map_err(|e| e.to_string())?;
        Ok(proxy)
    })
    .await?;

    Ok((connection, proxy))
}

/// Run one spawn step under `limit`, failing early if the child exits.
async fn step<T, F>(
    id: &str,
    step: SpawnStep,
    limit: Duration,
    child: &mut Child,
    work: F,
) -> Result<T, HostError>
where
    F: Future<Output = Result<T, String>>,
{
    tokio::select! {
        result = tokio::time::timeout(limit, work) => match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(reason)) => Err(HostError::spawn(id, step, reason)),
            Err(_) => Err(HostError::spawn(id, step, format!("timed out after {:?}", limit))),
        },
        status = child.wait() => {
            let status = status.map(|s| s.to_string()).unwrap_or_else(|e| e.to_string());
            Err(HostError::spawn(id, step, format!("worker exited ({})", status)))
        }
    }
}

/// Own the child until it exits or we are told to kill it.
async fn supervise(
    mut child: Child,
    panel: String,
    serial: u64,
    kill: oneshot::Receiver<()>,
    alive: watch::Sender<bool>,
    closing: Arc<AtomicBool>,
    exits: mpsc::UnboundedSender<PanelExit>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        // A dropped sender means the panel handle is gone: kill as well.
        _ = kill => {
            let _ = child.start_kill();
            child.wait().await
        }
    };
    let status = match status {
        Ok(status) => status.to_string(),
        Err(e) => e.to_string(),
    };

    alive.send_replace(false);
    if closing.load(Ordering::SeqCst) {
        debug!("Panel {} exited ({})", panel, status);
        return;
    }

    warn!("Panel {} exited unexpectedly ({})", panel, status);
    let _ = exits.send(PanelExit {
        panel,
        serial,
        status,
    });
}

/// A live panel worker.
pub struct Panel {
    id: String,
    serial: u64,
    pid: u32,
    _connection: zbus::Connection,
    proxy: PanelProxy<'static>,
    alive: watch::Receiver<bool>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    closing: Arc<AtomicBool>,
    close_timeout: Duration,
}

impl Panel {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        *self.alive.borrow()
    }

    /// Ask the worker to close, then make sure it is gone. Safe to call
    /// more than once; later calls only wait for the exit.
    pub async fn teardown(&self) {
        let first = !self.closing.swap(true, Ordering::SeqCst);

        if first && self.is_alive() {
            debug!("Closing panel {}", self.id);
            match tokio::time::timeout(self.close_timeout, self.proxy.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Close on {} failed: {}", self.id, e),
                Err(_) => debug!("Close on {} timed out", self.id),
            }
        }

        if self.wait_exit(self.close_timeout).await {
            return;
        }

        warn!("Panel {} did not exit in time, killing", self.id);
        if let Ok(mut kill) = self.kill.lock() {
            if let Some(kill) = kill.take() {
                let _ = kill.send(());
            }
        }
        self.wait_exit(self.close_timeout).await;
    }

    /// Whether the process is gone within `limit`.
    async fn wait_exit(&self, limit: Duration) -> bool {
        let mut alive = self.alive.clone();
        let exited = tokio::time::timeout(limit, alive.wait_for(|alive| !*alive))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        exited || !self.is_alive()
    }
}

impl Subscriber for Panel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn deliver(&self, event: Arc<Event>) -> Result<(), HostError> {
        let wire = event.to_wire()?;
        self.proxy
            .notify(&wire)
            .await
            .map_err(|e| HostError::Protocol(format!("notify {}: {}", self.id, e)))
    }
}

impl Drop for Panel {
    fn drop(&mut self) {
        // Whatever happens to the handle, the process does not outlive it.
        self.closing.store(true, Ordering::SeqCst);
    }
}
