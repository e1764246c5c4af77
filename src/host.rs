//! Run loop and reload controller.
//!
//! One [`Host::run`] call is one cycle: build the adapter set, spawn every
//! configured panel, multiplex until something happens, then tear it all
//! down again. A reload ends the cycle with [`HostError::ReloadRequested`]
//! and [`Host::run_forever`] starts the next one from the new snapshot.
//!
//! Reload state machine: `Running -> Draining -> Rebuilding -> Running`.

use crate::config::ConfigStore;
use crate::error::HostError;
use crate::event_bus::{EventSender, Multiplexer};
use crate::panel_manager::{Panel, PanelExit, Supervisor};
use crate::reload::{PendingReload, RELOAD_QUEUE_DEPTH, ReloadSignal, ReloadState};
use crate::router::CommandRouter;
use crate::services::{Lanes, Services};
use crate::shutdown::Quit;
use capy_rpc::Handshake;
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// A panel process of the current cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LivePanel {
    pub id: String,
    pub pid: u32,
}

enum Wake {
    Quit,
    Reload(ReloadSignal),
    Exit(PanelExit),
}

enum Outcome {
    Quit,
    Reload(PendingReload),
    Failed(HostError),
}

pub struct Host {
    store: Arc<ConfigStore>,
    supervisor: Supervisor,
    quit: Quit,
    reload_tx: mpsc::Sender<ReloadSignal>,
    reload_rx: mpsc::Receiver<ReloadSignal>,
    state: watch::Sender<ReloadState>,
    live: watch::Sender<Vec<LivePanel>>,
    input: watch::Sender<Option<EventSender>>,
}

impl Host {
    pub fn new(store: Arc<ConfigStore>, quit: Quit) -> Self {
        Self::with_handshake(store, quit, Handshake::default())
    }

    pub fn with_handshake(store: Arc<ConfigStore>, quit: Quit, handshake: Handshake) -> Self {
        let (reload_tx, reload_rx) = mpsc::channel(RELOAD_QUEUE_DEPTH);
        // Nothing is up until the first cycle finished spawning.
        let (state, _) = watch::channel(ReloadState::Rebuilding);
        let (live, _) = watch::channel(Vec::new());
        let (input, _) = watch::channel(None);
        Self {
            store,
            supervisor: Supervisor::new(handshake),
            quit,
            reload_tx,
            reload_rx,
            state,
            live,
            input,
        }
    }

    /// Where reload triggers send their signals.
    pub fn reload_sender(&self) -> mpsc::Sender<ReloadSignal> {
        self.reload_tx.clone()
    }

    pub fn state(&self) -> watch::Receiver<ReloadState> {
        self.state.subscribe()
    }

    pub fn live_panels(&self) -> watch::Receiver<Vec<LivePanel>> {
        self.live.subscribe()
    }

    /// Input lane of the running cycle, `None` between cycles. Senders taken
    /// from an old cycle report closed once it drains.
    pub fn events(&self) -> watch::Receiver<Option<EventSender>> {
        self.input.subscribe()
    }

    /// Run cycles until quit or a fatal error.
    pub async fn run_forever(&mut self) -> Result<(), HostError> {
        loop {
            match self.run().await {
                Err(e) if e.is_reload() => {
                    info!("Reload complete, starting next cycle");
                }
                other => return other,
            }
        }
    }

    /// One cycle. `Ok` on quit, [`HostError::ReloadRequested`] when the next
    /// cycle should start, any other error is fatal.
    pub async fn run(&mut self) -> Result<(), HostError> {
        let config = self.store.config();
        let stylesheet = self.store.stylesheet();
        info!("Starting cycle with {} panel(s)", config.panels.len());

        let mux = Multiplexer::new(&config.queue);
        let lanes = Lanes {
            events: mux.sender(),
            wm: mux.wm_sender(),
        };
        let services = Arc::new(Services::start(&config, lanes, self.reload_tx.clone()).await?);
        let router = Arc::new(CommandRouter::new(
            Arc::clone(&config),
            Arc::clone(&services),
        ));

        let mut panels: Vec<Arc<Panel>> = Vec::with_capacity(config.panels.len());
        for panel in &config.panels {
            let spawned = self
                .supervisor
                .spawn(panel, &config, &stylesheet, Arc::clone(&router))
                .await;
            match spawned {
                Ok(panel) => panels.push(Arc::new(panel)),
                Err(e) => {
                    error!("{}", e);
                    teardown_all(&panels).await;
                    services.close().await;
                    return Err(e);
                }
            }
        }

        self.publish(&panels);
        self.input.send_replace(Some(mux.sender()));
        let mux = mux.start(panels.clone(), Arc::clone(&router), self.quit.signal());
        self.state.send_replace(ReloadState::Running);
        info!("Running");

        let outcome = self.wait(&panels).await;

        if matches!(outcome, Outcome::Reload(_)) {
            self.state.send_replace(ReloadState::Draining);
        }
        // Nothing submitted from here on reaches a panel.
        self.input.send_replace(None);
        mux.stop().await;
        teardown_all(&panels).await;
        drop(panels);
        self.live.send_replace(Vec::new());
        services.close().await;
        drop(router);
        drop(services);

        match outcome {
            Outcome::Quit => {
                info!("Shut down");
                Ok(())
            }
            Outcome::Reload(pending) => {
                self.state.send_replace(ReloadState::Rebuilding);
                pending.apply(&self.store);
                Err(HostError::ReloadRequested)
            }
            Outcome::Failed(e) => Err(e),
        }
    }

    async fn wait(&mut self, panels: &[Arc<Panel>]) -> Outcome {
        let mut quit = self.quit.signal();
        loop {
            // Exits before reloads: a crash is only reported once the reload
            // queue has been checked.
            let wake = tokio::select! {
                biased;
                _ = quit.wait() => Wake::Quit,
                Some(exit) = self.supervisor.next_exit() => Wake::Exit(exit),
                Some(signal) = self.reload_rx.recv() => Wake::Reload(signal),
            };

            match wake {
                Wake::Quit => return Outcome::Quit,
                Wake::Reload(signal) => {
                    let pending = PendingReload::collect(signal, &mut self.reload_rx);
                    info!("Reload requested: {}", pending.describe());
                    return Outcome::Reload(pending);
                }
                Wake::Exit(exit) => {
                    if !panels.iter().any(|p| p.serial() == exit.serial) {
                        debug!("Ignoring exit of stale panel {}", exit.panel);
                        continue;
                    }
                    // A reload already asked for preempts the crash.
                    if let Ok(signal) = self.reload_rx.try_recv() {
                        warn!(
                            "Panel {} exited during reload ({}), ignoring",
                            exit.panel, exit.status
                        );
                        let pending = PendingReload::collect(signal, &mut self.reload_rx);
                        return Outcome::Reload(pending);
                    }
                    error!("Panel {} exited unexpectedly ({})", exit.panel, exit.status);
                    return Outcome::Failed(HostError::PanelExited {
                        panel: exit.panel,
                        status: exit.status,
                    });
                }
            }
        }
    }

    fn publish(&self, panels: &[Arc<Panel>]) {
        let live = panels
            .iter()
            .map(|p| LivePanel {
                id: p.id().to_string(),
                pid: p.pid(),
            })
            .collect();
        self.live.send_replace(live);
    }
}

async fn teardown_all(panels: &[Arc<Panel>]) {
    join_all(panels.iter().map(|panel| panel.teardown())).await;
}
