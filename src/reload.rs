//! Reload triggers and bookkeeping.
//!
//! A reload tears the whole panel set down and builds it again from the
//! current configuration. Triggers are file changes (config or stylesheet)
//! and monitor hotplug. Signals that pile up while a reload is underway are
//! coalesced into one [`PendingReload`].

use crate::config::{Config, ConfigStore, load_stylesheet};
use crate::shutdown::QuitSignal;
use log::{debug, info, warn};
use notify::{EventKind as FsEventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const RELOAD_QUEUE_DEPTH: usize = 8;

/// Quiet period before a burst of file events is acted on.
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Why a reload was requested.
#[derive(Clone, Debug)]
pub enum ReloadSignal {
    /// A new, already validated configuration.
    Config(Arc<Config>),
    Stylesheet(Arc<Vec<u8>>),
    /// Monitor added or removed.
    Hotplug(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadState {
    Running,
    Draining,
    Rebuilding,
}

/// Everything requested since the last rebuild. Later values win.
#[derive(Debug, Default)]
pub struct PendingReload {
    config: Option<Arc<Config>>,
    stylesheet: Option<Arc<Vec<u8>>>,
    hotplug: Vec<String>,
}

impl PendingReload {
    pub fn push(&mut self, signal: ReloadSignal) {
        match signal {
            ReloadSignal::Config(config) => self.config = Some(config),
            ReloadSignal::Stylesheet(stylesheet) => self.stylesheet = Some(stylesheet),
            ReloadSignal::Hotplug(monitor) => self.hotplug.push(monitor),
        }
    }

    /// `first` plus whatever else is already queued.
    pub fn collect(first: ReloadSignal, rx: &mut mpsc::Receiver<ReloadSignal>) -> Self {
        let mut pending = Self::default();
        pending.push(first);
        pending.drain(rx);
        pending
    }

    pub fn drain(&mut self, rx: &mut mpsc::Receiver<ReloadSignal>) {
        while let Ok(signal) = rx.try_recv() {
            self.push(signal);
        }
    }

    /// Make the new snapshots current.
    pub fn apply(self, store: &ConfigStore) {
        if let Some(config) = self.config {
            store.replace_config(config);
        }
        if let Some(stylesheet) = self.stylesheet {
            store.replace_stylesheet(stylesheet);
        }
    }

    /// Short summary for log lines.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.config.is_some() {
            parts.push("config".to_string());
        }
        if self.stylesheet.is_some() {
            parts.push("stylesheet".to_string());
        }
        if !self.hotplug.is_empty() {
            parts.push(format!("hotplug({})", self.hotplug.join(",")));
        }
        parts.join(" + ")
    }
}

/// Which watched files a filesystem event touched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Changed {
    pub config: bool,
    pub stylesheet: bool,
}

impl Changed {
    fn any(self) -> bool {
        self.config || self.stylesheet
    }

    fn merge(&mut self, other: Changed) {
        self.config |= other.config;
        self.stylesheet |= other.stylesheet;
    }
}

/// Match an event against the watched files by name. Editors that save by
/// rename show up as a create of the final name.
pub fn classify(event: &notify::Event, config_path: &Path, style_path: &Path) -> Changed {
    if !matches!(event.kind, FsEventKind::Create(_) | FsEventKind::Modify(_)) {
        return Changed::default();
    }
    let touches = |target: &Path| {
        event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == target.file_name())
    };
    Changed {
        config: touches(config_path),
        stylesheet: touches(style_path),
    }
}

/// Watches the config and stylesheet and turns edits into reload signals.
pub struct ReloadWatcher {
    _watcher: Option<RecommendedWatcher>,
    task: JoinHandle<()>,
}

impl ReloadWatcher {
    /// Failing to watch is not fatal; the host just won't reload on edits.
    pub fn start(
        config_path: PathBuf,
        style_path: PathBuf,
        store: Arc<ConfigStore>,
        reload: mpsc::Sender<ReloadSignal>,
        quit: QuitSignal,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let cfg = config_path.clone();
        let style = style_path.clone();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let changed = classify(&event, &cfg, &style);
                    if changed.any() {
                        let _ = tx.send(changed);
                    }
                }
                Err(e) => warn!("File watch error: {}", e),
            }
        });

        let watcher = match watcher {
            Ok(mut watcher) => {
                for dir in watch_dirs(&config_path, &style_path) {
                    match watcher.watch(&dir, RecursiveMode::NonRecursive) {
                        Ok(()) => debug!("Watching {}", dir.display()),
                        Err(e) => warn!("Cannot watch {}: {}", dir.display(), e),
                    }
                }
                Some(watcher)
            }
            Err(e) => {
                warn!("File watcher unavailable, reload on edit disabled: {}", e);
                None
            }
        };

        let task = tokio::spawn(debounce_loop(
            rx,
            config_path,
            style_path,
            store,
            reload,
            quit,
        ));

        Self {
            _watcher: watcher,
            task,
        }
    }
}

impl Drop for ReloadWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Parent directories of both files, once each.
fn watch_dirs(config_path: &Path, style_path: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for path in [config_path, style_path] {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs
}

async fn debounce_loop(
    mut rx: mpsc::UnboundedReceiver<Changed>,
    config_path: PathBuf,
    style_path: PathBuf,
    store: Arc<ConfigStore>,
    reload: mpsc::Sender<ReloadSignal>,
    mut quit: QuitSignal,
) {
    let mut last = Signalled::from_store(&store);
    loop {
        let mut changed = tokio::select! {
            _ = quit.wait() => return,
            next = rx.recv() => match next {
                Some(changed) => changed,
                None => return,
            },
        };

        // Editors write in bursts; wait for the last one.
        loop {
            match tokio::time::timeout(DEBOUNCE, rx.recv()).await {
                Ok(Some(more)) => changed.merge(more),
                Ok(None) => return,
                Err(_) => break,
            }
        }

        for signal in load_changes(changed, &config_path, &style_path, &mut last) {
            if reload.send(signal).await.is_err() {
                return;
            }
        }
    }
}

/// Latest config and stylesheet handed to the host. A queued reload may not
/// have reached the store yet, so changes are judged against these.
struct Signalled {
    config: Arc<Config>,
    stylesheet: Arc<Vec<u8>>,
}

impl Signalled {
    fn from_store(store: &ConfigStore) -> Self {
        Self {
            config: store.config(),
            stylesheet: store.stylesheet(),
        }
    }
}

/// Read what changed. Broken or unchanged files produce nothing.
fn load_changes(
    changed: Changed,
    config_path: &Path,
    style_path: &Path,
    last: &mut Signalled,
) -> Vec<ReloadSignal> {
    let mut signals = Vec::new();

    if changed.config {
        match Config::load(config_path) {
            Ok(config) if config == *last.config => {
                debug!("Config touched but unchanged");
            }
            Ok(config) => {
                info!("Config changed: {}", config_path.display());
                let config = Arc::new(config);
                last.config = Arc::clone(&config);
                signals.push(ReloadSignal::Config(config));
            }
            Err(e) => warn!("Ignoring invalid config, keeping current panels: {}", e),
        }
    }

    if changed.stylesheet {
        match load_stylesheet(style_path) {
            Ok(stylesheet) if stylesheet == *last.stylesheet => {
                debug!("Stylesheet touched but unchanged");
            }
            Ok(stylesheet) => {
                info!("Stylesheet changed: {}", style_path.display());
                let stylesheet = Arc::new(stylesheet);
                last.stylesheet = Arc::clone(&stylesheet);
                signals.push(ReloadSignal::Stylesheet(stylesheet));
            }
            Err(e) => warn!("Cannot read stylesheet {}: {}", style_path.display(), e),
        }
    }

    signals
}
