//! App catalog shim.
//!
//! Wraps the capy-apps crate so panels can resolve a window class to its
//! desktop entry.

use crate::config::AppsConfig;
use capy_apps::{AppCatalog, DesktopApp};
use capy_events::{AppAction, AppInfo};
use log::{debug, info};
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct AppsService {
    catalog: Arc<AppCatalog>,
    indexing: JoinHandle<()>,
}

impl AppsService {
    /// Start background indexing. Lookups before the first scan finishes
    /// simply find nothing.
    pub fn start(config: &AppsConfig) -> Self {
        info!("Starting app catalog background indexing (capy-apps)...");

        let mut dirs = config.dirs.clone();
        for dir in capy_apps::application_directories() {
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }

        let catalog = Arc::new(AppCatalog::with_dirs(dirs));
        let scan = Arc::clone(&catalog);
        let indexing = tokio::task::spawn_blocking(move || {
            scan.refresh();
            debug!("App catalog indexed {} entries", scan.len());
        });

        Self { catalog, indexing }
    }

    pub fn find(&self, class: &str) -> Option<AppInfo> {
        self.catalog.find_by_class(class).map(app_info)
    }

    pub fn close(&self) {
        // Blocking tasks cannot be interrupted; this only detaches it.
        self.indexing.abort();
    }
}

fn app_info(app: DesktopApp) -> AppInfo {
    AppInfo {
        desktop_file: app.desktop_file_path.to_string_lossy().to_string(),
        name: app.name,
        icon: app.icon_name,
        exec: app.exec,
        try_exec: app.try_exec,
        path: app.path,
        startup_wm_class: app.startup_wm_class,
        terminal: app.terminal,
        actions: app
            .actions
            .into_iter()
            .map(|action| AppAction {
                id: action.id,
                name: action.name,
                exec: action.exec,
                icon: action.icon_name,
            })
            .collect(),
    }
}
