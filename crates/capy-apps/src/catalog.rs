//! App Catalog implementation.

use crate::desktop_entry::{DesktopApp, parse_desktop_file};
use log::{debug, info};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Index {
    /// Desktop applications indexed by ID (e.g. "firefox.desktop").
    apps: HashMap<String, DesktopApp>,
    /// Lowercased StartupWMClass or file stem to app ID.
    by_class: HashMap<String, String>,
}

/// The main application catalog.
pub struct AppCatalog {
    dirs: Vec<PathBuf>,
    index: RwLock<Index>,
}

impl AppCatalog {
    /// Catalog over `dirs`, earlier directories first. Empty until
    /// [`refresh`](Self::refresh) runs.
    pub fn with_dirs(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            index: RwLock::new(Index::default()),
        }
    }

    /// Rescan all directories. Blocking; run it off the async runtime.
    pub fn refresh(&self) {
        info!("Scanning app catalog...");
        let mut index = Index::default();

        // Earlier directories win, so only insert unseen ids.
        for dir in &self.dirs {
            if !dir.exists() {
                continue;
            }

            let walker = walkdir::WalkDir::new(dir).follow_links(true).max_depth(3);
            for entry in walker.into_iter().filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("desktop") {
                    continue;
                }
                let Some(app) = parse_desktop_file(path) else {
                    continue;
                };
                if index.apps.contains_key(&app.id) {
                    continue;
                }

                let id = app.id.clone();
                if let Some(wm_class) = &app.startup_wm_class {
                    index.by_class.insert(wm_class.to_lowercase(), id.clone());
                }

                // Fallback: index by basename as well (common convention)
                let basename = id.trim_end_matches(".desktop").to_lowercase();
                index.by_class.entry(basename).or_insert(id.clone());

                index.apps.insert(id, app);
            }
        }

        info!("App catalog refresh complete: {} apps", index.apps.len());
        *self.write() = index;
    }

    /// Resolve the app for a window class. Tries StartupWMClass and file
    /// stem first, then the last segment of reverse-DNS ids
    /// ("org.gnome.Nautilus" for class "nautilus").
    pub fn find_by_class(&self, class: &str) -> Option<DesktopApp> {
        if class.is_empty() {
            return None;
        }
        let key = class.to_lowercase();
        let index = self.read();

        if let Some(id) = index.by_class.get(&key) {
            return index.apps.get(id).cloned();
        }

        let found = index
            .apps
            .values()
            .filter(|app| {
                let stem = app.id.trim_end_matches(".desktop").to_lowercase();
                stem.rsplit('.').next() == Some(key.as_str())
            })
            .min_by(|a, b| a.id.cmp(&b.id))
            .cloned();

        if found.is_none() {
            debug!("No desktop entry for class {}", class);
        }
        found
    }

    pub fn len(&self) -> usize {
        self.read().apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_entry(dir: &std::path::Path, file: &str, body: &str) {
        fs::write(dir.join(file), body).unwrap();
    }

    fn catalog() -> (tempfile::TempDir, tempfile::TempDir, AppCatalog) {
        let user = tempfile::tempdir().unwrap();
        let system = tempfile::tempdir().unwrap();

        write_entry(
            user.path(),
            "firefox.desktop",
            "[Desktop Entry]\nType=Application\nName=Firefox (user)\nExec=firefox\n",
        );
        write_entry(
            system.path(),
            "firefox.desktop",
            "[Desktop Entry]\nType=Application\nName=Firefox\nExec=firefox\n",
        );
        write_entry(
            system.path(),
            "code.desktop",
            "[Desktop Entry]\nType=Application\nName=Code\nExec=code\nStartupWMClass=Code-OSS\n",
        );
        write_entry(
            system.path(),
            "org.gnome.Nautilus.desktop",
            "[Desktop Entry]\nType=Application\nName=Files\nExec=nautilus\n",
        );

        let catalog = AppCatalog::with_dirs(vec![
            user.path().to_path_buf(),
            system.path().to_path_buf(),
        ]);
        catalog.refresh();
        (user, system, catalog)
    }

    #[test]
    fn user_entries_shadow_system_entries() {
        let (_u, _s, catalog) = catalog();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.find_by_class("firefox").unwrap().name, "Firefox (user)");
    }

    #[test]
    fn class_lookup_strategies() {
        let (_u, _s, catalog) = catalog();
        assert_eq!(catalog.find_by_class("code-oss").unwrap().id, "code.desktop");
        assert_eq!(catalog.find_by_class("Firefox").unwrap().id, "firefox.desktop");
        assert_eq!(
            catalog.find_by_class("nautilus").unwrap().id,
            "org.gnome.Nautilus.desktop"
        );
        assert!(catalog.find_by_class("unknown").is_none());
        assert!(catalog.find_by_class("").is_none());
    }
}
