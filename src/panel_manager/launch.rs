//! Where panel processes come from: executable lookup, control socket
//! directory and the child environment.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Overrides the private control socket directory.
pub const SOCKET_DIR_ENV: &str = "CAPYHOST_SOCKET_DIR";
pub const PRELOAD_ENV: &str = "LD_PRELOAD";
pub const DEFAULT_PANEL_BINARY: &str = "capy-panel";

/// Directory holding the per-panel control sockets.
pub enum SocketDir {
    /// From the environment. Left in place on drop.
    Configured(PathBuf),
    /// Private (0700) directory under the runtime dir, removed on drop.
    Private(tempfile::TempDir),
}

impl SocketDir {
    pub fn allocate() -> std::io::Result<Self> {
        if let Some(dir) = std::env::var_os(SOCKET_DIR_ENV).filter(|d| !d.is_empty()) {
            let dir = PathBuf::from(dir);
            std::fs::create_dir_all(&dir)?;
            return Ok(SocketDir::Configured(dir));
        }

        let base = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
        // tempfile creates directories with mode 0700.
        let dir = tempfile::Builder::new().prefix("capyhost-").tempdir_in(base)?;
        Ok(SocketDir::Private(dir))
    }

    pub fn path(&self) -> &Path {
        match self {
            SocketDir::Configured(dir) => dir,
            SocketDir::Private(dir) => dir.path(),
        }
    }

    /// Socket path for one spawn attempt. `serial` keeps paths unique across
    /// reloads that reuse a panel id.
    pub fn socket_path(&self, panel_id: &str, serial: u64) -> PathBuf {
        let name: String = panel_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .take(48)
            .collect();
        self.path().join(format!("{}-{}.sock", name, serial))
    }
}

/// Resolve the panel executable: explicit path, next to our own binary,
/// then `PATH`.
pub fn panel_binary(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        return Some(path.to_path_buf());
    }

    let sibling = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_PANEL_BINARY)));
    if let Some(sibling) = sibling.filter(|p| p.is_file()) {
        return Some(sibling);
    }

    search_path(DEFAULT_PANEL_BINARY, std::env::var_os("PATH"))
}

fn search_path(name: &str, path: Option<OsString>) -> Option<PathBuf> {
    std::env::split_paths(&path?)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Preload value for the child: the configured library in front of
/// whatever we inherited.
pub fn preload_value(library: &str, inherited: Option<OsString>) -> OsString {
    let mut value = OsString::from(library);
    if let Some(inherited) = inherited.filter(|v| !v.is_empty()) {
        value.push(" ");
        value.push(inherited);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_paths_are_sanitized_and_unique() {
        let dir = SocketDir::Configured(PathBuf::from("/run/x"));
        assert_eq!(
            dir.socket_path("bar/../top", 3),
            PathBuf::from("/run/x/bar____top-3.sock")
        );
        assert_ne!(dir.socket_path("top", 1), dir.socket_path("top", 2));
    }

    #[test]
    fn private_dir_is_removed_on_drop() {
        let dir = SocketDir::Private(tempfile::tempdir().unwrap());
        let path = dir.path().to_path_buf();
        assert!(path.is_dir());
        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn preload_prepends() {
        assert_eq!(preload_value("/lib/a.so", None), OsString::from("/lib/a.so"));
        assert_eq!(
            preload_value("/lib/a.so", Some(OsString::from("/lib/b.so"))),
            OsString::from("/lib/a.so /lib/b.so")
        );
    }

    #[test]
    fn configured_binary_wins_and_path_search_finds_files() {
        assert_eq!(
            panel_binary(Some(Path::new("/opt/panel"))),
            Some(PathBuf::from("/opt/panel"))
        );

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("capy-panel"), b"").unwrap();
        let path = std::env::join_paths([PathBuf::from("/nonexistent"), dir.path().to_path_buf()])
            .unwrap();
        assert_eq!(
            search_path("capy-panel", Some(path)),
            Some(dir.path().join("capy-panel"))
        );
        assert_eq!(search_path("capy-panel", None), None);
    }
}
