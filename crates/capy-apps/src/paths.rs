//! XDG application directory lookup.

use std::path::PathBuf;

/// All directories that may hold `.desktop` files, user dirs first so that
/// user overrides win when ids collide.
pub fn application_directories() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Some(data_home) = dirs::data_dir() {
        dirs.push(data_home.join("applications"));
        dirs.push(data_home.join("flatpak/exports/share/applications"));
    }

    let xdg_data_dirs = std::env::var("XDG_DATA_DIRS")
        .unwrap_or_else(|_| "/usr/local/share:/usr/share".to_string());
    for data_dir in xdg_data_dirs.split(':') {
        if !data_dir.is_empty() {
            dirs.push(PathBuf::from(data_dir).join("applications"));
        }
    }

    dirs.push(PathBuf::from("/var/lib/flatpak/exports/share/applications"));
    dirs.push(PathBuf::from("/var/lib/snapd/desktop/applications"));

    dedup_keep_first(dirs)
}

fn dedup_keep_first(dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = std::collections::HashSet::new();
    dirs.into_iter().filter(|d| seen.insert(d.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_removed_in_order() {
        let dirs = vec![
            PathBuf::from("/a"),
            PathBuf::from("/b"),
            PathBuf::from("/a"),
        ];
        assert_eq!(
            dedup_keep_first(dirs),
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
    }
}
