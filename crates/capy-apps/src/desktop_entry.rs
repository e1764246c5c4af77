//! Desktop entry parsing.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Parsed from .desktop files.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DesktopApp {
    /// File name, e.g. "firefox.desktop".
    pub id: String,
    pub name: String,
    pub exec: String,
    pub try_exec: Option<String>,
    pub path: Option<String>,
    pub icon_name: Option<String>,
    pub startup_wm_class: Option<String>,
    pub terminal: bool,
    pub no_display: bool,
    pub actions: Vec<DesktopAction>,
    pub desktop_file_path: PathBuf,
}

/// A `[Desktop Action <id>]` group.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DesktopAction {
    pub id: String,
    pub name: String,
    pub exec: String,
    pub icon_name: Option<String>,
}

/// Parse a .desktop file into a DesktopApp struct.
pub fn parse_desktop_file(path: &Path) -> Option<DesktopApp> {
    let content = fs::read_to_string(path).ok()?;
    let id = path.file_name()?.to_string_lossy().to_string();
    let mut app = parse_desktop_entry(&id, &content)?;
    app.desktop_file_path = path.to_path_buf();
    Some(app)
}

/// Parse desktop entry text. Returns `None` unless it is a non-hidden
/// `Type=Application` entry with a name and command.
pub fn parse_desktop_entry(id: &str, content: &str) -> Option<DesktopApp> {
    let mut groups: Vec<(String, HashMap<String, String>)> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            groups.push((line[1..line.len() - 1].to_string(), HashMap::new()));
            continue;
        }

        // Localized keys ("Name[de]") are skipped.
        if let (Some((key, value)), Some((_, entries))) = (line.split_once('='), groups.last_mut())
        {
            let key = key.trim();
            if !key.contains('[') {
                entries.insert(key.to_string(), value.trim().to_string());
            }
        }
    }

    let entries = &groups.iter().find(|(name, _)| name == "Desktop Entry")?.1;
    if entries.get("Type").map(String::as_str) != Some("Application") {
        return None;
    }
    if is_true(entries.get("Hidden")) {
        return None;
    }

    let declared: Vec<&str> = entries
        .get("Actions")
        .map(|s| s.split(';').map(str::trim).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let actions = declared
        .iter()
        .filter_map(|action_id| {
            let group = format!("Desktop Action {}", action_id);
            let (_, fields) = groups.iter().find(|(name, _)| *name == group)?;
            Some(DesktopAction {
                id: action_id.to_string(),
                name: fields.get("Name")?.clone(),
                exec: fields.get("Exec").cloned().unwrap_or_default(),
                icon_name: fields.get("Icon").cloned(),
            })
        })
        .collect();

    Some(DesktopApp {
        id: id.to_string(),
        name: entries.get("Name")?.clone(),
        exec: entries.get("Exec")?.clone(),
        try_exec: entries.get("TryExec").cloned(),
        path: entries.get("Path").cloned(),
        icon_name: entries.get("Icon").cloned(),
        startup_wm_class: entries.get("StartupWMClass").cloned(),
        terminal: is_true(entries.get("Terminal")),
        no_display: is_true(entries.get("NoDisplay")),
        actions,
        desktop_file_path: PathBuf::new(),
    })
}

fn is_true(value: Option<&String>) -> bool {
    value.map(|s| s == "true").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FIREFOX: &str = "\
[Desktop Entry]
Type=Application
Name=Firefox
Name[de]=Feuerfuchs
Exec=firefox %u
Icon=firefox
StartupWMClass=firefox
Terminal=false
Actions=new-window;private;

[Desktop Action new-window]
Name=New Window
Exec=firefox --new-window

[Desktop Action private]
Name=New Private Window
Exec=firefox --private-window
Icon=firefox-private
";

    #[test]
    fn parses_entry_and_actions() {
        let app = parse_desktop_entry("firefox.desktop", FIREFOX).unwrap();
        assert_eq!(app.name, "Firefox");
        assert_eq!(app.exec, "firefox %u");
        assert_eq!(app.startup_wm_class.as_deref(), Some("firefox"));
        assert!(!app.terminal);
        assert_eq!(
            app.actions,
            vec![
                DesktopAction {
                    id: "new-window".to_string(),
                    name: "New Window".to_string(),
                    exec: "firefox --new-window".to_string(),
                    icon_name: None,
                },
                DesktopAction {
                    id: "private".to_string(),
                    name: "New Private Window".to_string(),
                    exec: "firefox --private-window".to_string(),
                    icon_name: Some("firefox-private".to_string()),
                },
            ]
        );
    }

    #[test]
    fn rejects_non_applications() {
        let link = "[Desktop Entry]\nType=Link\nName=Docs\nURL=https://example.org\n";
        assert!(parse_desktop_entry("docs.desktop", link).is_none());

        let hidden = "[Desktop Entry]\nType=Application\nName=X\nExec=x\nHidden=true\n";
        assert!(parse_desktop_entry("x.desktop", hidden).is_none());
    }

    #[test]
    fn keys_outside_main_group_are_ignored() {
        let entry = "[Other]\nType=Application\n[Desktop Entry]\nName=Y\nExec=y\n";
        assert!(parse_desktop_entry("y.desktop", entry).is_none());
    }
}
