//! capy-apps: desktop application catalog for Linux desktops.
//!
//! Scans the XDG application directories for `.desktop` files and resolves
//! the entry that belongs to a running window, matched by its window class.

mod catalog;
mod desktop_entry;
mod paths;

pub use catalog::AppCatalog;
pub use desktop_entry::{DesktopAction, DesktopApp, parse_desktop_entry, parse_desktop_file};
pub use paths::application_directories;
