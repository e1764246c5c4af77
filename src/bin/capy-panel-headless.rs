//! Headless panel worker.
//!
//! Speaks the panel protocol without drawing anything. Every event it
//! receives is appended as one JSON line to `settings.event_log`, which makes
//! it useful for checking delivery from outside. `settings.stylesheet_copy`
//! receives the stylesheet from `Init`. With `settings.exit_after_events` it
//! exits on its own after that many events.

use capy_rpc::PanelRequest;
use log::{debug, info, warn};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Default)]
struct Settings {
    event_log: Option<PathBuf>,
    stylesheet_copy: Option<PathBuf>,
    exit_after_events: Option<u64>,
}

impl Settings {
    /// `config` is the JSON-encoded panel entry from the host config.
    fn parse(config: &str) -> Self {
        let Ok(panel) = serde_json::from_str::<Value>(config) else {
            return Self::default();
        };
        let settings = &panel["settings"];
        Self {
            event_log: settings["event_log"].as_str().map(PathBuf::from),
            stylesheet_copy: settings["stylesheet_copy"].as_str().map(PathBuf::from),
            exit_after_events: settings["exit_after_events"].as_u64(),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let mut session = match capy_rpc::worker::connect().await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("capy-panel-headless: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut log_file = None;
    let mut settings = Settings::default();
    let mut received = 0u64;

    while let Some(request) = session.next().await {
        match request {
            PanelRequest::Init {
                id,
                log_level,
                config,
                stylesheet,
                ..
            } => {
                let _ = env_logger::Builder::new()
                    .filter_level(log_level.parse().unwrap_or(log::LevelFilter::Info))
                    .parse_default_env()
                    .try_init();
                info!("Panel {} initialized", id);

                settings = Settings::parse(&config);
                if let Some(path) = &settings.stylesheet_copy {
                    if let Err(e) = tokio::fs::write(path, &stylesheet).await {
                        warn!("Cannot write {}: {}", path.display(), e);
                    }
                }
                if let Some(path) = &settings.event_log {
                    match tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                        .await
                    {
                        Ok(file) => log_file = Some(file),
                        Err(e) => warn!("Cannot open {}: {}", path.display(), e),
                    }
                }
            }
            PanelRequest::Notify(event) => {
                debug!("Event {}", event.kind());
                if let Some(file) = log_file.as_mut() {
                    match event.to_wire() {
                        Ok(line) => {
                            let _ = file.write_all(format!("{}\n", line).as_bytes()).await;
                            let _ = file.flush().await;
                        }
                        Err(e) => warn!("Cannot encode {}: {}", event.kind(), e),
                    }
                }
                received += 1;
                if settings.exit_after_events == Some(received) {
                    warn!("Exiting after {} events", received);
                    return ExitCode::from(3);
                }
            }
            PanelRequest::Close => {
                info!("Close requested");
                break;
            }
        }
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_come_from_the_panel_entry() {
        let settings = Settings::parse(
            r#"{"id":"top","monitor":null,"settings":{"event_log":"/tmp/top.jsonl","stylesheet_copy":"/tmp/top.css","exit_after_events":2}}"#,
        );
        assert_eq!(settings.event_log, Some(PathBuf::from("/tmp/top.jsonl")));
        assert_eq!(settings.stylesheet_copy, Some(PathBuf::from("/tmp/top.css")));
        assert_eq!(settings.exit_after_events, Some(2));
        assert!(Settings::parse("not json").event_log.is_none());
    }
}
