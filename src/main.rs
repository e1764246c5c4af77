//! CapyHost - control plane for CapyShell panels
//!
//! Restarts the panel set on config, stylesheet and monitor changes.

use capyhost::config::{Config, ConfigStore, default_config_path, default_style_path, load_stylesheet};
use capyhost::host::Host;
use capyhost::reload::ReloadWatcher;
use capyhost::shutdown::{Quit, wait_for_os_signal};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about = "Control plane for CapyShell panels")]
struct Cli {
    /// Configuration file (JSON).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Stylesheet handed to every panel.
    #[arg(long)]
    style: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let style_path = cli.style.unwrap_or_else(default_style_path);

    // Config errors at startup are fatal, so read it before logging is set
    // up and report on stderr.
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("capyhost: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // RUST_LOG wins over the configured level.
    env_logger::Builder::new()
        .filter_level(config.level_filter())
        .parse_default_env()
        .format_timestamp_millis()
        .init();

    let stylesheet = match load_stylesheet(&style_path) {
        Ok(stylesheet) => stylesheet,
        Err(e) => {
            warn!("Cannot read stylesheet {}: {}", style_path.display(), e);
            Vec::new()
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("capyhost")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(config, stylesheet, config_path, style_path))
}

async fn run(config: Config, stylesheet: Vec<u8>, config_path: PathBuf, style_path: PathBuf) -> ExitCode {
    info!("Starting CapyHost {}...", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(ConfigStore::new(config, stylesheet));
    let quit = Quit::new();
    let mut host = Host::new(Arc::clone(&store), quit.clone());

    let _watcher = ReloadWatcher::start(
        config_path,
        style_path,
        Arc::clone(&store),
        host.reload_sender(),
        quit.signal(),
    );

    let on_signal = quit.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_os_signal().await {
            error!("Cannot install signal handlers: {}", e);
            return;
        }
        on_signal.trigger();
    });

    match host.run_forever().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal ({}): {}", e.as_label(), e);
            ExitCode::FAILURE
        }
    }
}
