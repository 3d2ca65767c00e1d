//! iclockd - Entry Point
//!
//! Push-protocol dispatch server for biometric attendance terminals.
//! Terminals poll over HTTP for queued commands and report execution
//! results; operators queue commands through the library interface and
//! watch devices through the read-only endpoints.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use iclockd::app::options::{AppOptions, ServerOptions, StorageOptions};
use iclockd::app::run::run;
use iclockd::dispatch::engine::DispatchOptions;
use iclockd::logs::{init_logging, LogOptions};
use iclockd::storage::layout::StorageLayout;
use iclockd::storage::settings::Settings;
use iclockd::utils::version_info;
use iclockd::workers::{checkpoint, sweeper};

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version).unwrap());
        return;
    }

    // Run the server starting here

    // Resolve the storage layout
    let layout = match cli_args.get("data-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file; a missing file runs on defaults
    let settings_file = layout.settings_file();
    let settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                error!("Unable to read settings file: {}", e);
                return;
            }
        }
    } else {
        Settings::default()
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: Some(layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Build run options from settings, with CLI overrides for the listener
    let mut options = AppOptions {
        storage: StorageOptions { layout },
        server: ServerOptions {
            host: settings.listener.host.clone(),
            port: settings.listener.port,
        },
        dispatch: DispatchOptions {
            policy: settings.dispatch.policy(),
            offline_after: Duration::from_secs(settings.dispatch.offline_after_secs),
            retain_done: settings.dispatch.retain_done,
            ..Default::default()
        },
        enable_sweeper: settings.enable_sweeper,
        enable_checkpoint: settings.enable_checkpoint,
        sweeper: sweeper::Options {
            interval: Duration::from_secs(settings.sweep_interval_secs),
            ..Default::default()
        },
        checkpoint: checkpoint::Options {
            interval: Duration::from_secs(settings.checkpoint_interval_secs),
        },
        ..Default::default()
    };

    if let Some(host) = cli_args.get("host") {
        options.server.host = host.clone();
    }
    if let Some(port) = cli_args.get("port").and_then(|p| p.parse().ok()) {
        options.server.port = port;
    }

    info!("Running iclockd with options: {:?}", options);
    let result = run(version.version, options, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run the server: {e}");
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).unwrap();
        let mut sigint = signal(SignalKind::interrupt()).unwrap();

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
