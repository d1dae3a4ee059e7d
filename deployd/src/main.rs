//! deployd - Entry Point
//!
//! Publishes saved chatbot configurations as runner processes, one TCP port
//! per deployment, and keeps their registry in sync with the OS.

use std::collections::HashMap;
use std::env;

use deployd::app::options::AppOptions;
use deployd::app::run::run;
use deployd::filesys::file::File;
use deployd::logs::{init_logging, LogLevel, LogOptions};
use deployd::storage::layout::StorageLayout;
use deployd::storage::settings::Settings;
use deployd::utils::version_info;

use tracing::{error, info, warn};

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
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = match cli_args.get("base-dir") {
        Some(base_dir) => StorageLayout::new(base_dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let settings = match settings_file.read_json_opt::<Settings>().await {
        Ok(settings) => settings,
        Err(e) => {
            println!("Unable to read settings file: {e}");
            return;
        }
    };
    let settings_missing = settings.is_none();
    let settings = settings.unwrap_or_default();

    // Initialize logging
    let log_level = match cli_args.get("log-level") {
        Some(level) => match level.parse::<LogLevel>() {
            Ok(level) => level,
            Err(e) => {
                println!("{e}");
                return;
            }
        },
        None => settings.log_level.clone(),
    };
    let log_options = LogOptions {
        log_level,
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

    if settings_missing {
        warn!(
            "Settings file {} not found, using defaults",
            settings_file.path().display()
        );
    }

    let options = match AppOptions::from_settings(layout, &settings) {
        Ok(options) => options,
        Err(e) => {
            error!("Invalid settings: {e}");
            return;
        }
    };

    info!("Running deployd {} with options: {:?}", version.version, options);
    let result = run(options, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run deployd: {e}");
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
