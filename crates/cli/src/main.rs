//! relayclaw — lightweight chat-bot gateway.
//!
//! Bridges Telegram, Discord, and Feishu to LLM backends with per-user
//! sessions, a flat-file memory store, and sandboxed tool calling.
//!
//! Exit codes: 0 on clean shutdown, non-zero on fatal initialization
//! failure. SIGINT/SIGTERM trigger graceful shutdown.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use relayclaw_config::AppConfig;
use relayclaw_gateway::App;

#[derive(Parser)]
#[command(
    name = "relayclaw",
    about = "Lightweight chat-bot gateway bridging messaging services to LLM backends",
    version
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "./relayclaw.toml")]
    config: PathBuf,

    /// Skip first-run bootstrap (do not create a default config file)
    #[arg(long)]
    skip_setup: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Bootstrap: without --skip-setup, a missing config file is written
    // with commented defaults so the operator has something to edit.
    let config = if cli.config.exists() {
        match AppConfig::load_from(&cli.config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load config: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else if cli.skip_setup {
        AppConfig::default()
    } else {
        if let Err(e) = AppConfig::write_default(&cli.config) {
            eprintln!("failed to write default config: {e}");
            return ExitCode::FAILURE;
        }
        eprintln!(
            "created default config at {} — edit it and set your credentials",
            cli.config.display()
        );
        match AppConfig::load_from(&cli.config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load config: {e}");
                return ExitCode::FAILURE;
            }
        }
    };

    // tracing from the logging section. The appender guard must outlive
    // the runtime so buffered log lines are flushed on exit.
    let _log_guard = match init_tracing(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(config = %cli.config.display(), "relayclaw starting");

    let app = match App::build(config) {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "fatal initialization failure");
            return ExitCode::FAILURE;
        }
    };

    // Signals feed the same shutdown path the memory guard uses.
    {
        let app = app.clone();
        tokio::spawn(async move {
            shutdown_on_signal().await;
            info!("shutdown signal received");
            app.shutdown();
        });
    }

    match app.run().await {
        Ok(()) => {
            info!("relayclaw stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "gateway failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(
    config: &AppConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, String> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));

    if config.logging.file.is_empty() {
        if config.logging.format == "json" {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .json()
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
        }
        return Ok(None);
    }

    let path = std::path::Path::new(&config.logging.file);
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| format!("invalid log file path: {}", config.logging.file))?;

    let appender = tracing_appender::rolling::daily(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .init();
    }
    Ok(Some(guard))
}

#[cfg(unix)]
async fn shutdown_on_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("sigint handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("sigterm handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_on_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
