use anyhow::{bail, Context, Result};
use clap::Parser;
use rotate_ipc::RoundRobin;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info};

mod config;
mod countdown;
mod daemon;
mod error;
mod hooks;
mod persistence;

use daemon::Daemon;
use hooks::Hooks;
use persistence::Persistence;

#[derive(Parser)]
#[command(name = "rotated")]
#[command(about = "Rotation timer daemon", long_about = None)]
struct Cli {
    /// Rotation file to count down
    target: PathBuf,

    /// Seconds between ticks (overrides the config file)
    #[arg(short, long)]
    interval: Option<u64>,

    /// Config file to use instead of the per-user one
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(exit) if !exit.is_failure() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<daemon::Exit> {
    let config = config::load_config(cli.config.as_deref())?;
    let interval = match cli.interval {
        Some(0) => bail!("Update interval must be at least 1 second"),
        Some(secs) => Duration::from_secs(secs),
        None => config.interval(),
    };

    info!("Starting daemon for {}...", cli.target.display());
    info!("Start time: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    info!("Update interval: {} seconds", interval.as_secs());

    // Install the handlers before loading, so an early Ctrl+C still runs
    // the expire hooks instead of killing the process.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    let hooks = Hooks::new(config.hooks_dir(&cli.target), config.hook_timeout());
    info!("Hooks directory: {}", hooks.dir().display());

    let daemon = Daemon::start(
        Persistence::new(&cli.target),
        hooks,
        RoundRobin,
        Instant::now(),
    )
    .await
    .with_context(|| format!("Error reading rotation file {}", cli.target.display()))?;

    let shutdown = async {
        if shutdown_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let exit = daemon.run(interval, shutdown).await;
    info!("Daemon exited: {:?}", exit);
    Ok(exit)
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
