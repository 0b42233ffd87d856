// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner fleet manager daemon (rfmd)
//!
//! `run` keeps the fleet reconciled (pressure-driven when a planner is
//! configured, periodic otherwise); `consume` is the reactive consumer
//! child-process entry the process manager spawns.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use anyhow::Context;
use clap::{Parser, Subcommand};
use rfm_core::AppConfig;
use rfm_daemon::app::{self, DataPaths};
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "rfmd", about = "Runner fleet manager daemon", version)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, global = true, default_value = "/etc/runner-fleet/config.yaml")]
    config: PathBuf,

    /// Directory for daemon-owned state (metric storage, consumer logs).
    #[arg(long, global = true, default_value = "/var/lib/runner-fleet")]
    data_dir: PathBuf,

    /// Append-only metric event log.
    #[arg(long, global = true, default_value = "/var/log/runner-fleet-metrics.log")]
    metrics_log: PathBuf,

    /// Log file for the daemon itself; stderr when unset.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciliation loops (default).
    Run,
    /// Consume one reactive job from the queue, then exit.
    Consume,
    /// Parse and validate the configuration, then exit.
    CheckConfig,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = setup_logging(cli.log_file.as_deref())?;

    let runtime = tokio::runtime::Runtime::new().context("starting runtime")?;
    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::from_yaml_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    let paths = DataPaths {
        data_dir: cli.data_dir.clone(),
        metrics_log: cli.metrics_log.clone(),
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::CheckConfig => {
            println!("{}", config.name);
            Ok(())
        }
        Command::Consume => run_consumer(config, &paths).await,
        Command::Run => run_daemon(config, &paths, &cli.config).await,
    }
}

async fn run_daemon(
    config: AppConfig,
    paths: &DataPaths,
    config_path: &std::path::Path,
) -> anyhow::Result<()> {
    info!(manager = %config.name, "starting runner fleet manager");
    let app = app::build(config, paths, config_path).await?;

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone())?;

    app::run(app, cancel).await?;
    info!("daemon stopped");
    Ok(())
}

async fn run_consumer(config: AppConfig, paths: &DataPaths) -> anyhow::Result<()> {
    info!(manager = %config.name, "starting reactive consumer");

    // While the consumer holds a claimed message, a SIGTERM exits with the
    // signal's code so the queue returns the message to the next consumer.
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        sigterm.recv().await;
        eprintln!("SIGTERM received, terminating consumer");
        std::process::exit(128 + SignalKind::terminate().as_raw_value());
    });

    app::consume(config, paths).await
}

fn spawn_signal_listener(cancel: CancellationToken) -> anyhow::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
        cancel.cancel();
    });
    Ok(())
}

fn setup_logging(
    log_file: Option<&std::path::Path>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            std::fs::create_dir_all(directory)?;
            let file_name = path
                .file_name()
                .context("log file path has no file name")?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
            Ok(None)
        }
    }
}
