//! latmeshd — the latency mesh daemon.
//!
//! One binary, three roles:
//! - `probe`: runs on every node, publishes that node's latency row
//! - `aggregate`: merges all rows into the cluster matrix
//! - `show`: prints the published matrix
//!
//! Every option can also be set through the environment variable shown in
//! `--help`.
//!
//! # Usage
//!
//! ```text
//! NODE_NAME=worker-1 latmeshd probe --data-dir /latency
//! latmeshd aggregate --data-dir /latency --interval 30
//! latmeshd show --data-dir /latency
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

mod aggregate_mode;
mod config;
mod probe_mode;
mod show;

use config::{AggregateArgs, ProbeArgs};

const DEFAULT_LOG_FILTER: &str = "info,latmeshd=debug";

#[derive(Parser)]
#[command(
    name = "latmeshd",
    about = "Cluster-wide network latency mesh",
    version,
    propagate_version = true
)]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, env = "LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Measure RTT from this node to every member and publish the row.
    Probe(ProbeArgs),

    /// Merge all published rows into the cluster matrix.
    Aggregate(AggregateArgs),

    /// Print the published cluster matrix.
    Show {
        /// Directory shared by probes and the aggregator.
        #[arg(long, env = "LATENCY_DIR", default_value = "/latency")]
        data_dir: PathBuf,

        /// Output format: text or json.
        #[arg(short, long, default_value = "text")]
        format: show::Format,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Probe(args) => probe_mode::run_probe(args).await,
        Command::Aggregate(args) => aggregate_mode::run_aggregate(args).await,
        Command::Show { data_dir, format } => show::run_show(&data_dir, format),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Shutdown channel flipped by Ctrl-C or SIGTERM.
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = tx.send(true);
    });
    rx
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "cannot install SIGTERM handler, only Ctrl-C will stop the daemon");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot install Ctrl-C handler");
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        _ = term.recv() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "cannot install Ctrl-C handler");
                term.recv().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
