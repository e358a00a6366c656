//! `dbcp-agent`: provisions this node into a Patroni/etcd PostgreSQL cluster.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use dbcp_agent::{Error, StartupSequencer};
use dbcp_config::AgentConfig;
use dbcp_install::{OsInfo, ensure_dirs};
use dbcp_logger::Logger;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Agent configuration file
    #[arg(
        short,
        long,
        default_value = "./configs/agent-config.yaml",
        env = "DBCP_AGENT_CONFIG"
    )]
    config: PathBuf,

    /// Exit after bring-up instead of waiting for SIGINT or SIGTERM
    #[arg(long)]
    once: bool,
}

/// Directories that must exist, owned by the service account, before anything is
/// installed.
fn host_dirs(config: &AgentConfig) -> Vec<PathBuf> {
    let node = &config.node;
    let etcd = &node.etcd;

    let mut dirs = vec![
        node.tmp_path.clone(),
        node.postgresql.data_dir.clone(),
        etcd.data_dir.clone(),
    ];
    dirs.extend(parent(&node.patroni.config_path));
    for file in [&etcd.cert_file, &etcd.key_file, &etcd.ca_file] {
        if !file.is_empty() {
            dirs.extend(parent(Path::new(file)));
        }
    }

    dirs.sort();
    dirs.dedup();
    dirs
}

fn parent(path: &Path) -> Option<PathBuf> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

async fn run(args: Args) -> Result<(), Error> {
    let mut config = AgentConfig::load(&args.config)?;
    let warnings = config.validate()?;

    let logger = Logger::new(&config.logger_options())?;
    logger.install()?;

    for warning in &warnings {
        warn!(target: "config", "{warning}");
    }
    info!(
        target: "startup",
        "dbcp-agent {} starting node {} with {}",
        env!("CARGO_PKG_VERSION"),
        config.node.name,
        args.config.display()
    );

    // A signal during bring-up is only acted on between stages.
    let mut sigterm = signal(SignalKind::terminate()).map_err(Error::Signal)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(Error::Signal)?;
    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        wait_for_shutdown(&mut sigterm, &mut sigint).await;
        signal_token.cancel();
    });

    let owner = Some(config.node.os_user.as_str()).filter(|u| !u.is_empty());
    ensure_dirs(&host_dirs(&config), owner).map_err(Error::Host)?;

    let os = OsInfo::detect().map_err(Error::Host)?;
    info!(target: "startup", "detected {} ({} family)", os.pretty_name, os.family);

    let sequencer = StartupSequencer::from_config(&config, os, logger, shutdown_token.clone())?;
    let bring_up = sequencer.run().await?;

    if let Some(process) = &bring_up.patroni {
        info!(target: "startup", "patroni running with pid {}", process.pid());
    }

    if args.once {
        info!(target: "startup", "one-shot mode, exiting");
        return Ok(());
    }

    shutdown_token.cancelled().await;
    info!(target: "startup", "shutting down, launched services keep running");

    Ok(())
}

async fn wait_for_shutdown(sigterm: &mut Signal, sigint: &mut Signal) {
    tokio::select! {
        _ = sigterm.recv() => info!(target: "startup", "received SIGTERM"),
        _ = sigint.recv() => info!(target: "startup", "received SIGINT"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dbcp-agent: {e}");
            ExitCode::FAILURE
        }
    }
}
