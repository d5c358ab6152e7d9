//! Command line interface.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};
use eyre::eyre;
use lumen_server::{LightServer, ServerArgs, ServerConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::logging::init_logging;

/// Default seconds between status log lines.
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 30;

/// Logging configuration.
#[derive(Debug, Args, Clone, Default, Serialize, Deserialize)]
#[command(next_help_heading = "Logging")]
#[serde(default)]
pub(crate) struct LogArgs {
    /// Silence all output.
    #[arg(short, long)]
    pub(crate) quiet: bool,

    /// Verbose mode (-v, -vv, -vvv, etc.).
    #[arg(short, long, action = clap::ArgAction::Count)]
    #[serde(skip)]
    pub(crate) verbosity: u8,

    /// Log filter directive (e.g., "lumen_server=debug,lumen_clientpool=trace").
    #[arg(long = "log.filter", value_name = "DIRECTIVE")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) filter: Option<String>,

    /// Use JSON format for log output.
    #[arg(long = "log.json")]
    pub(crate) json: bool,
}

/// Lumen light-client serving node.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Path to a TOML configuration file, created with defaults if missing.
    #[arg(long, value_name = "PATH", env = "LUMEN_CONFIG")]
    pub(crate) config: Option<PathBuf>,

    /// Seconds between status log lines (0 disables them).
    #[arg(long = "status-interval", default_value_t = DEFAULT_STATUS_INTERVAL_SECS)]
    pub(crate) status_interval: u64,

    /// Print the effective configuration and exit.
    #[arg(long = "print-config")]
    pub(crate) print_config: bool,

    #[command(flatten)]
    pub(crate) logs: LogArgs,

    #[command(flatten)]
    pub(crate) light: ServerArgs,
}

impl Cli {
    /// Effective light serving arguments: the config file, if any, with
    /// explicit flags on top.
    pub(crate) fn resolve(&self) -> eyre::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load_or_create(path)?,
            None => NodeConfig::default(),
        };
        config.apply_cli_args(&self.light);
        config.light.validate().map_err(|e| eyre!(e))?;
        Ok(config)
    }
}

/// Parse arguments, start the server and run until interrupted.
pub(crate) async fn run() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let config = cli.resolve()?;

    if cli.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    init_logging(&cli.logs)?;
    info!(config = ?cli.config, "Starting lumen");

    let server = LightServer::builder(ServerConfig::from(&config.light)).spawn()?;
    let mut status = tokio::time::interval(Duration::from_secs(cli.status_interval.max(1)));
    status.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
                break;
            }
            _ = status.tick(), if cli.status_interval > 0 => {
                log_status(&server).await;
            }
        }
    }

    server.shutdown().await;
    Ok(())
}

async fn log_status(server: &LightServer) {
    let pools = server.pool_status();
    match server.status().await {
        Ok(load) => info!(
            free = pools.free.members,
            free_max = pools.free.max,
            priority = pools.priority.connected,
            queued = pools.serving.queued,
            busy = pools.serving.busy,
            threads = load.threads,
            block_processing = load.block_processing,
            total_capacity = load.total_capacity,
            "Light server status"
        ),
        Err(e) => warn!(error = %e, "status unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::parse_from(["lumen"]);
        assert!(cli.config.is_none());
        assert_eq!(cli.status_interval, DEFAULT_STATUS_INTERVAL_SECS);
        assert_eq!(cli.light, ServerArgs::default());
        assert_eq!(cli.logs.verbosity, 0);
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::parse_from([
            "lumen",
            "-vv",
            "--log.json",
            "--light.serve",
            "200",
            "--light.peers",
            "8",
        ]);
        assert_eq!(cli.logs.verbosity, 2);
        assert!(cli.logs.json);
        assert_eq!(cli.light.serve, 200);
        assert_eq!(cli.light.peers, 8);
    }

    #[test]
    fn test_resolve_rejects_invalid() {
        let cli = Cli::parse_from(["lumen", "--light.priority-share", "150"]);
        assert!(cli.resolve().is_err());
    }

    #[test]
    fn test_resolve_reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lumen.toml");
        std::fs::write(&path, "[light]\nserve = 250\n").unwrap();

        let cli = Cli::parse_from(["lumen", "--config", path.to_str().unwrap()]);
        let config = cli.resolve().unwrap();
        assert_eq!(config.light.serve, 250);
        assert_eq!(config.light.peers, ServerArgs::default().peers);
    }
}
