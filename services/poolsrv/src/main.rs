//! Pool Bus Service (poolsrv)
//!
//! Listens to a pool/spa RS-485 bus, keeps the equipment model current and
//! drives virtual pump and chlorinator controllers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use common::logging::{self, LogConfig};
use poolsrv::config::DEFAULT_CONFIG_PATH;
use poolsrv::{PoolService, SerialConnector, ServiceConfig};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "poolsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Pool and spa RS-485 bus service",
    long_about = None
)]
pub struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH, env = "POOLSRV_CONFIG")]
    pub config: PathBuf,

    /// Log level or filter directive; overrides the config file
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - load and print the configuration, then exit
    #[arg(long)]
    pub validate: bool,
}

fn log_config(args: &Args, config: &ServiceConfig) -> LogConfig {
    let mut log = config.logging.clone();
    if let Some(level) = &args.log_level {
        log.level = level.clone();
    }
    if args.no_color {
        log.ansi = false;
    }
    log
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ServiceConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if args.validate {
        print!("{}", serde_yaml::to_string(&config).context("rendering configuration")?);
        return Ok(());
    }

    logging::init_with_config(&log_config(&args, &config)).context("initializing logging")?;
    info!("poolsrv {} starting on {}", env!("CARGO_PKG_VERSION"), config.serial.describe());

    let token = CancellationToken::new();
    let signals = common::shutdown::spawn_signal_listener(token.clone());

    let connector = Arc::new(SerialConnector::new(config.serial.clone()));
    let service = PoolService::new(config, token.clone())?;
    service.run(connector).await?;

    token.cancel();
    let _ = signals.await;
    info!("poolsrv stopped");
    Ok(())
}
