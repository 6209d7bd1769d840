//! lacd daemon entry point.
//!
//! Loads the configuration, builds the engine over the configured links,
//! binds the configured ports and runs until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use lacd::config::{LacdConfig, DEFAULT_CONFIG_PATH};
use lacd::{EngineConfig, LacDaemon, LacEngine, StaticLinkDriver, LACD_VERSION};

/// IEEE 802.3ad link aggregation control daemon
#[derive(Parser, Debug)]
#[command(name = "lacd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to /etc/lacd/lacd.toml when present)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

/// Initialize tracing. RUST_LOG takes precedence over `log_level`.
fn init_logging(log_level: &str, json: bool) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().with_target(true).json())
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(true).compact())
            .try_init()?;
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<LacdConfig> {
    match path {
        Some(path) => LacdConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => LacdConfig::load(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("loading configuration from {}", DEFAULT_CONFIG_PATH)),
        None => {
            warn!("no configuration file, using defaults");
            Ok(LacdConfig::default())
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    if args.check_config {
        info!("configuration is valid");
        return Ok(());
    }

    let driver = Arc::new(StaticLinkDriver::from_config(&config.links));
    let mut engine = LacEngine::new(EngineConfig::from(&config), driver)
        .context("creating LACP engine")?;
    for binding in &config.ports {
        let port_no = engine
            .apply_binding(binding)
            .with_context(|| format!("binding {} to {}", binding.link, binding.aggregator))?;
        info!(port = port_no, link = %binding.link, aggregator = %binding.aggregator, "port bound");
    }

    let handle = LacDaemon::spawn(engine, &config.timing);
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    handle.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(&args.log_level, args.json_logs) {
        eprintln!("lacd: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!(
        "--- Starting lacd {}.{} ---",
        LACD_VERSION >> 16,
        LACD_VERSION & 0xffff
    );

    match run(args).await {
        Ok(()) => {
            info!("lacd exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("lacd error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
