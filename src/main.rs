use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use cmppd::bootstrap::Gateway;
use cmppd::config::Config;
use cmppd::telemetry::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(name = "cmppd")]
#[command(author, version, about = "CMPP 3.0 SMS gateway")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Validate config and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first (to get log settings)
    let config = Config::load(&args.config)?;

    let tracing_config = TracingConfig {
        log_level: if config.debug { "debug" } else { "info" }.to_string(),
        json_logs: config.json_logs,
    };
    init_tracing(&tracing_config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "starting cmppd"
    );

    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }

    Gateway::new(config)?.run().await
}
