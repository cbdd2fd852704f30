// src/main.rs

mod aws;
mod cli;
mod config;
mod errors;
mod logging;
mod state;
mod template;
mod users;
mod wizard;

use anyhow::Result;
use clap::Parser;

use cli::Cli;
use config::Config;

use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = Cli::parse();

    // Configuration comes first so logging can honour [logging]; failures are
    // reported once the subscriber is up.
    let loaded = Config::load(cli_args.config.as_deref());
    let (config, load_error) = match loaded {
        Ok(cfg) => (cfg, None),
        Err(e) => {
            if cli_args.config.is_some() {
                eprintln!("Failed to load configuration: {:#}", e);
                return Err(e);
            }
            (Config::default(), Some(e))
        }
    };

    let _log_guard = logging::init(
        &config.logging,
        config.log_dir_path().as_deref(),
        cli_args.log_level.map(|l| l.as_directive()),
    )?;

    info!("Starting clusterwiz...");
    if let Some(e) = load_error {
        warn!("Proceeding with default configuration: {:#}", e);
    }
    debug!("Loaded app config: {:?}", config);

    let store = cli::bootstrap_state(&config).await;
    cli::handle_command(cli_args.command, &config, store).await?;

    info!("clusterwiz finished.");
    Ok(())
}
