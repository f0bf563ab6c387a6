//! pointledger-sweeper: expiration sweeper process
//!
//! Retires lapsed point lots and logs a weekly look-ahead of points about to
//! expire.
//!
//! ## Usage
//! ```text
//! pointledger-sweeper [--config <path>]          # run the scheduler until Ctrl+C
//! pointledger-sweeper [--config <path>] --once   # sweep once, print the report as JSON
//! ```
//!
//! ## Configuration
//! - POINTLEDGER_CONFIG: config file path
//! - POINTLEDGER__STORAGE__PATH etc.: overrides for any config key
//! - POINTLEDGER_LOG: log filter (default: info,sqlx=warn)

use tracing::{error, info};

use pointledger::config::Config;
use pointledger::utils::bootstrap::{init_tracing, parse_config_path};
use pointledger::PointLedger;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let ledger = PointLedger::from_config(&config).await.map_err(|e| {
        error!("Failed to initialise ledger: {}", e);
        e
    })?;

    if once {
        let outcome = ledger.sweep().await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let Some(handle) = ledger.spawn_scheduler() else {
        info!("sweeper.enabled is false, nothing to do");
        return Ok(());
    };

    info!("sweeper running, press Ctrl+C to exit");
    tokio::signal::ctrl_c().await?;
    handle.abort();

    Ok(())
}
