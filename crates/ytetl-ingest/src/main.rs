//! ytetl - YouTube search to SQL batch pipeline

use std::process;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use ytetl_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use ytetl_ingest::{commands, Cli};

/// Console logging at info, overlaid with `YTETL_LOG_*`; `--verbose` wins.
fn log_config(verbose: bool) -> anyhow::Result<LogConfig> {
    let mut config = LogConfig::builder()
        .level(LogLevel::Info)
        .output(LogOutput::Console)
        .log_file_prefix("ytetl")
        .build()
        .merge_env()
        .context("Invalid YTETL_LOG_* setting")?;

    if verbose {
        config.level = LogLevel::Debug;
    }
    Ok(config)
}

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let _guard = match log_config(cli.verbose).and_then(|config| init_logging(&config)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {:#}", e);
            None
        },
    };

    if let Err(e) = commands::execute(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    info!("Done");
}
