//! widget-host: serve widget objects over stdin/stdout.
//!
//! Reads one `CommMessage` JSON frame per line from stdin and writes every
//! outbound frame to stdout. Logs go to stderr.

use anyhow::Result;
use clap::Parser;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;
use widget_host::HostConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config = HostConfig::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose)
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting widget-host");
    info!(
        "Opening {} widget(s), remote opens {}",
        config.widgets,
        if config.accept_remote { "accepted" } else { "refused" }
    );

    widget_host::run(&config, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;

    info!("Shutting down");
    Ok(())
}
