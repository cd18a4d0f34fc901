use clap::Parser;
use miette::{Context, IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod keys;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_env_filter(EnvFilter::from_env("QUIRE_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let config_text = tokio::fs::read_to_string(&args.config)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read config {}", args.config.display()))?;
    let base = args
        .config
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_default();
    let config = Config::from_kdl(&config_text)?.relative_to(&base);

    commands::run(&config, args.command).await
}
