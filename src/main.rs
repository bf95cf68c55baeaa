use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use qlsr::runtime::config::load_config;
use qlsr::runtime::daemon::Daemon;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "qlsrd")]
#[command(about = "QoS-aware link-state routing daemon")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long)]
    config: PathBuf,
    /// DEBUG, INFO, WARNING, ERROR or CRITICAL.
    #[arg(long, default_value = "INFO")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let cfg = load_config(&args.config)?;
    let daemon = Arc::new(Daemon::new(cfg)?);
    daemon.run()?;
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let level = parse_level(level)?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(true)
        .compact()
        .init();
    Ok(())
}

fn parse_level(raw: &str) -> Result<Level> {
    Ok(match raw.to_ascii_uppercase().as_str() {
        "DEBUG" => Level::DEBUG,
        "INFO" => Level::INFO,
        "WARNING" | "WARN" => Level::WARN,
        "ERROR" => Level::ERROR,
        "CRITICAL" => Level::ERROR,
        other => bail!("unsupported log level: {other}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_map_onto_tracing() {
        assert_eq!(parse_level("debug").expect("level"), Level::DEBUG);
        assert_eq!(parse_level("INFO").expect("level"), Level::INFO);
        assert_eq!(parse_level("Warning").expect("level"), Level::WARN);
        assert_eq!(parse_level("CRITICAL").expect("level"), Level::ERROR);
        assert!(parse_level("verbose").is_err());
    }
}
