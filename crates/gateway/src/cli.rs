//! CLI surface for the `drover` binary.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use dr_domain::config::Config;

#[derive(Parser)]
#[command(name = "drover", version, about = "Durable multi-turn AI task orchestrator")]
pub struct Cli {
    /// Path to the TOML config file. Missing file = built-in defaults.
    #[arg(long, global = true, env = "DROVER_CONFIG", default_value = "drover.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the orchestrator daemon (default).
    Serve,
    /// Config inspection helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version and exit.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Parse and validate the config file.
    Validate,
    /// Print the effective config as TOML.
    Show,
}

pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file; using defaults");
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

pub fn validate(path: &Path) -> anyhow::Result<bool> {
    let config = load_config(path)?;
    match config.validate() {
        Ok(()) => {
            println!("config ok: {} model(s) in catalog", config.models.catalog.len());
            Ok(true)
        }
        Err(e) => {
            eprintln!("config invalid: {e}");
            Ok(false)
        }
    }
}

pub fn show(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let rendered = toml::to_string_pretty(&config).context("rendering config")?;
    println!("{rendered}");
    Ok(())
}
