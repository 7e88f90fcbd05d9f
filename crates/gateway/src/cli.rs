//! Command-line interface for the `palisade` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use pal_domain::config::{Config, ConfigSeverity};

#[derive(Parser)]
#[command(name = "palisade", about = "Conversational assistant safety gateway")]
pub struct Cli {
    /// Path to the TOML config file (defaults apply when absent).
    #[arg(long, global = true, default_value = "palisade.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the gateway server (the default).
    Serve,
    /// Config inspection helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and exit non-zero on errors.
    Validate,
    /// Print the effective config (after env overrides) as TOML.
    Show,
}

/// Load the config file and apply environment overrides.
pub fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    let config = Config::load(path)?;
    Ok(config)
}

/// Print validation issues; returns false when any is an error.
pub fn validate(config: &Config) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("config OK");
        return true;
    }
    let mut valid = true;
    for issue in issues {
        match issue.severity {
            ConfigSeverity::Warning => println!("warning: {issue}"),
            ConfigSeverity::Error => {
                println!("error: {issue}");
                valid = false;
            }
        }
    }
    valid
}

pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}
