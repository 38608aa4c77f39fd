//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Keywarden - secret lifecycle manager for distributed services.
#[derive(Parser, Debug, Clone)]
#[command(name = "keywarden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format (logs go to stderr).
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Log format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Write a sample configuration file.
    InitConfig {
        /// Path to write config.
        #[arg(short, long, default_value = "keywarden.toml")]
        output: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Load and validate a configuration file.
    CheckConfig {
        /// Path to config file.
        #[arg(short, long, env = "KEYWARDEN_CONFIG", default_value = "keywarden.toml")]
        config: PathBuf,
    },

    /// Run the request console.
    ///
    /// Reads one JSON request per line from stdin and writes one JSON
    /// response per line to stdout until end of input.
    Serve {
        /// Path to config file.
        #[arg(short, long, env = "KEYWARDEN_CONFIG", default_value = "keywarden.toml")]
        config: PathBuf,
    },
}
