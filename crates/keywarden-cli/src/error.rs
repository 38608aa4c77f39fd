//! CLI error types.

use std::path::PathBuf;

use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded or was rejected.
    #[error("{}: {source}", path.display())]
    Config {
        /// The configuration file.
        path: PathBuf,
        /// What went wrong.
        #[source]
        source: keywarden::Error,
    },

    /// The manager could not be started.
    #[error("startup failed: {0}")]
    Startup(#[source] keywarden::Error),

    /// Refused to overwrite an existing file.
    #[error("file already exists: {} (use --force to overwrite)", .0.display())]
    FileExists(PathBuf),

    /// A response could not be encoded.
    #[error("format error: {0}")]
    Format(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
