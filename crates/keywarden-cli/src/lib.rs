//! # keywarden-cli
//!
//! Operator console for the keywarden secret manager.
//!
//! Provides commands for:
//! - Writing a sample configuration
//! - Validating a configuration file
//! - Serving JSON-lines requests on stdin/stdout
//!
//! # Architecture
//!
//! `serve` builds a [`keywarden::SecretManager`] from the configuration and
//! hands each stdin line to the [`console::Console`]. Operators named in the
//! configuration act with their configured roles; services act with the
//! roles they were registered with after proving their current secret.
//!
//! ```text
//! ┌────────┐  JSON lines   ┌─────────┐        ┌───────────────┐
//! │ stdin  │──────────────►│ Console │───────►│ SecretManager │
//! └────────┘               └────┬────┘        └───────────────┘
//!                               │ JSON lines
//!                               ▼
//!                          ┌────────┐
//!                          │ stdout │
//!                          └────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod console;
pub mod error;

pub use cli::{Cli, Commands, LogFormat};
pub use console::{Console, ConsoleStats, Envelope, Request, Response};
pub use error::CliError;
