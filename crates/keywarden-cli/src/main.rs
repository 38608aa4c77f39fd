//! Keywarden binary entrypoint.

use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use keywarden_cli::cli::{Cli, Commands, LogFormat};
use keywarden_cli::commands::{describe_config, init_config, load_config, start_manager};
use keywarden_cli::Console;

const DEFAULT_FILTER: &str = "keywarden=info,keywarden_cli=info";

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::InitConfig { output, force } => {
            init_config(&output, force)?;
            println!("Wrote sample configuration to {}", output.display());
        }
        Commands::CheckConfig { config } => {
            let loaded = load_config(&config)?;
            println!("{}", describe_config(&config, &loaded));
        }
        Commands::Serve { config } => {
            let loaded = load_config(&config)?;
            let manager = start_manager(&loaded).context("failed to start secret manager")?;
            info!(config = %config.display(), "serving requests on stdin");

            let console = Console::new(manager, loaded);
            console
                .run(io::stdin().lock(), io::stdout().lock())
                .context("console I/O failed")?;

            let sink_failures = console.manager().audit_log().sink_failures();
            if sink_failures > 0 {
                error!(sink_failures, "audit sink failed during session");
            }
        }
    }
    Ok(())
}
