//! Configuration subcommands.

use std::path::Path;

use keywarden::{ManagerConfig, SecretManager};
use tracing::info;

use crate::error::CliError;

/// Writes the sample configuration to `output`.
///
/// # Errors
///
/// Returns an error if the file exists and `force` is not set, or if
/// writing fails.
pub fn init_config(output: &Path, force: bool) -> Result<(), CliError> {
    if output.exists() && !force {
        return Err(CliError::FileExists(output.to_path_buf()));
    }

    let text = ManagerConfig::sample()
        .to_toml()
        .map_err(|source| CliError::Config {
            path: output.to_path_buf(),
            source,
        })?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, text)?;

    info!(path = %output.display(), "wrote sample configuration");
    Ok(())
}

/// Loads and validates the configuration at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or validated.
pub fn load_config(path: &Path) -> Result<ManagerConfig, CliError> {
    ManagerConfig::from_file(path).map_err(|source| CliError::Config {
        path: path.to_path_buf(),
        source,
    })
}

/// Builds the manager a configuration describes.
///
/// # Errors
///
/// Returns an error if the audit sink cannot be opened or the entropy
/// source fails.
pub fn start_manager(config: &ManagerConfig) -> Result<SecretManager, CliError> {
    SecretManager::from_config(config).map_err(CliError::Startup)
}

/// One-line summary of a loaded configuration.
#[must_use]
pub fn describe_config(path: &Path, config: &ManagerConfig) -> String {
    let roles = config.role_table().map_or(0, |roles| roles.len());
    format!(
        "{}: ok ({roles} roles, {} operators, {:?} audit sink)",
        path.display(),
        config.operators.len(),
        config.audit.sink
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("conf").join("keywarden.toml");

        init_config(&path, false).expect("init");
        let config = load_config(&path).expect("load");

        assert_eq!(config, ManagerConfig::sample());
        let summary = describe_config(&path, &config);
        assert!(summary.ends_with("ok (4 roles, 1 operators, Tracing audit sink)"));
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("keywarden.toml");
        std::fs::write(&path, "# mine\n").expect("write");

        let err = init_config(&path, false).expect_err("exists");
        assert!(matches!(err, CliError::FileExists(_)));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "# mine\n");

        init_config(&path, true).expect("forced");
        assert!(load_config(&path).is_ok());
    }

    #[test]
    fn start_manager_reports_unopenable_sink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = ManagerConfig::sample();
        config.audit.sink = keywarden::AuditSinkKind::File;
        config.audit.path = Some(dir.path().join("missing-dir").join("audit.jsonl"));

        let err = start_manager(&config).expect_err("parent directory is missing");
        assert!(matches!(err, CliError::Startup(_)));
    }

    #[test]
    fn load_reports_path_on_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[secret]\nlength_bytes = 1\n").expect("write");

        let err = load_config(&path).expect_err("invalid");
        assert!(err.to_string().contains("broken.toml"));
        assert!(err.to_string().contains("length_bytes"));
    }
}
