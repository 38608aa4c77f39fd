//! Manager configuration.
//!
//! Configuration for the secret manager, loaded from TOML:
//! - Secret generation parameters
//! - The role → action policy table
//! - Administrative operator principals
//! - The audit sink

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::access::{Principal, Role};
use crate::error::{Error, Result};
use crate::types::Action;

/// Secret generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SecretConfig {
    /// Random bytes per secret before encoding.
    pub length_bytes: usize,
    /// Draws attempted before generation is declared exhausted.
    pub max_generation_attempts: u32,
    /// Prefix prepended to every secret.
    pub prefix: String,
}

impl SecretConfig {
    /// Smallest accepted secret length in bytes.
    pub const MIN_LENGTH_BYTES: usize = 16;
    /// Largest accepted secret length in bytes.
    pub const MAX_LENGTH_BYTES: usize = 128;
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            length_bytes: 32,
            max_generation_attempts: 8,
            prefix: "kw_".to_string(),
        }
    }
}

/// A role as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleConfig {
    /// Role name.
    pub name: String,
    /// Actions the role grants.
    #[serde(default)]
    pub actions: BTreeSet<Action>,
}

/// An administrative principal that is not a registered service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Operator name, recorded as the audit actor.
    pub name: String,
    /// Roles held by the operator.
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

/// Where audit entries are made durable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    /// Structured `tracing` events.
    #[default]
    Tracing,
    /// Append-only JSON lines file.
    File,
    /// Discard (in-memory trail only).
    None,
}

/// Audit trail configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AuditConfig {
    /// Sink kind.
    pub sink: AuditSinkKind,
    /// File path for the `file` sink.
    pub path: Option<PathBuf>,
}

/// Main manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ManagerConfig {
    /// Secret generation.
    pub secret: SecretConfig,
    /// Role table. Empty means the built-in roles.
    pub roles: Vec<RoleConfig>,
    /// Administrative principals.
    pub operators: Vec<OperatorConfig>,
    /// Audit sink.
    pub audit: AuditConfig,
}

impl ManagerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
            reason: format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ),
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config {
            reason: format!("invalid TOML: {e}"),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config {
            reason: format!("failed to serialize config: {e}"),
        })
    }

    /// A starting configuration with the built-in roles and one admin operator.
    #[must_use]
    pub fn sample() -> Self {
        Self {
            secret: SecretConfig::default(),
            roles: Role::defaults()
                .into_iter()
                .map(|role| RoleConfig {
                    name: role.name,
                    actions: role.actions,
                })
                .collect(),
            operators: vec![OperatorConfig {
                name: "root".to_string(),
                roles: BTreeSet::from(["admin".to_string()]),
            }],
            audit: AuditConfig::default(),
        }
    }

    /// The role table this configuration describes.
    ///
    /// # Errors
    ///
    /// Returns an error if a role name is invalid.
    pub fn role_table(&self) -> Result<Vec<Role>> {
        if self.roles.is_empty() {
            return Ok(Role::defaults());
        }
        self.roles
            .iter()
            .map(|r| Role::new(r.name.clone(), r.actions.iter().copied()))
            .collect()
    }

    /// The configured operator with this name, as a principal.
    #[must_use]
    pub fn operator(&self, name: &str) -> Option<Principal> {
        self.operators
            .iter()
            .find(|op| op.name == name)
            .map(|op| Principal::operator(op.name.clone(), op.roles.iter().cloned()))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let config_error = |reason: String| Error::Config { reason };

        let len = self.secret.length_bytes;
        if !(SecretConfig::MIN_LENGTH_BYTES..=SecretConfig::MAX_LENGTH_BYTES).contains(&len) {
            return Err(config_error(format!(
                "secret.length_bytes must be between {} and {}, got {len}",
                SecretConfig::MIN_LENGTH_BYTES,
                SecretConfig::MAX_LENGTH_BYTES
            )));
        }

        if self.secret.max_generation_attempts == 0 {
            return Err(config_error(
                "secret.max_generation_attempts must be at least 1".to_string(),
            ));
        }

        if !self
            .secret
            .prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(config_error(
                "secret.prefix must contain only alphanumeric characters, hyphens, and underscores"
                    .to_string(),
            ));
        }

        let roles = self
            .role_table()
            .map_err(|e| config_error(format!("roles: {e}")))?;
        let mut role_names = HashSet::new();
        for role in &roles {
            if !role_names.insert(role.name.as_str()) {
                return Err(config_error(format!("duplicate role '{}'", role.name)));
            }
        }

        let mut operator_names = HashSet::new();
        for operator in &self.operators {
            if operator.name.is_empty() {
                return Err(config_error("operator name cannot be empty".to_string()));
            }
            if !operator_names.insert(operator.name.as_str()) {
                return Err(config_error(format!(
                    "duplicate operator '{}'",
                    operator.name
                )));
            }
            if let Some(unknown) = operator
                .roles
                .iter()
                .find(|r| !role_names.contains(r.as_str()))
            {
                return Err(config_error(format!(
                    "operator '{}' references unknown role '{unknown}'",
                    operator.name
                )));
            }
        }

        if self.audit.sink == AuditSinkKind::File && self.audit.path.is_none() {
            return Err(config_error(
                "audit.path is required when audit.sink = \"file\"".to_string(),
            ));
        }

        Ok(())
    }
}
