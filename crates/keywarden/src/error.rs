//! Error types for the secret manager.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while managing service secrets.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid service identifier format.
    #[error("invalid service id: {reason}")]
    InvalidServiceId {
        /// The reason the identifier is invalid.
        reason: String,
    },

    /// Invalid role name.
    #[error("invalid role: {reason}")]
    InvalidRole {
        /// The reason the role is invalid.
        reason: String,
    },

    /// A referenced role is not defined in the policy table.
    #[error("unknown role: {name}")]
    UnknownRole {
        /// The role name that was not found.
        name: String,
    },

    /// The requester lacks the role grant for the action.
    #[error("permission denied: {reason}")]
    PermissionDenied {
        /// The reason permission was denied.
        reason: String,
    },

    /// The service is not registered.
    #[error("service not found: {id}")]
    NotFound {
        /// The identifier of the service that was not found.
        id: String,
    },

    /// The service is already registered.
    #[error("service already exists: {id}")]
    AlreadyExists {
        /// The identifier of the service that already exists.
        id: String,
    },

    /// Every generation attempt produced a previously issued secret.
    #[error("secret generation exhausted after {attempts} attempts")]
    GenerationExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The random source failed.
    #[error("entropy source failed: {reason}")]
    Entropy {
        /// The reason the source failed.
        reason: String,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {reason}")]
    Config {
        /// The reason the configuration was rejected.
        reason: String,
    },

    /// An audit sink could not append an entry.
    #[error("audit sink '{sink}' failed: {reason}")]
    AuditSink {
        /// Name of the failing sink.
        sink: String,
        /// The reason the append failed.
        reason: String,
    },
}

impl Error {
    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidServiceId { .. } | Self::InvalidRole { .. } => ErrorKind::Invalid,
            Self::UnknownRole { .. } => ErrorKind::UnknownRole,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::GenerationExhausted { .. } | Self::Entropy { .. } => {
                ErrorKind::GenerationExhausted
            }
            Self::Config { .. } | Self::AuditSink { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true for errors the caller cannot act on.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::GenerationExhausted | ErrorKind::Internal
        )
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input.
    Invalid,
    /// Role not defined.
    UnknownRole,
    /// Requester not permitted.
    PermissionDenied,
    /// Service not registered.
    NotFound,
    /// Service already registered.
    AlreadyExists,
    /// Secret generation failed.
    GenerationExhausted,
    /// Any other internal failure.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Invalid => "invalid",
            Self::UnknownRole => "unknown_role",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::GenerationExhausted => "generation_exhausted",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Result type alias for secret manager operations.
pub type Result<T> = std::result::Result<T, Error>;
