//! # Keywarden
//!
//! A secret manager for fleets of services that provides:
//!
//! - **Unique secrets**: Every issued secret is drawn from OS entropy and
//!   never reissued, even after rotation or deregistration
//! - **Role-based access**: Administrative actions are gated by a
//!   role → action policy table that can change at runtime
//! - **Concurrent rotation**: Per-service locking, so rotating one service
//!   never blocks validation of another
//! - **Audit logging**: A totally ordered, append-only trail of every
//!   operation attempt, forwarded to a pluggable sink
//!
//! ## Example
//!
//! ```rust
//! use keywarden::{ManagerConfig, Principal, SecretManager, ServiceId};
//!
//! let manager = SecretManager::from_config(&ManagerConfig::sample()).expect("manager");
//! let admin = Principal::operator("root", ["admin"]);
//! let id = ServiceId::new("billing-api").expect("valid id");
//!
//! let secret = manager.register(&admin, &id, ["worker"]).expect("register");
//! assert!(manager.validate(&id, secret.expose()).expect("validate"));
//!
//! let rotated = manager.rotate(&admin, &id).expect("rotate");
//! assert!(!manager.validate(&id, secret.expose()).expect("validate"));
//! assert!(manager.validate(&id, rotated.expose()).expect("validate"));
//! ```
//!
//! ## Security Considerations
//!
//! - Only keyed BLAKE3 digests of secrets are stored; comparisons are constant-time
//! - Secret values use `zeroize` to clear memory on drop
//! - Debug output for secrets is redacted and audit entries never carry them

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod audit;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod manager;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use error::{Error, ErrorKind, Result};
pub use types::{
    Action, Actor, AuditAction, AuditEntry, AuditEvent, AuditTarget, Outcome, RotatedSecret,
    RotationFailure, RotationSummary, SecretValue, ServiceId, ServiceMetadata,
};

pub use access::{AccessController, Principal, Role};

pub use audit::{
    AuditFilter, AuditLog, AuditQuery, AuditSink, JsonLinesFileSink, NoopAuditSink,
    TracingAuditSink,
};

pub use clock::{Clock, SystemClock};

pub use config::{AuditSinkKind, ManagerConfig};

pub use crypto::{EntropySource, OsEntropy, SecretGenerator};

pub use manager::SecretManager;

pub use store::SecretStore;
