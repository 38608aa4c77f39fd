//! Core types for the secret manager.
//!
//! This module defines the fundamental types used throughout the crate:
//! - [`ServiceId`]: A validated identifier for a registered service
//! - [`SecretValue`]: A plaintext secret handed to the caller, zeroized on drop
//! - [`Action`]: The permission kinds a role can grant
//! - [`ServiceMetadata`]: What the store reveals about a service (never the secret)
//! - [`AuditEvent`] / [`AuditEntry`]: Records of operation attempts
//! - [`RotationSummary`]: The structured result of a bulk rotation

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, ErrorKind, Result};

/// A validated identifier for a service.
///
/// Service IDs must:
/// - Be between 1 and 253 characters
/// - Contain only lowercase alphanumeric characters, hyphens, underscores, and periods
/// - Start with an alphanumeric character
/// - Not end with a hyphen or period
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceId(String);

impl ServiceId {
    /// Maximum length of a service identifier.
    pub const MAX_LENGTH: usize = 253;

    /// Creates a new `ServiceId` after validating the input.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is invalid.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidServiceId {
            reason: reason.to_string(),
        };

        let (Some(first), Some(last)) = (id.chars().next(), id.chars().last()) else {
            return Err(invalid("identifier cannot be empty"));
        };

        if id.len() > Self::MAX_LENGTH {
            return Err(Error::InvalidServiceId {
                reason: format!(
                    "identifier exceeds maximum length of {} characters",
                    Self::MAX_LENGTH
                ),
            });
        }

        if !first.is_ascii_alphanumeric() {
            return Err(invalid(
                "identifier must start with an alphanumeric character",
            ));
        }

        if last == '-' || last == '.' {
            return Err(invalid("identifier cannot end with a hyphen or period"));
        }

        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')))
        {
            return Err(Error::InvalidServiceId {
                reason: format!(
                    "identifier contains invalid character '{c}'; only lowercase alphanumeric, hyphens, underscores, and periods are allowed"
                ),
            });
        }

        Ok(())
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ServiceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ServiceId> for String {
    fn from(id: ServiceId) -> Self {
        id.0
    }
}

impl AsRef<str> for ServiceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A plaintext secret, returned to the caller only at registration and rotation.
///
/// The memory is cleared when the value is dropped, debug output is
/// redacted, and equality is evaluated in constant time.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue {
    value: String,
}

impl SecretValue {
    /// Wraps an existing secret string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Returns the plaintext secret.
    ///
    /// Callers must not log the returned string.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Returns the length of the secret in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// Returns true if the secret is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("len", &self.value.len())
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for SecretValue {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.value.as_bytes().ct_eq(other.value.as_bytes()).into()
    }
}

impl Eq for SecretValue {}

/// Permission kinds a role may grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Register a new service.
    Register,
    /// Remove a service.
    Deregister,
    /// Read service metadata (never the secret).
    ReadSecretMetadata,
    /// Rotate a single service's secret.
    Rotate,
    /// Rotate every registered service's secret.
    RotateAll,
    /// Query the audit log.
    ViewAudit,
}

impl Action {
    /// Every action kind.
    pub const ALL: [Self; 6] = [
        Self::Register,
        Self::Deregister,
        Self::ReadSecretMetadata,
        Self::Rotate,
        Self::RotateAll,
        Self::ViewAudit,
    ];

    /// Returns the kebab-case name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Deregister => "deregister",
            Self::ReadSecretMetadata => "read-secret-metadata",
            Self::Rotate => "rotate",
            Self::RotateAll => "rotate-all",
            Self::ViewAudit => "view-audit",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the store reveals about a registered service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    /// The service identity.
    pub id: ServiceId,
    /// Roles assigned to the service.
    pub roles: BTreeSet<String>,
    /// When the service was registered.
    pub registered_at: DateTime<Utc>,
    /// When the secret was last rotated, if ever.
    pub rotated_at: Option<DateTime<Utc>>,
    /// Secret generation, starting at 1 and bumped on every rotation.
    pub generation: u64,
}

/// Who performed an audited operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Actor {
    /// A configured administrative principal.
    Operator(String),
    /// A registered service.
    Service(ServiceId),
    /// The manager itself (configuration changes).
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operator(name) => write!(f, "operator:{name}"),
            Self::Service(id) => write!(f, "service:{id}"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Operation kinds recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Service registration.
    Register,
    /// Service removal.
    Deregister,
    /// Metadata read for one service.
    Describe,
    /// Listing of registered services.
    ListServices,
    /// Secret validation.
    Validate,
    /// Single-service rotation.
    Rotate,
    /// Bulk rotation.
    RotateAll,
    /// Audit log query.
    QueryAudit,
    /// Role added or redefined.
    RoleDefined,
    /// Role removed.
    RoleRemoved,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Register => "register",
            Self::Deregister => "deregister",
            Self::Describe => "describe",
            Self::ListServices => "list_services",
            Self::Validate => "validate",
            Self::Rotate => "rotate",
            Self::RotateAll => "rotate_all",
            Self::QueryAudit => "query_audit",
            Self::RoleDefined => "role_defined",
            Self::RoleRemoved => "role_removed",
        };
        f.write_str(s)
    }
}

/// What an audited operation was applied to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum AuditTarget {
    /// A single service.
    Service(ServiceId),
    /// Every registered service.
    All,
    /// A role in the policy table.
    Role(String),
}

impl fmt::Display for AuditTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(id) => write!(f, "{id}"),
            Self::All => write!(f, "all"),
            Self::Role(name) => write!(f, "role:{name}"),
        }
    }
}

/// How an audited operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The operation completed.
    Success,
    /// The requester was not permitted.
    Denied,
    /// The operation failed.
    Error,
    /// A validation attempt presented the wrong secret.
    Mismatch,
    /// A bulk operation completed for some services only.
    Partial,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Denied => "denied",
            Self::Error => "error",
            Self::Mismatch => "mismatch",
            Self::Partial => "partial",
        };
        f.write_str(s)
    }
}

/// An operation attempt awaiting a place in the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    /// Who attempted the operation.
    pub actor: Actor,
    /// The operation kind.
    pub action: AuditAction,
    /// What the operation targeted.
    pub target: AuditTarget,
    /// How it ended.
    pub outcome: Outcome,
    /// Optional free-form detail. Never carries a secret value.
    pub detail: Option<String>,
}

impl AuditEvent {
    /// Creates a new event without detail.
    #[must_use]
    pub fn new(actor: Actor, action: AuditAction, target: AuditTarget, outcome: Outcome) -> Self {
        Self {
            actor,
            action,
            target,
            outcome,
            detail: None,
        }
    }

    /// Attaches a detail message.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// An immutable, timestamped audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique identifier for this entry.
    pub id: Uuid,
    /// Position in the log, starting at 1.
    pub sequence: u64,
    /// When the entry was appended. Non-decreasing along `sequence`.
    pub timestamp: DateTime<Utc>,
    /// Who attempted the operation.
    pub actor: Actor,
    /// The operation kind.
    pub action: AuditAction,
    /// What the operation targeted.
    pub target: AuditTarget,
    /// How it ended.
    pub outcome: Outcome,
    /// Optional detail.
    pub detail: Option<String>,
}

impl AuditEntry {
    /// Stamps an event with its log position.
    #[must_use]
    pub fn stamp(event: AuditEvent, sequence: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            timestamp,
            actor: event.actor,
            action: event.action,
            target: event.target,
            outcome: event.outcome,
            detail: event.detail,
        }
    }
}

/// A service whose secret was replaced during a bulk rotation.
#[derive(Debug, Clone)]
pub struct RotatedSecret {
    /// The rotated service.
    pub service_id: ServiceId,
    /// Its new secret.
    pub secret: SecretValue,
}

/// A service a bulk rotation could not rotate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationFailure {
    /// The service that failed.
    pub service_id: ServiceId,
    /// Why it failed.
    pub kind: ErrorKind,
}

/// Result of rotating every service in a snapshot.
///
/// Rotation is atomic per service but not across services; a non-empty
/// `failed` list is an expected result, not an error.
#[derive(Debug, Clone, Default)]
pub struct RotationSummary {
    /// Services rotated, with their new secrets.
    pub rotated: Vec<RotatedSecret>,
    /// Services that could not be rotated.
    pub failed: Vec<RotationFailure>,
}

impl RotationSummary {
    /// Returns true if at least one service failed to rotate.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Returns the identifiers of the rotated services.
    #[must_use]
    pub fn rotated_ids(&self) -> Vec<&ServiceId> {
        self.rotated.iter().map(|r| &r.service_id).collect()
    }

    /// Returns the outcome recorded for the bulk operation.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        if self.is_partial() {
            Outcome::Partial
        } else {
            Outcome::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("svc-a" ; "simple")]
    #[test_case("payments.api_v2" ; "dots and underscores")]
    #[test_case("a" ; "single char")]
    fn service_id_valid(id: &str) {
        let parsed = ServiceId::new(id).expect("valid id");
        assert_eq!(parsed.as_str(), id);
    }

    #[test_case("" ; "empty")]
    #[test_case("-svc" ; "leading hyphen")]
    #[test_case("svc-" ; "trailing hyphen")]
    #[test_case("svc." ; "trailing period")]
    #[test_case("Svc" ; "uppercase")]
    #[test_case("svc a" ; "space")]
    fn service_id_invalid(id: &str) {
        let err = ServiceId::new(id).expect_err("should be rejected");
        assert!(matches!(err, Error::InvalidServiceId { .. }));
    }

    #[test]
    fn service_id_too_long() {
        let id = "a".repeat(ServiceId::MAX_LENGTH + 1);
        assert!(ServiceId::new(id).is_err());
        let id = "a".repeat(ServiceId::MAX_LENGTH);
        assert!(ServiceId::new(id).is_ok());
    }

    #[test]
    fn service_id_serde_validates() {
        let ok: ServiceId = serde_json::from_str("\"svc-a\"").expect("valid");
        assert_eq!(ok.as_str(), "svc-a");
        assert!(serde_json::from_str::<ServiceId>("\"BAD ID\"").is_err());
    }

    #[test]
    fn secret_value_debug_is_redacted() {
        let secret = SecretValue::new("kw_supersecret");
        let debug = format!("{secret:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("supersecret"));
    }

    #[test]
    fn secret_value_equality() {
        assert_eq!(SecretValue::new("abc"), SecretValue::new("abc"));
        assert_ne!(SecretValue::new("abc"), SecretValue::new("abd"));
        assert_ne!(SecretValue::new("abc"), SecretValue::new("abcd"));
    }

    #[test]
    fn action_serde_is_kebab_case() {
        let json = serde_json::to_string(&Action::ReadSecretMetadata).expect("serialize");
        assert_eq!(json, "\"read-secret-metadata\"");
        let parsed: Action = serde_json::from_str("\"rotate-all\"").expect("parse");
        assert_eq!(parsed, Action::RotateAll);
        for action in Action::ALL {
            assert_eq!(
                serde_json::to_string(&action).expect("serialize"),
                format!("\"{action}\"")
            );
        }
    }

    #[test]
    fn actor_display() {
        assert_eq!(Actor::Operator("root".into()).to_string(), "operator:root");
        let svc = ServiceId::new("svc-a").expect("valid");
        assert_eq!(Actor::Service(svc).to_string(), "service:svc-a");
        assert_eq!(Actor::System.to_string(), "system");
    }

    #[test]
    fn audit_target_display() {
        assert_eq!(AuditTarget::All.to_string(), "all");
        assert_eq!(AuditTarget::Role("admin".into()).to_string(), "role:admin");
    }

    #[test]
    fn rotation_summary_outcome() {
        let mut summary = RotationSummary::default();
        assert_eq!(summary.outcome(), Outcome::Success);
        summary.failed.push(RotationFailure {
            service_id: ServiceId::new("gone").expect("valid"),
            kind: ErrorKind::NotFound,
        });
        assert!(summary.is_partial());
        assert_eq!(summary.outcome(), Outcome::Partial);
    }

    #[test]
    fn audit_entry_stamp_keeps_event_fields() {
        let event = AuditEvent::new(
            Actor::System,
            AuditAction::RoleDefined,
            AuditTarget::Role("ops".into()),
            Outcome::Success,
        )
        .with_detail("actions: rotate");
        let now = Utc::now();
        let entry = AuditEntry::stamp(event, 7, now);
        assert_eq!(entry.sequence, 7);
        assert_eq!(entry.timestamp, now);
        assert_eq!(entry.detail.as_deref(), Some("actions: rotate"));
        assert_eq!(entry.outcome, Outcome::Success);
    }
}
