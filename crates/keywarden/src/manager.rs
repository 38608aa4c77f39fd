//! Request orchestration.
//!
//! Every administrative request follows the same protocol: resolve the
//! requester's roles, check the action against the policy table (a denial
//! is audited and nothing else happens), run the store operation, and
//! audit its outcome. Self-validation by a service skips the permission
//! check but is audited like every other operation.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::access::{AccessController, Principal, Role};
use crate::audit::{
    AuditFilter, AuditLog, AuditQuery, AuditSink, JsonLinesFileSink, NoopAuditSink,
    TracingAuditSink,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{AuditSinkKind, ManagerConfig};
use crate::crypto::{OsEntropy, SecretGenerator};
use crate::error::{Error, Result};
use crate::store::SecretStore;
use crate::types::{
    Action, Actor, AuditAction, AuditEvent, AuditTarget, Outcome, RotatedSecret,
    RotationFailure, RotationSummary, SecretValue, ServiceId, ServiceMetadata,
};

/// The secret lifecycle engine.
///
/// Construct one per process and share it (for example behind an `Arc`);
/// every method takes `&self` and is safe to call concurrently.
pub struct SecretManager {
    store: SecretStore,
    access: AccessController,
    audit: AuditLog,
}

impl SecretManager {
    /// Assembles a manager from its parts.
    #[must_use]
    pub fn new(store: SecretStore, access: AccessController, audit: AuditLog) -> Self {
        Self {
            store,
            access,
            audit,
        }
    }

    /// Builds a manager from configuration, using the system clock and
    /// operating-system entropy.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the audit sink
    /// cannot be opened, or the entropy source fails.
    pub fn from_config(config: &ManagerConfig) -> Result<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let sink: Box<dyn AuditSink> = match config.audit.sink {
            AuditSinkKind::Tracing => Box::new(TracingAuditSink::new()),
            AuditSinkKind::None => Box::new(NoopAuditSink),
            AuditSinkKind::File => {
                let path = config.audit.path.as_ref().ok_or_else(|| Error::Config {
                    reason: "audit.path is required for the file sink".to_string(),
                })?;
                let sink = JsonLinesFileSink::open(path)?;
                info!(path = %sink.path().display(), "audit entries appended to file");
                Box::new(sink)
            }
        };

        let generator = SecretGenerator::new(
            Box::new(OsEntropy),
            config.secret.length_bytes,
            config.secret.prefix.clone(),
        );
        let store = SecretStore::new(
            generator,
            config.secret.max_generation_attempts,
            Arc::clone(&clock),
        )?;
        let access = AccessController::with_roles(config.role_table()?);
        let audit = AuditLog::new(sink, clock);

        info!(
            roles = access.roles().len(),
            operators = config.operators.len(),
            sink = ?config.audit.sink,
            "secret manager initialized"
        );

        Ok(Self::new(store, access, audit))
    }

    /// Returns the underlying store.
    #[must_use]
    pub const fn store(&self) -> &SecretStore {
        &self.store
    }

    /// Returns the access controller.
    #[must_use]
    pub const fn access(&self) -> &AccessController {
        &self.access
    }

    /// Returns the audit log.
    #[must_use]
    pub const fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Registers a service and returns its first secret.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The requester lacks `register`
    /// - A role is not defined
    /// - The service already exists
    /// - No unique secret could be generated
    pub fn register<I, S>(
        &self,
        requester: &Principal,
        service_id: &ServiceId,
        roles: I,
    ) -> Result<SecretValue>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let target = AuditTarget::Service(service_id.clone());
        self.authorize(requester, Action::Register, AuditAction::Register, &target)?;

        let roles: BTreeSet<String> = roles.into_iter().map(Into::into).collect();
        if let Some(unknown) = self.access.first_unknown(&roles) {
            let err = Error::UnknownRole {
                name: unknown.to_string(),
            };
            return Err(self.fail(requester, AuditAction::Register, target, err));
        }

        let role_list = roles.iter().cloned().collect::<Vec<_>>().join(",");
        match self.store.register(service_id, roles) {
            Ok(secret) => {
                self.succeed(
                    requester,
                    AuditAction::Register,
                    target,
                    Some(format!("roles: [{role_list}]")),
                );
                info!(service_id = %service_id, actor = %requester, roles = %role_list, "registered service");
                Ok(secret)
            }
            Err(err) => Err(self.fail(requester, AuditAction::Register, target, err)),
        }
    }

    /// Removes a service and its secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the requester lacks `deregister` or the service
    /// does not exist.
    pub fn deregister(&self, requester: &Principal, service_id: &ServiceId) -> Result<()> {
        let target = AuditTarget::Service(service_id.clone());
        self.authorize(requester, Action::Deregister, AuditAction::Deregister, &target)?;

        match self.store.remove(service_id) {
            Ok(()) => {
                self.succeed(requester, AuditAction::Deregister, target, None);
                info!(service_id = %service_id, actor = %requester, "deregistered service");
                Ok(())
            }
            Err(err) => Err(self.fail(requester, AuditAction::Deregister, target, err)),
        }
    }

    /// Checks a service's own secret.
    ///
    /// This is the authentication path: no role is required. Every attempt
    /// is audited. A mismatch is `Ok(false)` with outcome `Mismatch`; an
    /// unknown service is `NotFound` with outcome `Error`.
    ///
    /// # Errors
    ///
    /// Returns an error if the service does not exist.
    pub fn validate(&self, service_id: &ServiceId, supplied: &str) -> Result<bool> {
        let actor = Actor::Service(service_id.clone());
        let target = AuditTarget::Service(service_id.clone());

        match self.store.validate(service_id, supplied) {
            Ok(true) => {
                self.audit.record(AuditEvent::new(
                    actor,
                    AuditAction::Validate,
                    target,
                    Outcome::Success,
                ));
                debug!(service_id = %service_id, "secret validated");
                Ok(true)
            }
            Ok(false) => {
                self.audit.record(
                    AuditEvent::new(actor, AuditAction::Validate, target, Outcome::Mismatch)
                        .with_detail("supplied secret does not match"),
                );
                warn!(service_id = %service_id, "secret validation failed");
                Ok(false)
            }
            Err(err) => {
                self.audit.record(
                    AuditEvent::new(actor, AuditAction::Validate, target, Outcome::Error)
                        .with_detail(format!("{}: {err}", err.kind())),
                );
                warn!(service_id = %service_id, error = %err, "validation against unknown service");
                Err(err)
            }
        }
    }

    /// Authenticates a service and returns a principal acting as it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown service and `PermissionDenied`
    /// for a wrong secret.
    pub fn authenticate(&self, service_id: &ServiceId, supplied: &str) -> Result<Principal> {
        if self.validate(service_id, supplied)? {
            Ok(Principal::service(service_id.clone()))
        } else {
            Err(Error::PermissionDenied {
                reason: format!("authentication failed for service '{service_id}'"),
            })
        }
    }

    /// Replaces a service's secret and returns the new one.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The requester lacks `rotate`
    /// - The service does not exist
    /// - No unique secret could be generated
    pub fn rotate(&self, requester: &Principal, service_id: &ServiceId) -> Result<SecretValue> {
        let target = AuditTarget::Service(service_id.clone());
        self.authorize(requester, Action::Rotate, AuditAction::Rotate, &target)?;

        match self.store.rotate(service_id) {
            Ok(secret) => {
                self.succeed(requester, AuditAction::Rotate, target, None);
                info!(service_id = %service_id, actor = %requester, "rotated secret");
                Ok(secret)
            }
            Err(err) => Err(self.fail(requester, AuditAction::Rotate, target, err)),
        }
    }

    /// Rotates every service registered at the time of the call.
    ///
    /// Each service is rotated independently; a service that disappears
    /// mid-sweep or fails to rotate lands in `failed` without stopping the
    /// rest. Services registered after the snapshot are not included.
    ///
    /// # Errors
    ///
    /// Returns an error only if the requester lacks `rotate-all`.
    pub fn rotate_all(&self, requester: &Principal) -> Result<RotationSummary> {
        self.authorize(
            requester,
            Action::RotateAll,
            AuditAction::RotateAll,
            &AuditTarget::All,
        )?;

        let snapshot = self.store.list_ids();
        Ok(self.sweep(requester, snapshot))
    }

    fn sweep(&self, requester: &Principal, snapshot: Vec<ServiceId>) -> RotationSummary {
        let actor = requester.actor();
        let mut summary = RotationSummary::default();

        for service_id in snapshot {
            let target = AuditTarget::Service(service_id.clone());
            match self.store.rotate(&service_id) {
                Ok(secret) => {
                    self.audit.record(
                        AuditEvent::new(actor.clone(), AuditAction::Rotate, target, Outcome::Success)
                            .with_detail("bulk rotation"),
                    );
                    summary.rotated.push(RotatedSecret { service_id, secret });
                }
                Err(err) => {
                    self.audit.record(
                        AuditEvent::new(actor.clone(), AuditAction::Rotate, target, Outcome::Error)
                            .with_detail(format!("bulk rotation: {}: {err}", err.kind())),
                    );
                    if err.is_internal() {
                        error!(service_id = %service_id, error = %err, "bulk rotation failed for service");
                    } else {
                        warn!(service_id = %service_id, error = %err, "bulk rotation skipped service");
                    }
                    summary.failed.push(RotationFailure {
                        service_id,
                        kind: err.kind(),
                    });
                }
            }
        }

        let outcome = summary.outcome();
        self.audit.record(
            AuditEvent::new(actor, AuditAction::RotateAll, AuditTarget::All, outcome).with_detail(
                format!(
                    "rotated {}, failed {}",
                    summary.rotated.len(),
                    summary.failed.len()
                ),
            ),
        );
        info!(
            actor = %requester,
            rotated = summary.rotated.len(),
            failed = summary.failed.len(),
            "bulk rotation complete"
        );

        summary
    }

    /// Returns a service's metadata. Never includes the secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the requester lacks `read-secret-metadata` or
    /// the service does not exist.
    pub fn describe(&self, requester: &Principal, service_id: &ServiceId) -> Result<ServiceMetadata> {
        let target = AuditTarget::Service(service_id.clone());
        self.authorize(
            requester,
            Action::ReadSecretMetadata,
            AuditAction::Describe,
            &target,
        )?;

        match self.store.get(service_id) {
            Ok(metadata) => {
                self.succeed(requester, AuditAction::Describe, target, None);
                Ok(metadata)
            }
            Err(err) => Err(self.fail(requester, AuditAction::Describe, target, err)),
        }
    }

    /// Lists registered services.
    ///
    /// # Errors
    ///
    /// Returns an error if the requester lacks `read-secret-metadata`.
    pub fn list_services(&self, requester: &Principal) -> Result<Vec<ServiceId>> {
        self.authorize(
            requester,
            Action::ReadSecretMetadata,
            AuditAction::ListServices,
            &AuditTarget::All,
        )?;

        let ids = self.store.list_ids();
        self.succeed(
            requester,
            AuditAction::ListServices,
            AuditTarget::All,
            Some(format!("{} services", ids.len())),
        );
        Ok(ids)
    }

    /// Queries the audit trail.
    ///
    /// The query is taken before this access is itself recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the requester lacks `view-audit`.
    pub fn query_audit(&self, requester: &Principal, filter: &AuditFilter) -> Result<AuditQuery> {
        let target = filter.target();
        self.authorize(requester, Action::ViewAudit, AuditAction::QueryAudit, &target)?;

        let query = self.audit.query(filter);
        self.succeed(requester, AuditAction::QueryAudit, target, None);
        Ok(query)
    }

    /// Adds or replaces a role, returning the previous definition.
    pub fn define_role(&self, role: Role) -> Option<Role> {
        let target = AuditTarget::Role(role.name.clone());
        let actions = role
            .actions
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let name = role.name.clone();

        let previous = self.access.define_role(role);
        self.audit.record(
            AuditEvent::new(Actor::System, AuditAction::RoleDefined, target, Outcome::Success)
                .with_detail(format!("actions: [{actions}]")),
        );
        info!(role = %name, actions = %actions, replaced = previous.is_some(), "role defined");
        previous
    }

    /// Removes a role. Services and operators holding it lose its grants.
    ///
    /// # Errors
    ///
    /// Returns an error if the role is not defined.
    pub fn remove_role(&self, name: &str) -> Result<Role> {
        let target = AuditTarget::Role(name.to_string());
        match self.access.remove_role(name) {
            Ok(role) => {
                self.audit.record(AuditEvent::new(
                    Actor::System,
                    AuditAction::RoleRemoved,
                    target,
                    Outcome::Success,
                ));
                info!(role = %name, "role removed");
                Ok(role)
            }
            Err(err) => {
                self.audit.record(
                    AuditEvent::new(Actor::System, AuditAction::RoleRemoved, target, Outcome::Error)
                        .with_detail(err.to_string()),
                );
                warn!(role = %name, "attempt to remove unknown role");
                Err(err)
            }
        }
    }

    /// Roles currently held by a principal. Unregistered services hold none.
    fn roles_of(&self, requester: &Principal) -> BTreeSet<String> {
        if let Some(roles) = requester.operator_roles() {
            return roles.clone();
        }
        requester
            .service_id()
            .and_then(|id| self.store.roles_of(id).ok())
            .unwrap_or_default()
    }

    fn authorize(
        &self,
        requester: &Principal,
        action: Action,
        audit_action: AuditAction,
        target: &AuditTarget,
    ) -> Result<()> {
        let roles = self.roles_of(requester);
        if self.access.is_permitted(&roles, action) {
            return Ok(());
        }

        self.audit.record(
            AuditEvent::new(requester.actor(), audit_action, target.clone(), Outcome::Denied)
                .with_detail(format!("missing '{action}' grant")),
        );
        warn!(actor = %requester, action = %action, resource = %target, "permission denied");
        Err(Error::PermissionDenied {
            reason: format!("{requester} is not permitted to {action}"),
        })
    }

    fn succeed(
        &self,
        requester: &Principal,
        action: AuditAction,
        target: AuditTarget,
        detail: Option<String>,
    ) {
        let mut event = AuditEvent::new(requester.actor(), action, target, Outcome::Success);
        event.detail = detail;
        self.audit.record(event);
    }

    /// Audits a failed store operation and hands the error back.
    fn fail(
        &self,
        requester: &Principal,
        action: AuditAction,
        target: AuditTarget,
        err: Error,
    ) -> Error {
        if err.is_internal() {
            error!(actor = %requester, action = %action, resource = %target, error = %err, "operation failed");
        } else {
            warn!(actor = %requester, action = %action, resource = %target, error = %err, "operation rejected");
        }
        self.audit.record(
            AuditEvent::new(requester.actor(), action, target, Outcome::Error)
                .with_detail(format!("{}: {err}", err.kind())),
        );
        err
    }
}

impl std::fmt::Debug for SecretManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretManager")
            .field("store", &self.store)
            .field("access", &self.access)
            .field("audit", &self.audit)
            .finish()
    }
}
