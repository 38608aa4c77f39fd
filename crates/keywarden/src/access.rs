//! Role-based access control for administrative actions.
//!
//! The [`AccessController`] holds only the role → action policy table.
//! Which roles a requester holds is resolved elsewhere: operators carry
//! their roles, and registered services get theirs from the store.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Action, Actor, ServiceId};

/// A named bundle of permitted actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// The unique name of the role.
    pub name: String,
    /// The actions granted by this role.
    pub actions: BTreeSet<Action>,
}

impl Role {
    /// Maximum length of a role name.
    pub const MAX_NAME_LENGTH: usize = 64;

    /// Creates a new role.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or invalid.
    pub fn new(name: impl Into<String>, actions: impl IntoIterator<Item = Action>) -> Result<Self> {
        let name = name.into();
        Self::validate_name(&name)?;
        Ok(Self {
            name,
            actions: actions.into_iter().collect(),
        })
    }

    /// Returns true if the role grants the action.
    #[must_use]
    pub fn grants(&self, action: Action) -> bool {
        self.actions.contains(&action)
    }

    /// Full administrator: every action.
    #[must_use]
    pub fn admin() -> Self {
        Self::builtin("admin", Action::ALL)
    }

    /// Day-to-day service management, without bulk rotation or audit access.
    #[must_use]
    pub fn operator() -> Self {
        Self::builtin(
            "operator",
            [
                Action::Register,
                Action::Deregister,
                Action::ReadSecretMetadata,
                Action::Rotate,
            ],
        )
    }

    /// Read-only access to the audit trail and service metadata.
    #[must_use]
    pub fn auditor() -> Self {
        Self::builtin("auditor", [Action::ViewAudit, Action::ReadSecretMetadata])
    }

    /// Ordinary workload; may only authenticate itself.
    #[must_use]
    pub fn worker() -> Self {
        Self::builtin("worker", [])
    }

    /// The built-in roles.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![Self::admin(), Self::operator(), Self::auditor(), Self::worker()]
    }

    fn builtin(name: &str, actions: impl IntoIterator<Item = Action>) -> Self {
        Self {
            name: name.to_string(),
            actions: actions.into_iter().collect(),
        }
    }

    /// Validates a role name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRole`] if the name is malformed.
    pub fn validate_name(name: &str) -> Result<()> {
        let Some(first) = name.chars().next() else {
            return Err(Error::InvalidRole {
                reason: "name cannot be empty".to_string(),
            });
        };
        if name.len() > Self::MAX_NAME_LENGTH {
            return Err(Error::InvalidRole {
                reason: format!(
                    "name cannot exceed {} characters",
                    Self::MAX_NAME_LENGTH
                ),
            });
        }
        if !first.is_ascii_lowercase() {
            return Err(Error::InvalidRole {
                reason: "name must start with a lowercase letter".to_string(),
            });
        }
        if let Some(c) = name
            .chars()
            .find(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && *c != '-' && *c != '_')
        {
            return Err(Error::InvalidRole {
                reason: format!("invalid character in name: '{c}'"),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PrincipalKind {
    Operator { name: String, roles: BTreeSet<String> },
    Service(ServiceId),
}

/// The identity on whose behalf a request is made.
///
/// Operators are administrative principals configured at startup and
/// carry their roles directly. Service principals are only minted by
/// authenticating with the service's current secret; their roles are
/// looked up in the store at every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    kind: PrincipalKind,
}

impl Principal {
    /// Creates an administrative principal with the given roles.
    #[must_use]
    pub fn operator<I, S>(name: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: PrincipalKind::Operator {
                name: name.into(),
                roles: roles.into_iter().map(Into::into).collect(),
            },
        }
    }

    pub(crate) fn service(id: ServiceId) -> Self {
        Self {
            kind: PrincipalKind::Service(id),
        }
    }

    /// Returns the service identity if this principal is a service.
    #[must_use]
    pub fn service_id(&self) -> Option<&ServiceId> {
        match &self.kind {
            PrincipalKind::Service(id) => Some(id),
            PrincipalKind::Operator { .. } => None,
        }
    }

    /// Roles carried by an operator principal.
    #[must_use]
    pub(crate) fn operator_roles(&self) -> Option<&BTreeSet<String>> {
        match &self.kind {
            PrincipalKind::Operator { roles, .. } => Some(roles),
            PrincipalKind::Service(_) => None,
        }
    }

    /// The actor recorded in audit entries for this principal.
    #[must_use]
    pub fn actor(&self) -> Actor {
        match &self.kind {
            PrincipalKind::Operator { name, .. } => Actor::Operator(name.clone()),
            PrincipalKind::Service(id) => Actor::Service(id.clone()),
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.actor())
    }
}

/// Role → permitted-actions policy table.
///
/// Mutations take effect for every subsequent check; each check reads the
/// table under a single read lock so it never observes a half-applied change.
#[derive(Debug, Default)]
pub struct AccessController {
    roles: RwLock<HashMap<String, Role>>,
}

impl AccessController {
    /// Creates a controller with no roles; every check is denied.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a controller with the built-in roles.
    #[must_use]
    pub fn with_default_roles() -> Self {
        Self::with_roles(Role::defaults())
    }

    /// Creates a controller with the given roles.
    #[must_use]
    pub fn with_roles(roles: impl IntoIterator<Item = Role>) -> Self {
        let controller = Self::new();
        {
            let mut table = controller.roles.write();
            for role in roles {
                table.insert(role.name.clone(), role);
            }
        }
        controller
    }

    /// Adds or replaces a role, returning the previous definition.
    pub fn define_role(&self, role: Role) -> Option<Role> {
        self.roles.write().insert(role.name.clone(), role)
    }

    /// Removes a role.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRole`] if the role is not defined.
    pub fn remove_role(&self, name: &str) -> Result<Role> {
        self.roles
            .write()
            .remove(name)
            .ok_or_else(|| Error::UnknownRole {
                name: name.to_string(),
            })
    }

    /// Gets a role by name.
    #[must_use]
    pub fn role(&self, name: &str) -> Option<Role> {
        self.roles.read().get(name).cloned()
    }

    /// Returns true if the role is defined.
    #[must_use]
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.read().contains_key(name)
    }

    /// Returns the first name in `names` that is not a defined role.
    #[must_use]
    pub fn first_unknown<'a, I>(&self, names: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let table = self.roles.read();
        names
            .into_iter()
            .find(|name| !table.contains_key(name.as_str()))
            .map(String::as_str)
    }

    /// Lists all roles, sorted by name.
    #[must_use]
    pub fn roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = self.roles.read().values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        roles
    }

    /// Returns true if any of `principal_roles` grants `action`.
    ///
    /// Unknown role names grant nothing.
    #[must_use]
    pub fn is_permitted<'a, I>(&self, principal_roles: I, action: Action) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        let table = self.roles.read();
        principal_roles
            .into_iter()
            .any(|name| table.get(name.as_str()).is_some_and(|role| role.grants(action)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn empty_controller_denies_everything() {
        let controller = AccessController::new();
        for action in Action::ALL {
            assert!(!controller.is_permitted(&roles(&["admin"]), action));
        }
    }

    #[test_case("admin", Action::RotateAll, true ; "admin rotates all")]
    #[test_case("admin", Action::ViewAudit, true ; "admin views audit")]
    #[test_case("operator", Action::Rotate, true ; "operator rotates")]
    #[test_case("operator", Action::RotateAll, false ; "operator cannot rotate all")]
    #[test_case("operator", Action::ViewAudit, false ; "operator cannot view audit")]
    #[test_case("auditor", Action::ViewAudit, true ; "auditor views audit")]
    #[test_case("auditor", Action::Register, false ; "auditor cannot register")]
    #[test_case("worker", Action::Rotate, false ; "worker cannot rotate")]
    #[test_case("ghost", Action::Register, false ; "unknown role fails closed")]
    fn default_role_matrix(role: &str, action: Action, expected: bool) {
        let controller = AccessController::with_default_roles();
        assert_eq!(controller.is_permitted(&roles(&[role]), action), expected);
    }

    #[test]
    fn any_role_granting_is_enough() {
        let controller = AccessController::with_default_roles();
        assert!(controller.is_permitted(&roles(&["worker", "auditor"]), Action::ViewAudit));
        assert!(!controller.is_permitted(&roles(&["worker", "ghost"]), Action::ViewAudit));
        assert!(!controller.is_permitted(&roles(&[]), Action::ViewAudit));
    }

    #[test]
    fn define_role_takes_effect_immediately() {
        let controller = AccessController::with_default_roles();
        let held = roles(&["rotator"]);
        assert!(!controller.is_permitted(&held, Action::Rotate));

        let role = Role::new("rotator", [Action::Rotate]).expect("valid role");
        assert!(controller.define_role(role).is_none());
        assert!(controller.is_permitted(&held, Action::Rotate));

        let narrowed = Role::new("rotator", []).expect("valid role");
        let previous = controller.define_role(narrowed).expect("was defined");
        assert!(previous.grants(Action::Rotate));
        assert!(!controller.is_permitted(&held, Action::Rotate));
    }

    #[test]
    fn remove_role_revokes_grants() {
        let controller = AccessController::with_default_roles();
        let held = roles(&["operator"]);
        assert!(controller.is_permitted(&held, Action::Register));

        controller.remove_role("operator").expect("remove");
        assert!(!controller.is_permitted(&held, Action::Register));
        assert!(!controller.has_role("operator"));

        let err = controller.remove_role("operator").expect_err("already removed");
        assert!(matches!(err, Error::UnknownRole { .. }));
    }

    #[test]
    fn first_unknown_reports_missing_role() {
        let controller = AccessController::with_default_roles();
        let names = roles(&["worker", "nope", "admin"]);
        assert_eq!(controller.first_unknown(&names), Some("nope"));
        assert_eq!(controller.first_unknown(&roles(&["worker"])), None);
    }

    #[test]
    fn roles_are_listed_sorted() {
        let controller = AccessController::with_default_roles();
        let names: Vec<String> = controller.roles().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["admin", "auditor", "operator", "worker"]);
    }

    #[test_case("" ; "empty")]
    #[test_case("Admin" ; "uppercase")]
    #[test_case("1st" ; "leading digit")]
    #[test_case("ops team" ; "space")]
    fn role_name_invalid(name: &str) {
        let err = Role::new(name, []).expect_err("invalid");
        assert!(matches!(err, Error::InvalidRole { .. }));
    }

    #[test]
    fn role_name_too_long() {
        let name = "a".repeat(Role::MAX_NAME_LENGTH + 1);
        assert!(Role::new(name, []).is_err());
    }

    #[test]
    fn principal_actor_and_display() {
        let op = Principal::operator("root", ["admin"]);
        assert_eq!(op.actor(), Actor::Operator("root".into()));
        assert_eq!(op.to_string(), "operator:root");
        assert!(op.service_id().is_none());
        assert!(op.operator_roles().is_some_and(|r| r.contains("admin")));

        let id = ServiceId::new("svc-a").expect("valid");
        let svc = Principal::service(id.clone());
        assert_eq!(svc.service_id(), Some(&id));
        assert!(svc.operator_roles().is_none());
        assert_eq!(svc.to_string(), "service:svc-a");
    }
}
