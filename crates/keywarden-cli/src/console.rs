//! JSON-lines request console.
//!
//! Each input line is one request:
//!
//! ```text
//! {"as": {"operator": "root"}, "op": "register", "service_id": "billing", "roles": ["worker"]}
//! {"op": "validate", "service_id": "billing", "secret": "kw_..."}
//! {"as": {"service": {"id": "billing", "secret": "kw_..."}}, "op": "list"}
//! ```
//!
//! Each output line is one response, `{"ok": true, "result": ...}` or
//! `{"ok": false, "error": {"kind": ..., "message": ...}}`.
//!
//! # Trust model
//!
//! The console trusts whoever controls its stdin. An operator credential is
//! a bare name claim: naming a configured operator grants that operator's
//! roles without further proof, so stdin must only be reachable by the
//! people those operators stand for. Service credentials are different and
//! must carry the service's current secret. Unknown operator names and
//! requests without credentials hold no roles; they are denied and audited.

use std::io::{BufRead, Write};

use chrono::{DateTime, Utc};
use keywarden::{
    Actor, AuditAction, AuditEntry, AuditFilter, ErrorKind, ManagerConfig, Outcome, Principal,
    SecretManager, ServiceId,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::CliError;

/// Operator name recorded for requests that carry no credentials.
pub const ANONYMOUS: &str = "anonymous";

/// Who is making a request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credentials {
    /// A configured operator, by name.
    Operator(String),
    /// A registered service proving its identity with its current secret.
    Service {
        /// Service identifier.
        id: ServiceId,
        /// The service's current secret.
        secret: String,
    },
}

/// A request line.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    /// Requester credentials. Not needed for `validate`. Requests without
    /// credentials act as the role-less [`ANONYMOUS`] operator.
    #[serde(default, rename = "as")]
    pub credentials: Option<Credentials>,
    /// The operation.
    #[serde(flatten)]
    pub request: Request,
}

/// Console operations.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Register a service.
    Register {
        /// Service to register.
        service_id: ServiceId,
        /// Roles to assign.
        #[serde(default)]
        roles: Vec<String>,
    },
    /// Deregister a service.
    Deregister {
        /// Service to remove.
        service_id: ServiceId,
    },
    /// Check a service's secret.
    Validate {
        /// Service to check.
        service_id: ServiceId,
        /// Secret presented by the service.
        secret: String,
    },
    /// Rotate one service.
    Rotate {
        /// Service to rotate.
        service_id: ServiceId,
    },
    /// Rotate every service.
    RotateAll,
    /// Show a service's metadata.
    Describe {
        /// Service to describe.
        service_id: ServiceId,
    },
    /// List registered services.
    List,
    /// Query the audit trail.
    Audit(AuditRequest),
}

impl Request {
    /// Operation name as written on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Deregister { .. } => "deregister",
            Self::Validate { .. } => "validate",
            Self::Rotate { .. } => "rotate",
            Self::RotateAll => "rotate_all",
            Self::Describe { .. } => "describe",
            Self::List => "list",
            Self::Audit(_) => "audit",
        }
    }
}

/// Audit query parameters. All are optional and combine with AND.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditRequest {
    /// Only entries targeting this service.
    pub service_id: Option<ServiceId>,
    /// Only entries by this actor.
    pub actor: Option<Actor>,
    /// Only entries of this kind.
    pub action: Option<AuditAction>,
    /// Only entries with this outcome.
    pub outcome: Option<Outcome>,
    /// Only entries strictly after this time.
    pub after: Option<DateTime<Utc>>,
    /// Only entries strictly before this time.
    pub before: Option<DateTime<Utc>>,
    /// At most this many entries.
    pub limit: Option<usize>,
}

impl AuditRequest {
    /// Builds the corresponding audit filter.
    #[must_use]
    pub fn filter(&self) -> AuditFilter {
        let mut filter = AuditFilter::new();
        if let Some(id) = &self.service_id {
            filter = filter.for_service(id.clone());
        }
        if let Some(actor) = &self.actor {
            filter = filter.by_actor(actor.clone());
        }
        if let Some(action) = self.action {
            filter = filter.with_action(action);
        }
        if let Some(outcome) = self.outcome {
            filter = filter.with_outcome(outcome);
        }
        if let Some(after) = self.after {
            filter = filter.after(after);
        }
        if let Some(before) = self.before {
            filter = filter.before(before);
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        filter
    }
}

/// Error payload of a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Stable error category.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

/// A response line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Whether the request succeeded.
    pub ok: bool,
    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// A successful response.
    #[must_use]
    pub const fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    /// A failed response.
    #[must_use]
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(ErrorBody {
                kind,
                message: message.into(),
            }),
        }
    }
}

impl From<keywarden::Error> for Response {
    fn from(err: keywarden::Error) -> Self {
        Self::failure(err.kind(), err.to_string())
    }
}

/// Request counters for one console session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleStats {
    /// Requests handled.
    pub requests: u64,
    /// Requests answered with an error.
    pub failures: u64,
}

/// Serves requests against one manager.
#[derive(Debug)]
pub struct Console {
    manager: SecretManager,
    config: ManagerConfig,
}

impl Console {
    /// Creates a console. Operators are resolved from `config`.
    #[must_use]
    pub const fn new(manager: SecretManager, config: ManagerConfig) -> Self {
        Self { manager, config }
    }

    /// Returns the manager.
    #[must_use]
    pub const fn manager(&self) -> &SecretManager {
        &self.manager
    }

    /// Handles one raw request line.
    #[must_use]
    pub fn handle_line(&self, line: &str) -> Response {
        match serde_json::from_str::<Envelope>(line) {
            Ok(envelope) => self.handle(envelope),
            Err(e) => {
                warn!(error = %e, "malformed request");
                Response::failure(ErrorKind::Invalid, format!("malformed request: {e}"))
            }
        }
    }

    /// Handles one decoded request.
    #[must_use]
    pub fn handle(&self, envelope: Envelope) -> Response {
        let op = envelope.request.name();
        debug!(op, "handling request");
        match self.dispatch(envelope) {
            Ok(result) => Response::success(result),
            Err(err) => {
                debug!(op, error = %err, "request failed");
                err.into()
            }
        }
    }

    /// Reads requests from `reader` until end of input, writing one response
    /// line per request to `writer`.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing fails.
    pub fn run<R: BufRead, W: Write>(&self, reader: R, mut writer: W) -> Result<ConsoleStats, CliError> {
        let mut stats = ConsoleStats::default();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = self.handle_line(line);
            stats.requests += 1;
            if !response.ok {
                stats.failures += 1;
            }

            serde_json::to_writer(&mut writer, &response)?;
            writeln!(writer)?;
            writer.flush()?;
        }

        info!(
            requests = stats.requests,
            failures = stats.failures,
            "console input closed"
        );
        Ok(stats)
    }

    /// Unknown operators and anonymous requests act with no roles, so the
    /// manager denies them and the denial lands in the audit trail.
    fn principal(&self, credentials: Option<&Credentials>) -> keywarden::Result<Principal> {
        match credentials {
            Some(Credentials::Operator(name)) => Ok(self.config.operator(name).unwrap_or_else(|| {
                warn!(operator = %name, "request names an unknown operator");
                Principal::operator(name.clone(), Vec::<String>::new())
            })),
            Some(Credentials::Service { id, secret }) => self.manager.authenticate(id, secret),
            None => Ok(Principal::operator(ANONYMOUS, Vec::<String>::new())),
        }
    }

    fn dispatch(&self, envelope: Envelope) -> keywarden::Result<Value> {
        let Envelope {
            credentials,
            request,
        } = envelope;
        let requester = || self.principal(credentials.as_ref());

        match request {
            Request::Validate { service_id, secret } => {
                let valid = self.manager.validate(&service_id, &secret)?;
                Ok(json!({ "service_id": service_id, "valid": valid }))
            }
            Request::Register { service_id, roles } => {
                let secret = self.manager.register(&requester()?, &service_id, roles)?;
                Ok(json!({ "service_id": service_id, "secret": secret.expose() }))
            }
            Request::Deregister { service_id } => {
                self.manager.deregister(&requester()?, &service_id)?;
                Ok(json!({ "service_id": service_id, "deregistered": true }))
            }
            Request::Rotate { service_id } => {
                let secret = self.manager.rotate(&requester()?, &service_id)?;
                Ok(json!({ "service_id": service_id, "secret": secret.expose() }))
            }
            Request::RotateAll => {
                let summary = self.manager.rotate_all(&requester()?)?;
                let rotated: Vec<Value> = summary
                    .rotated
                    .iter()
                    .map(|r| json!({ "service_id": r.service_id, "secret": r.secret.expose() }))
                    .collect();
                Ok(json!({
                    "rotated": rotated,
                    "failed": summary.failed,
                    "partial": summary.is_partial(),
                }))
            }
            Request::Describe { service_id } => {
                let metadata = self.manager.describe(&requester()?, &service_id)?;
                Ok(json!(metadata))
            }
            Request::List => {
                let services = self.manager.list_services(&requester()?)?;
                Ok(json!({ "services": services }))
            }
            Request::Audit(query) => {
                let entries: Vec<AuditEntry> = self
                    .manager
                    .query_audit(&requester()?, &query.filter())?
                    .collect();
                Ok(json!({ "entries": entries }))
            }
        }
    }
}
