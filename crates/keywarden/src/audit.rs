//! Audit trail for every operation attempt.
//!
//! The [`AuditLog`] keeps an append-only, totally ordered sequence of
//! [`AuditEntry`] records in memory and forwards each one to a pluggable
//! [`AuditSink`] for durability. A failing sink never aborts the operation
//! that produced the entry; the failure is logged and counted instead.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::types::{Actor, AuditAction, AuditEntry, AuditEvent, AuditTarget, Outcome, ServiceId};

/// Filter criteria for querying audit logs.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Filter by target service.
    pub service: Option<ServiceId>,
    /// Filter by actor.
    pub actor: Option<Actor>,
    /// Filter by action type.
    pub action: Option<AuditAction>,
    /// Filter by outcome.
    pub outcome: Option<Outcome>,
    /// Filter entries after this time.
    pub after: Option<DateTime<Utc>>,
    /// Filter entries before this time.
    pub before: Option<DateTime<Utc>>,
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
}

impl AuditFilter {
    /// Creates a new empty filter that matches all entries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters by target service.
    #[must_use]
    pub fn for_service(mut self, service: ServiceId) -> Self {
        self.service = Some(service);
        self
    }

    /// Filters by actor.
    #[must_use]
    pub fn by_actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Filters by action type.
    #[must_use]
    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Filters by outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Filters entries after a given time.
    #[must_use]
    pub fn after(mut self, time: DateTime<Utc>) -> Self {
        self.after = Some(time);
        self
    }

    /// Filters entries before a given time.
    #[must_use]
    pub fn before(mut self, time: DateTime<Utc>) -> Self {
        self.before = Some(time);
        self
    }

    /// Limits the number of returned entries.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// The audit target this filter narrows to, if any.
    #[must_use]
    pub fn target(&self) -> AuditTarget {
        self.service
            .clone()
            .map_or(AuditTarget::All, AuditTarget::Service)
    }

    /// Checks if an entry matches this filter.
    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(ref id) = self.service {
            if !matches!(&entry.target, AuditTarget::Service(target) if target == id) {
                return false;
            }
        }

        if let Some(ref actor) = self.actor {
            if &entry.actor != actor {
                return false;
            }
        }

        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }

        if let Some(outcome) = self.outcome {
            if entry.outcome != outcome {
                return false;
            }
        }

        if let Some(after) = self.after {
            if entry.timestamp <= after {
                return false;
            }
        }

        if let Some(before) = self.before {
            if entry.timestamp >= before {
                return false;
            }
        }

        true
    }
}

/// Destination that makes audit entries durable.
///
/// Implement this trait to ship entries to a file, log stream, or external
/// store. Appends are called in log order, one entry at a time.
pub trait AuditSink: Send + Sync {
    /// Short name used in operational error reports.
    fn name(&self) -> &str;

    /// Appends one entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuditSink`] if the entry could not be persisted.
    fn append(&self, entry: &AuditEntry) -> Result<()>;
}

/// Sink that emits entries as structured `tracing` events.
///
/// Successful operations are logged at `info`; every other outcome at `warn`.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink {
    prefix: Option<String>,
}

impl TracingAuditSink {
    /// Creates a new tracing-based audit sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new tracing-based audit sink with a message prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl AuditSink for TracingAuditSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn append(&self, entry: &AuditEntry) -> Result<()> {
        let prefix = self.prefix.as_deref().unwrap_or("AUDIT");
        let detail = entry.detail.as_deref().unwrap_or("");

        match entry.outcome {
            Outcome::Success => {
                tracing::info!(
                    target: "keywarden::audit",
                    sequence = entry.sequence,
                    timestamp = %entry.timestamp,
                    actor = %entry.actor,
                    action = %entry.action,
                    target_id = %entry.target,
                    outcome = %entry.outcome,
                    detail,
                    "[{prefix}] {}", entry.action
                );
            }
            Outcome::Denied | Outcome::Error | Outcome::Mismatch | Outcome::Partial => {
                tracing::warn!(
                    target: "keywarden::audit",
                    sequence = entry.sequence,
                    timestamp = %entry.timestamp,
                    actor = %entry.actor,
                    action = %entry.action,
                    target_id = %entry.target,
                    outcome = %entry.outcome,
                    detail,
                    "[{prefix}] {}", entry.action
                );
            }
        }
        Ok(())
    }
}

/// Sink that appends one JSON document per line to a file.
pub struct JsonLinesFileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesFileSink {
    /// Opens (or creates) the file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::AuditSink {
                sink: "file".to_string(),
                reason: format!("failed to open '{}': {e}", path.display()),
            })?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonLinesFileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn append(&self, entry: &AuditEntry) -> Result<()> {
        let sink_error = |reason: String| Error::AuditSink {
            sink: "file".to_string(),
            reason,
        };

        let mut line = serde_json::to_string(entry)
            .map_err(|e| sink_error(format!("JSON serialization failed: {e}")))?;
        line.push('\n');

        let mut file = self.file.lock();
        file.write_all(line.as_bytes())
            .map_err(|e| sink_error(format!("failed to write to file: {e}")))?;
        file.flush()
            .map_err(|e| sink_error(format!("failed to flush file: {e}")))
    }
}

impl std::fmt::Debug for JsonLinesFileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesFileSink")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// A sink that drops every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn name(&self) -> &str {
        "noop"
    }

    fn append(&self, _entry: &AuditEntry) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct LogState {
    entries: Vec<Arc<AuditEntry>>,
    last_timestamp: Option<DateTime<Utc>>,
}

/// An append-only audit log.
///
/// Entries are stamped under a single append lock, so sequence numbers and
/// timestamps agree and concurrent writers never interleave. Timestamps are
/// clamped to be non-decreasing even if the wall clock steps backwards.
pub struct AuditLog {
    state: Mutex<LogState>,
    sink: Box<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    sink_failures: AtomicU64,
}

impl AuditLog {
    /// Creates a new empty audit log.
    #[must_use]
    pub fn new(sink: Box<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(LogState::default()),
            sink,
            clock,
            sink_failures: AtomicU64::new(0),
        }
    }

    /// Records an event and returns the stamped entry.
    ///
    /// Never fails: a sink error is reported on the operational log and
    /// counted in [`AuditLog::sink_failures`], but the entry stays in the
    /// in-memory trail.
    pub fn record(&self, event: AuditEvent) -> Arc<AuditEntry> {
        let mut state = self.state.lock();

        let now = self.clock.now();
        let timestamp = match state.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        state.last_timestamp = Some(timestamp);

        let sequence = state.entries.len() as u64 + 1;
        let entry = Arc::new(AuditEntry::stamp(event, sequence, timestamp));
        state.entries.push(Arc::clone(&entry));

        // Forwarded under the append lock so the sink sees log order.
        if let Err(e) = self.sink.append(&entry) {
            self.sink_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                sink = self.sink.name(),
                sequence,
                error = %e,
                "failed to append audit entry to sink"
            );
        }

        entry
    }

    /// Queries the audit log with the given filter.
    ///
    /// Returns a lazy iterator over a point-in-time snapshot, in ascending
    /// timestamp order. Each call is independent of any other.
    #[must_use]
    pub fn query(&self, filter: &AuditFilter) -> AuditQuery {
        let snapshot: Vec<Arc<AuditEntry>> = {
            let state = self.state.lock();
            let entries = &state.entries;
            let start = filter
                .after
                .map_or(0, |after| entries.partition_point(|e| e.timestamp <= after));
            let end = filter.before.map_or(entries.len(), |before| {
                entries.partition_point(|e| e.timestamp < before)
            });
            entries
                .get(start..end.max(start))
                .map(<[_]>::to_vec)
                .unwrap_or_default()
        };

        AuditQuery {
            entries: snapshot.into_iter(),
            filter: filter.clone(),
            remaining: filter.limit,
        }
    }

    /// Returns the total number of audit entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if the audit log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries the sink failed to append.
    #[must_use]
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("entries_count", &self.len())
            .field("sink", &self.sink.name())
            .field("sink_failures", &self.sink_failures())
            .finish()
    }
}

/// Lazy result of [`AuditLog::query`].
#[derive(Debug)]
pub struct AuditQuery {
    entries: std::vec::IntoIter<Arc<AuditEntry>>,
    filter: AuditFilter,
    remaining: Option<usize>,
}

impl Iterator for AuditQuery {
    type Item = AuditEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        let entry = self.entries.find(|e| self.filter.matches(e))?;
        if let Some(n) = self.remaining.as_mut() {
            *n -= 1;
        }
        Some(AuditEntry::clone(&entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::clock::testing::ManualClock;
    use chrono::Duration;

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn append(&self, _entry: &AuditEntry) -> Result<()> {
            Err(Error::AuditSink {
                sink: "failing".to_string(),
                reason: "disk full".to_string(),
            })
        }
    }

    fn test_log() -> AuditLog {
        AuditLog::new(Box::new(NoopAuditSink), Arc::new(SystemClock))
    }

    fn svc(name: &str) -> ServiceId {
        ServiceId::new(name).expect("valid id")
    }

    fn event(service: &str, action: AuditAction) -> AuditEvent {
        AuditEvent::new(
            Actor::Operator("root".to_string()),
            action,
            AuditTarget::Service(svc(service)),
            Outcome::Success,
        )
    }

    #[test]
    fn audit_log_new_is_empty() {
        let log = test_log();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn audit_log_record_assigns_sequence() {
        let log = test_log();
        let first = log.record(event("svc-a", AuditAction::Register));
        let second = log.record(event("svc-a", AuditAction::Rotate));

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn audit_log_query_all_ascending() {
        let log = test_log();
        log.record(event("first", AuditAction::Register));
        log.record(event("second", AuditAction::Register));
        log.record(event("third", AuditAction::Register));

        let results: Vec<AuditEntry> = log.query(&AuditFilter::new()).collect();
        let targets: Vec<String> = results.iter().map(|e| e.target.to_string()).collect();
        assert_eq!(targets, vec!["first", "second", "third"]);
        assert!(results.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn audit_log_query_by_service() {
        let log = test_log();
        log.record(event("svc-a", AuditAction::Register));
        log.record(event("svc-b", AuditAction::Register));
        log.record(event("svc-a", AuditAction::Rotate));

        let filter = AuditFilter::new().for_service(svc("svc-a"));
        let results: Vec<AuditEntry> = log.query(&filter).collect();
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|e| e.target == AuditTarget::Service(svc("svc-a"))));
    }

    #[test]
    fn audit_log_query_by_action_and_outcome() {
        let log = test_log();
        log.record(event("svc-a", AuditAction::Register));
        log.record(event("svc-a", AuditAction::Rotate));
        log.record(
            AuditEvent::new(
                Actor::Operator("intruder".into()),
                AuditAction::Rotate,
                AuditTarget::Service(svc("svc-a")),
                Outcome::Denied,
            )
            .with_detail("missing grant"),
        );

        let rotations = log.query(&AuditFilter::new().with_action(AuditAction::Rotate));
        assert_eq!(rotations.count(), 2);

        let denied: Vec<AuditEntry> = log
            .query(&AuditFilter::new().with_outcome(Outcome::Denied))
            .collect();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].actor, Actor::Operator("intruder".into()));
    }

    #[test]
    fn audit_log_query_by_actor() {
        let log = test_log();
        log.record(event("svc-a", AuditAction::Register));
        log.record(AuditEvent::new(
            Actor::System,
            AuditAction::RoleDefined,
            AuditTarget::Role("ops".into()),
            Outcome::Success,
        ));

        let results: Vec<AuditEntry> = log.query(&AuditFilter::new().by_actor(Actor::System)).collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].action, AuditAction::RoleDefined);
    }

    #[test]
    fn audit_log_query_with_limit() {
        let log = test_log();
        for i in 0..10 {
            log.record(event(&format!("svc{i}"), AuditAction::Register));
        }

        let results: Vec<AuditEntry> = log.query(&AuditFilter::new().limit(3)).collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].sequence, 1);
    }

    #[test]
    fn audit_log_query_time_range() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let log = AuditLog::new(Box::new(NoopAuditSink), clock.clone());

        log.record(event("first", AuditAction::Register));
        clock.set(start + Duration::seconds(10));
        log.record(event("second", AuditAction::Register));
        clock.set(start + Duration::seconds(20));
        log.record(event("third", AuditAction::Register));

        let after: Vec<AuditEntry> = log
            .query(&AuditFilter::new().after(start + Duration::seconds(5)))
            .collect();
        assert_eq!(after.len(), 2);

        let window: Vec<AuditEntry> = log
            .query(
                &AuditFilter::new()
                    .after(start + Duration::seconds(5))
                    .before(start + Duration::seconds(15)),
            )
            .collect();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].target.to_string(), "second");

        let empty = log.query(
            &AuditFilter::new()
                .after(start + Duration::seconds(30))
                .before(start),
        );
        assert_eq!(empty.count(), 0);
    }

    #[test]
    fn audit_log_timestamps_never_go_backwards() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let log = AuditLog::new(Box::new(NoopAuditSink), clock.clone());

        log.record(event("first", AuditAction::Register));
        clock.set(start - Duration::seconds(60));
        let second = log.record(event("second", AuditAction::Register));

        assert_eq!(second.timestamp, start);
    }

    #[test]
    fn audit_log_query_is_restartable() {
        let log = test_log();
        log.record(event("svc-a", AuditAction::Register));

        let mut first = log.query(&AuditFilter::new());
        assert!(first.next().is_some());

        log.record(event("svc-b", AuditAction::Register));

        // The earlier query keeps its snapshot; a new one sees both.
        assert!(first.next().is_none());
        assert_eq!(log.query(&AuditFilter::new()).count(), 2);
    }

    #[test]
    fn audit_log_sink_failure_is_counted_not_fatal() {
        let log = AuditLog::new(Box::new(FailingSink), Arc::new(SystemClock));

        let entry = log.record(event("svc-a", AuditAction::Register));

        assert_eq!(entry.sequence, 1);
        assert_eq!(log.len(), 1);
        assert_eq!(log.sink_failures(), 1);
    }

    #[test]
    fn json_lines_sink_appends_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.jsonl");
        let sink = JsonLinesFileSink::open(&path).expect("open sink");
        let log = AuditLog::new(Box::new(sink), Arc::new(SystemClock));

        log.record(event("svc-a", AuditAction::Register));
        log.record(event("svc-a", AuditAction::Deregister));

        let content = std::fs::read_to_string(&path).expect("read file");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: AuditEntry = serde_json::from_str(lines[1]).expect("parse line");
        assert_eq!(parsed.sequence, 2);
        assert_eq!(parsed.action, AuditAction::Deregister);
        assert_eq!(log.sink_failures(), 0);
    }

    #[test]
    fn json_lines_sink_open_fails_for_missing_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing").join("audit.jsonl");
        let err = JsonLinesFileSink::open(&path).expect_err("should fail");
        assert!(matches!(err, Error::AuditSink { .. }));
    }

    #[test]
    fn tracing_sink_accepts_every_outcome() {
        let sink = TracingAuditSink::with_prefix("TEST");
        for outcome in [
            Outcome::Success,
            Outcome::Denied,
            Outcome::Error,
            Outcome::Mismatch,
            Outcome::Partial,
        ] {
            let entry = AuditEntry::stamp(
                AuditEvent::new(Actor::System, AuditAction::RotateAll, AuditTarget::All, outcome),
                1,
                Utc::now(),
            );
            sink.append(&entry).expect("tracing sink never fails");
        }
    }

    #[test]
    fn audit_log_thread_safe_total_order() {
        use std::thread;

        let log = Arc::new(test_log());
        let mut handles = vec![];

        for i in 0..10 {
            let log = Arc::clone(&log);
            handles.push(thread::spawn(move || {
                for j in 0..10 {
                    log.record(event(&format!("svc-{i}-{j}"), AuditAction::Register));
                }
            }));
        }

        for handle in handles {
            handle.join().expect("thread should complete");
        }

        let entries: Vec<AuditEntry> = log.query(&AuditFilter::new()).collect();
        assert_eq!(entries.len(), 100);
        for (i, pair) in entries.windows(2).enumerate() {
            assert_eq!(pair[0].sequence, i as u64 + 1);
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn audit_log_debug() {
        let log = test_log();
        log.record(event("svc-a", AuditAction::Register));
        let debug = format!("{log:?}");
        assert!(debug.contains("AuditLog"));
        assert!(debug.contains("entries_count"));
    }
}
