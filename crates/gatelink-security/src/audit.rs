// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit log: bounded, redacting journal of security-relevant events.
//
// Every detail string passes through the `Redactor` before it is stored
// anywhere. Events are kept most-recent-first in memory and mirrored to
// SQLite:
//
//   audit_events(
//     seq        INTEGER PRIMARY KEY AUTOINCREMENT,
//     id         TEXT    NOT NULL UNIQUE,  -- UUID v4
//     timestamp  TEXT    NOT NULL,         -- RFC 3339
//     event_type TEXT    NOT NULL,
//     severity   TEXT    NOT NULL,
//     details    TEXT    NOT NULL          -- already redacted
//   )
//
// Writing to SQLite never fails the caller. A failed write is reported on the
// tracing channel and counted; the event stays visible in memory.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use gatelink_core::error::{GatelinkError, Result};
use gatelink_core::{EventId, EventType, Severity};

use crate::redact::Redactor;

// ---------------------------------------------------------------------------
// Local error helpers
// ---------------------------------------------------------------------------

/// Convert a `rusqlite::Error` into a `GatelinkError::Database`.
fn db_err(e: rusqlite::Error) -> GatelinkError {
    GatelinkError::Database(e.to_string())
}

/// Default number of retained events.
pub const DEFAULT_RETENTION: usize = 1000;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS audit_events (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT    NOT NULL UNIQUE,
    timestamp  TEXT    NOT NULL,
    event_type TEXT    NOT NULL,
    severity   TEXT    NOT NULL,
    details    TEXT    NOT NULL
);";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One recorded event. Immutable once created; the details are redacted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    id: EventId,
    timestamp: DateTime<Utc>,
    event_type: EventType,
    severity: Severity,
    redacted_details: String,
}

impl AuditEvent {
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn redacted_details(&self) -> &str {
        &self.redacted_details
    }
}

/// Query over the in-memory events. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub event_type: Option<EventType>,
    /// Keep events at or above this severity.
    pub min_severity: Option<Severity>,
    /// Case-insensitive substring over the redacted details.
    pub search: Option<String>,
    /// Return at most this many (most recent) matches.
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn search(mut self, needle: impl Into<String>) -> Self {
        self.search = Some(needle.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, event: &AuditEvent, needle: Option<&str>) -> bool {
        self.event_type.is_none_or(|t| t == event.event_type)
            && self.min_severity.is_none_or(|s| event.severity >= s)
            && needle.is_none_or(|n| event.redacted_details.to_lowercase().contains(n))
    }
}

struct AuditInner {
    /// Most recent first.
    events: VecDeque<AuditEvent>,
    /// `None` after `shutdown`.
    store: Option<Connection>,
}

/// Bounded, redacting audit journal shared by every component.
///
/// A single mutex covers the in-memory list and the database, so the order
/// of `events()` is the order in which `log` calls completed.
pub struct AuditLog {
    redactor: Redactor,
    retention: usize,
    inner: Mutex<AuditInner>,
    persistence_failures: AtomicU64,
}

impl AuditLog {
    /// Open (or create) the audit database at `path` and load the most
    /// recent `retention` events from it.
    #[instrument(skip_all, fields(path = %path.as_ref().display(), retention = retention))]
    pub fn open(path: impl AsRef<Path>, retention: usize) -> Result<Self> {
        let redactor = Redactor::new()?;
        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL for concurrent readers.
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;

        let log = Self::with_connection(redactor, conn, retention)?;
        debug!(loaded = log.len(), "audit log opened");
        Ok(log)
    }

    /// Open an in-memory audit database (useful for tests).
    pub fn open_in_memory(retention: usize) -> Result<Self> {
        let redactor = Redactor::new()?;
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(redactor, conn, retention)
    }

    fn with_connection(redactor: Redactor, conn: Connection, retention: usize) -> Result<Self> {
        let retention = retention.max(1);
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        let events = load_recent(&conn, retention)?;
        Ok(Self {
            redactor,
            retention,
            inner: Mutex::new(AuditInner {
                events,
                store: Some(conn),
            }),
            persistence_failures: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, AuditInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an event. `details` is redacted before it is stored.
    ///
    /// Never fails: if the database write fails the event is still kept in
    /// memory and the failure is logged and counted.
    pub fn log(&self, event_type: EventType, details: &str, severity: Severity) -> AuditEvent {
        let event = AuditEvent {
            id: EventId::new(),
            timestamp: Utc::now(),
            event_type,
            severity,
            redacted_details: self.redactor.redact(details),
        };

        let mut inner = self.lock();
        inner.events.push_front(event.clone());
        inner.events.truncate(self.retention);

        if let Some(conn) = inner.store.as_ref() {
            if let Err(e) = persist(conn, &event, self.retention) {
                self.persistence_failures.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, event_id = %event.id, "failed to persist audit event");
            }
        }

        debug!(
            event_type = event_type.as_str(),
            severity = severity.as_str(),
            "audit event recorded"
        );
        event
    }

    /// Events matching `filter`, most recent first.
    pub fn events(&self, filter: &AuditFilter) -> Vec<AuditEvent> {
        let needle = filter.search.as_deref().map(str::to_lowercase);
        let limit = filter.limit.unwrap_or(usize::MAX);
        self.lock()
            .events
            .iter()
            .filter(|e| filter.matches(e, needle.as_deref()))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Empty the log in memory and on disk.
    ///
    /// Memory is always cleared. Returns whether the durable clear succeeded;
    /// after `shutdown` there is no database to clear and this returns false.
    #[instrument(skip(self))]
    pub fn clear(&self) -> bool {
        let mut inner = self.lock();
        inner.events.clear();
        match inner.store.as_ref() {
            Some(conn) => match conn.execute("DELETE FROM audit_events", []) {
                Ok(_) => true,
                Err(e) => {
                    self.persistence_failures.fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "failed to clear persisted audit events");
                    false
                }
            },
            None => {
                warn!("audit log cleared after shutdown; persisted events untouched");
                false
            }
        }
    }

    /// Detach the database. Later events are kept in memory only.
    pub fn shutdown(&self) {
        if self.lock().store.take().is_some() {
            debug!("audit log store closed");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    /// Maximum number of retained events.
    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Number of database writes that failed since construction.
    pub fn persistence_failures(&self) -> u64 {
        self.persistence_failures.load(Ordering::Relaxed)
    }
}

/// Insert `event` and drop rows beyond the retention window.
fn persist(conn: &Connection, event: &AuditEvent, retention: usize) -> Result<()> {
    conn.execute(
        "INSERT INTO audit_events (id, timestamp, event_type, severity, details)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.id.0.to_string(),
            event.timestamp.to_rfc3339(),
            event.event_type.as_str(),
            event.severity.as_str(),
            event.redacted_details,
        ],
    )
    .map_err(db_err)?;

    let keep = i64::try_from(retention).unwrap_or(i64::MAX);
    conn.execute(
        "DELETE FROM audit_events WHERE seq <= (
             SELECT seq FROM audit_events ORDER BY seq DESC LIMIT 1 OFFSET ?1
         )",
        params![keep],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Load up to `limit` events, most recent first. Unreadable rows are skipped.
fn load_recent(conn: &Connection, limit: usize) -> Result<VecDeque<AuditEvent>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, timestamp, event_type, severity, details
             FROM audit_events
             ORDER BY seq DESC
             LIMIT ?1",
        )
        .map_err(db_err)?;

    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })
        .map_err(db_err)?;

    let mut events = VecDeque::new();
    for row in rows {
        let (id, timestamp, event_type, severity, details) = row.map_err(db_err)?;
        let parsed = (|| {
            Some(AuditEvent {
                id: EventId(Uuid::parse_str(&id).ok()?),
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .ok()?
                    .with_timezone(&Utc),
                event_type: event_type.parse().ok()?,
                severity: severity.parse().ok()?,
                redacted_details: details,
            })
        })();
        match parsed {
            Some(event) => events.push_back(event),
            None => warn!(id = %id, "skipping unreadable audit row"),
        }
    }
    Ok(events)
}
