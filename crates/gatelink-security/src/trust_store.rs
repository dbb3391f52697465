// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Certificate trust store: one pinned fingerprint per gateway, in SQLite.
//
// Schema:
//   pinned_certificates(
//     gateway     TEXT PRIMARY KEY,
//     fingerprint TEXT NOT NULL,   -- 64 lowercase hex chars
//     pinned_at   TEXT NOT NULL    -- RFC 3339
//   )
//
// The connection and an in-memory copy of every row sit behind a single
// mutex, so each operation is linearizable. A pin is added to the cache only
// after its row is written.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, info, instrument, warn};

use gatelink_core::error::{GatelinkError, Result};
use gatelink_core::{Fingerprint, GatewayId, PinnedCertificate};

/// Convert a `rusqlite::Error` into a `GatelinkError::Database`.
fn db_err(e: rusqlite::Error) -> GatelinkError {
    GatelinkError::Database(e.to_string())
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS pinned_certificates (
    gateway     TEXT PRIMARY KEY,
    fingerprint TEXT NOT NULL,
    pinned_at   TEXT NOT NULL
);";

/// Result of a successful `pin` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOutcome {
    /// A new pin was written.
    Pinned(PinnedCertificate),
    /// The identical fingerprint was already pinned; nothing changed.
    AlreadyPinned(PinnedCertificate),
}

impl PinOutcome {
    pub fn pin(&self) -> &PinnedCertificate {
        match self {
            Self::Pinned(p) | Self::AlreadyPinned(p) => p,
        }
    }
}

struct StoreInner {
    conn: Connection,
    pins: HashMap<GatewayId, PinnedCertificate>,
}

/// Durable map from gateway identity to its single pinned fingerprint.
pub struct CertificateTrustStore {
    inner: Mutex<StoreInner>,
}

impl CertificateTrustStore {
    /// Open (or create) the trust database at `path`.
    ///
    /// Every stored pin is loaded eagerly. A row that cannot be parsed makes
    /// the open fail; silently dropping it would let that gateway be pinned
    /// afresh to whatever certificate it presents next.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        let store = Self::with_connection(conn)?;
        debug!(pins = store.len(), "trust store opened");
        Ok(store)
    }

    /// Open an in-memory trust database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        let pins = load_pins(&conn)?;
        Ok(Self {
            inner: Mutex::new(StoreInner { conn, pins }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The fingerprint pinned for `gateway`, if any.
    pub fn lookup(&self, gateway: &GatewayId) -> Option<Fingerprint> {
        self.lock().pins.get(gateway).map(|p| p.fingerprint)
    }

    /// The full pin record for `gateway`, if any.
    pub fn get(&self, gateway: &GatewayId) -> Option<PinnedCertificate> {
        self.lock().pins.get(gateway).cloned()
    }

    /// Every pin, ordered by gateway id.
    pub fn list(&self) -> Vec<PinnedCertificate> {
        let mut pins: Vec<_> = self.lock().pins.values().cloned().collect();
        pins.sort_by(|a, b| a.gateway.cmp(&b.gateway));
        pins
    }

    pub fn len(&self) -> usize {
        self.lock().pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pins.is_empty()
    }

    /// Pin `fingerprint` for `gateway`.
    ///
    /// Re-pinning the same fingerprint is a no-op (`AlreadyPinned`, original
    /// `pinned_at` kept). A different fingerprint is refused with
    /// `PinConflict` and the stored pin is left untouched. If the row cannot
    /// be written the pin is not recorded at all.
    #[instrument(skip(self, fingerprint), fields(gateway = %gateway))]
    pub fn pin(&self, gateway: &GatewayId, fingerprint: Fingerprint) -> Result<PinOutcome> {
        let mut inner = self.lock();

        if let Some(existing) = inner.pins.get(gateway) {
            if existing.fingerprint == fingerprint {
                return Ok(PinOutcome::AlreadyPinned(existing.clone()));
            }
            warn!(
                pinned = %existing.fingerprint.truncated(),
                presented = %fingerprint.truncated(),
                "refusing to replace existing pin"
            );
            return Err(GatelinkError::PinConflict);
        }

        let pin = PinnedCertificate {
            gateway: gateway.clone(),
            fingerprint,
            pinned_at: Utc::now(),
        };
        inner
            .conn
            .execute(
                "INSERT INTO pinned_certificates (gateway, fingerprint, pinned_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    pin.gateway.as_str(),
                    pin.fingerprint.to_hex(),
                    pin.pinned_at.to_rfc3339()
                ],
            )
            .map_err(db_err)?;

        inner.pins.insert(gateway.clone(), pin.clone());
        info!(fingerprint = %fingerprint.truncated(), "certificate pinned");
        Ok(PinOutcome::Pinned(pin))
    }

    /// Remove the pin for `gateway`. Returns whether one existed.
    ///
    /// This is the only way a pin goes away, and the only way a gateway whose
    /// certificate changed can be trusted again.
    #[instrument(skip(self), fields(gateway = %gateway))]
    pub fn remove(&self, gateway: &GatewayId) -> Result<bool> {
        let mut inner = self.lock();
        inner
            .conn
            .execute(
                "DELETE FROM pinned_certificates WHERE gateway = ?1",
                params![gateway.as_str()],
            )
            .map_err(db_err)?;
        let existed = inner.pins.remove(gateway).is_some();
        if existed {
            info!("pin removed");
        }
        Ok(existed)
    }

    /// Make every later write fail.
    #[cfg(test)]
    pub(crate) fn break_storage(&self) {
        self.lock()
            .conn
            .execute_batch("DROP TABLE pinned_certificates;")
            .unwrap();
    }
}

fn load_pins(conn: &Connection) -> Result<HashMap<GatewayId, PinnedCertificate>> {
    let mut stmt = conn
        .prepare("SELECT gateway, fingerprint, pinned_at FROM pinned_certificates")
        .map_err(db_err)?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(db_err)?;

    let mut pins = HashMap::new();
    for row in rows {
        let (gateway, fingerprint, pinned_at) = row.map_err(db_err)?;
        let gateway = GatewayId::new(gateway)
            .map_err(|_| GatelinkError::Database("corrupt pin row: gateway".into()))?;
        let fingerprint = Fingerprint::from_hex(&fingerprint).map_err(|_| {
            GatelinkError::Database(format!("corrupt pin row for {gateway}: fingerprint"))
        })?;
        let pinned_at = DateTime::parse_from_rfc3339(&pinned_at)
            .map_err(|_| {
                GatelinkError::Database(format!("corrupt pin row for {gateway}: pinned_at"))
            })?
            .with_timezone(&Utc);
        pins.insert(
            gateway.clone(),
            PinnedCertificate {
                gateway,
                fingerprint,
                pinned_at,
            },
        );
    }
    Ok(pins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint_der;

    fn make_store() -> CertificateTrustStore {
        CertificateTrustStore::open_in_memory().expect("open in-memory trust store")
    }

    fn gw(name: &str) -> GatewayId {
        GatewayId::new(name).unwrap()
    }

    #[test]
    fn pin_then_lookup() {
        let store = make_store();
        let fp = fingerprint_der(b"cert-a");
        assert_eq!(store.lookup(&gw("gw.local")), None);

        let outcome = store.pin(&gw("gw.local"), fp).unwrap();
        assert!(matches!(outcome, PinOutcome::Pinned(_)));
        assert_eq!(store.lookup(&gw("gw.local")), Some(fp));
    }

    #[test]
    fn conflicting_pin_is_rejected_and_original_kept() {
        let store = make_store();
        let f1 = fingerprint_der(b"cert-a");
        let f2 = fingerprint_der(b"cert-b");
        store.pin(&gw("gw.local"), f1).unwrap();

        assert!(matches!(
            store.pin(&gw("gw.local"), f2),
            Err(GatelinkError::PinConflict)
        ));
        assert_eq!(store.lookup(&gw("gw.local")), Some(f1));
    }

    #[test]
    fn repin_same_fingerprint_is_idempotent() {
        let store = make_store();
        let fp = fingerprint_der(b"cert-a");
        let first = store.pin(&gw("gw.local"), fp).unwrap();
        let second = store.pin(&gw("gw.local"), fp).unwrap();

        assert!(matches!(second, PinOutcome::AlreadyPinned(_)));
        assert_eq!(first.pin().pinned_at, second.pin().pinned_at);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_reports_existence() {
        let store = make_store();
        store.pin(&gw("gw.local"), fingerprint_der(b"x")).unwrap();
        assert!(store.remove(&gw("gw.local")).unwrap());
        assert!(!store.remove(&gw("gw.local")).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn list_is_sorted_by_gateway() {
        let store = make_store();
        store.pin(&gw("zeta.lan"), fingerprint_der(b"z")).unwrap();
        store.pin(&gw("alpha.lan"), fingerprint_der(b"a")).unwrap();
        let names: Vec<_> = store
            .list()
            .into_iter()
            .map(|p| p.gateway.to_string())
            .collect();
        assert_eq!(names, ["alpha.lan", "zeta.lan"]);
    }

    #[test]
    fn pins_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.db");
        let fp = fingerprint_der(b"persisted");
        {
            let store = CertificateTrustStore::open(&path).unwrap();
            store.pin(&gw("gw.local"), fp).unwrap();
        }
        let reopened = CertificateTrustStore::open(&path).unwrap();
        assert_eq!(reopened.lookup(&gw("gw.local")), Some(fp));
    }

    #[test]
    fn corrupt_row_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(SCHEMA).unwrap();
            conn.execute(
                "INSERT INTO pinned_certificates VALUES ('gw.local', 'not-hex', '2026-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
        }
        assert!(CertificateTrustStore::open(&path).is_err());
    }
}
