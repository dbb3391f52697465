// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end trust lifecycle against on-disk stores:
// first use → silent match → certificate change rejected → still rejected
// until the pin is removed → pinned again on next first use.

use std::sync::Arc;

use gatelink_core::error::GatelinkError;
use gatelink_core::{EventType, GatewayId, Severity};
use gatelink_security::{
    AuditFilter, AuditLog, CertificateTrustStore, SessionState, TlsVerificationSession,
    TrustPolicy, fingerprint_der,
};

const ORIGINAL_CERT: &[u8] = b"\x30\x82\x02\x10original-gateway-leaf";
const ROTATED_CERT: &[u8] = b"\x30\x82\x02\x10rotated-gateway-leaf";

fn critical_tls_events(audit: &AuditLog) -> usize {
    audit
        .events(
            &AuditFilter::default()
                .event_type(EventType::TlsVerification)
                .min_severity(Severity::Critical),
        )
        .len()
}

#[test]
fn tofu_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CertificateTrustStore::open(dir.path().join("trust.db")).unwrap());
    let audit = Arc::new(AuditLog::open(dir.path().join("audit.db"), 1000).unwrap());
    let gateway = GatewayId::new("home-gateway.lan:18789").unwrap();

    let session = || {
        TlsVerificationSession::new(
            gateway.clone(),
            TrustPolicy::default(),
            store.clone(),
            audit.clone(),
        )
    };

    // 1. First contact pins the certificate.
    let first = session().verify(&[ORIGINAL_CERT]).unwrap();
    assert!(first.first_use);
    assert_eq!(store.lookup(&gateway), Some(fingerprint_der(ORIGINAL_CERT)));
    let after_pin = audit.len();

    // 2. Same certificate again: trusted, no new audit entry.
    let again = session().verify(&[ORIGINAL_CERT]).unwrap();
    assert!(!again.first_use);
    assert_eq!(audit.len(), after_pin);

    // 3. Certificate changes: rejected, exactly one critical entry.
    let mut rejected = session();
    assert!(matches!(
        rejected.verify(&[ROTATED_CERT]),
        Err(GatelinkError::TrustViolation)
    ));
    assert_eq!(rejected.state(), SessionState::Rejected);
    assert_eq!(critical_tls_events(&audit), 1);

    // 4. Still rejected on every attempt until the user removes the pin.
    assert!(session().verify(&[ROTATED_CERT]).is_err());
    assert_eq!(critical_tls_events(&audit), 2);
    assert_eq!(store.lookup(&gateway), Some(fingerprint_der(ORIGINAL_CERT)));

    // 5. Explicit removal re-enables trust on first use.
    assert!(store.remove(&gateway).unwrap());
    let repinned = session().verify(&[ROTATED_CERT]).unwrap();
    assert!(repinned.first_use);
    assert_eq!(store.lookup(&gateway), Some(fingerprint_der(ROTATED_CERT)));

    // Nothing in the journal carries a full fingerprint.
    for event in audit.events(&AuditFilter::default()) {
        assert!(!event.redacted_details().contains(&fingerprint_der(ORIGINAL_CERT).to_hex()));
        assert!(!event.redacted_details().contains(&fingerprint_der(ROTATED_CERT).to_hex()));
    }
}

#[test]
fn pins_and_journal_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = GatewayId::new("gw.example.net").unwrap();
    {
        let store = Arc::new(CertificateTrustStore::open(dir.path().join("trust.db")).unwrap());
        let audit = Arc::new(AuditLog::open(dir.path().join("audit.db"), 1000).unwrap());
        TlsVerificationSession::new(gateway.clone(), TrustPolicy::default(), store, audit)
            .verify(&[ORIGINAL_CERT])
            .unwrap();
    }

    let store = Arc::new(CertificateTrustStore::open(dir.path().join("trust.db")).unwrap());
    let audit = Arc::new(AuditLog::open(dir.path().join("audit.db"), 1000).unwrap());
    assert_eq!(audit.len(), 1);

    let err = TlsVerificationSession::new(gateway, TrustPolicy::default(), store, audit.clone())
        .verify(&[ROTATED_CERT])
        .unwrap_err();
    assert!(err.is_trust_violation());
    assert_eq!(critical_tls_events(&audit), 1);
}

#[test]
fn concurrent_first_contact_pins_exactly_one_certificate() {
    let store = Arc::new(CertificateTrustStore::open_in_memory().unwrap());
    let audit = Arc::new(AuditLog::open_in_memory(1000).unwrap());
    let gateway = GatewayId::new("race.lan").unwrap();

    let handles: Vec<_> = [ORIGINAL_CERT, ROTATED_CERT]
        .into_iter()
        .cycle()
        .take(8)
        .map(|cert| {
            let (store, audit, gateway) = (store.clone(), audit.clone(), gateway.clone());
            std::thread::spawn(move || {
                TlsVerificationSession::new(gateway, TrustPolicy::default(), store, audit)
                    .verify(&[cert])
                    .map(|v| v.fingerprint)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let pinned = store.lookup(&gateway).unwrap();

    for result in results {
        match result {
            Ok(fp) => assert_eq!(fp, pinned),
            Err(e) => assert!(e.is_trust_violation()),
        }
    }
}
