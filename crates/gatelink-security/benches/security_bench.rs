// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for redaction, audit logging, fingerprinting and the
// matching-pin handshake path in gatelink-security.

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use gatelink_core::{EventType, GatewayId, Severity};
use gatelink_security::{
    AuditLog, CertificateTrustStore, Redactor, TlsVerificationSession, TrustPolicy,
    fingerprint_der,
};

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// Redaction of a typical mismatch message (two fingerprints) and of a
/// message with nothing to redact.
fn bench_redact(c: &mut Criterion) {
    let redactor = Redactor::new().expect("redaction rules compile");
    let mismatch = format!(
        "certificate mismatch for gw.local: pinned {} but presented {}",
        "3f9a12bc".repeat(8),
        "77e01d4a".repeat(8)
    );
    let plain = "pairing failed for gw.local: timeout after 30s";

    let mut group = c.benchmark_group("redact");
    group.bench_function("mismatch message", |b| {
        b.iter(|| black_box(redactor.redact(black_box(&mismatch))));
    });
    group.bench_function("clean message", |b| {
        b.iter(|| black_box(redactor.redact(black_box(plain))));
    });
    group.finish();
}

/// Steady-state `log` into an in-memory SQLite store at full retention.
fn bench_audit_log(c: &mut Criterion) {
    c.bench_function("audit_log (in-memory SQLite)", |b| {
        let log = AuditLog::open_in_memory(1000).expect("open in-memory audit log");
        b.iter(|| {
            log.log(
                black_box(EventType::Authentication),
                black_box("pairing failed: serverRejected for gw.local"),
                black_box(Severity::Warning),
            );
        });
    });
}

/// SHA-256 fingerprint of a certificate-sized buffer.
fn bench_fingerprint(c: &mut Criterion) {
    let der = vec![0x30u8; 1400];
    c.bench_function("fingerprint_der (1.4 KiB)", |b| {
        b.iter(|| black_box(fingerprint_der(black_box(&der))));
    });
}

/// A full session on the hot path: pin already present and matching.
fn bench_matching_session(c: &mut Criterion) {
    let store = Arc::new(CertificateTrustStore::open_in_memory().expect("trust store"));
    let audit = Arc::new(AuditLog::open_in_memory(1000).expect("audit log"));
    let gateway = GatewayId::new("gw.local").expect("gateway id");
    let leaf = vec![0x30u8; 1400];
    store
        .pin(&gateway, fingerprint_der(&leaf))
        .expect("initial pin");

    c.bench_function("tls session (matching pin)", |b| {
        b.iter(|| {
            let mut session = TlsVerificationSession::new(
                gateway.clone(),
                TrustPolicy::default(),
                store.clone(),
                audit.clone(),
            );
            black_box(session.verify(&[leaf.as_slice()]).expect("trusted"));
        });
    });
}

criterion_group!(
    benches,
    bench_redact,
    bench_audit_log,
    bench_fingerprint,
    bench_matching_session,
);
criterion_main!(benches);
