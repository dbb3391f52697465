// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// gatelink-security: trust and secrecy primitives.
//
// Certificate fingerprinting and the trust-on-first-use pin store, the
// per-connection verification session (and its rustls verifier), the
// credential vault over the platform keychain, device identity keys, and the
// redacting audit log that every other component writes to.

pub mod audit;
pub mod fingerprint;
pub mod identity;
pub mod redact;
pub mod storage;
pub mod tls_session;
pub mod trust_store;
pub mod vault;

pub use audit::{AuditEvent, AuditFilter, AuditLog};
pub use fingerprint::{fingerprint_der, parse_fingerprint};
pub use identity::DeviceIdentity;
pub use redact::Redactor;
pub use storage::{EncryptedFileKeychain, EncryptedStorage};
pub use tls_session::{
    GatewayCertVerifier, Rejection, SessionState, TlsVerificationSession, TrustPolicy,
    Verified, client_config,
};
pub use trust_store::{CertificateTrustStore, PinOutcome};
pub use vault::{CredentialVault, SecretValue};
