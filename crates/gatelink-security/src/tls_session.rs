// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// TLS verification session: trust-on-first-use policy for one connection.
//
//   AwaitingHandshake ──verify──▶ Verifying ──▶ Trusted
//                                          └──▶ Rejected
//
// Trusted and Rejected are terminal. The leaf certificate is fingerprinted
// (SHA-256 over DER) and compared with the trust store:
//
//   no pin, TOFU on   → pin it, Trusted, audit tlsVerification/info
//   pin matches       → Trusted, debug trace only
//   pin differs       → Rejected, one tlsVerification/critical entry
//   no pin, TOFU off  → Rejected ("unknown certificate"), tlsVerification/error
//
// There is no fallback path: a rejected session stays rejected, and only
// removing the stale pin from the trust store lets the gateway be pinned
// again.
//
// `GatewayCertVerifier` plugs a session into rustls as its
// `ServerCertVerifier`. Chain building and CA validation are not performed;
// the pin is the trust anchor. Handshake signatures are still checked with
// the ring provider so the peer must hold the pinned certificate's key, and
// a first-use pin is only written once that check has passed.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::Resumption;
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, SignatureScheme};
use tracing::{debug, error};

use gatelink_core::error::{GatelinkError, Result};
use gatelink_core::{EventType, Fingerprint, GatewayId, Severity};

use crate::audit::AuditLog;
use crate::fingerprint::fingerprint_der;
use crate::trust_store::{CertificateTrustStore, PinOutcome};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Where a session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHandshake,
    Verifying,
    Trusted,
    Rejected,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Trusted | Self::Rejected)
    }
}

/// Policy knobs for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustPolicy {
    /// Pin unknown gateways on first contact.
    pub tofu_enabled: bool,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self { tofu_enabled: true }
    }
}

/// A successful verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verified {
    pub fingerprint: Fingerprint,
    /// True when this handshake created the pin.
    pub first_use: bool,
}

/// Why a session ended in `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The presented certificate differs from the pinned one.
    Mismatch,
    /// No pin exists and trust-on-first-use is disabled.
    UnknownCertificate,
    EmptyChain,
    /// First contact, but the pin could not be written.
    PinNotSaved,
    /// The peer could not prove it holds the certificate's key.
    BadSignature,
}

impl Rejection {
    /// The error a caller outside the handshake should see.
    pub fn to_error(self) -> GatelinkError {
        match self {
            Self::Mismatch => GatelinkError::TrustViolation,
            Self::UnknownCertificate => GatelinkError::UnknownCertificate,
            Self::EmptyChain => GatelinkError::EmptyCertificateChain,
            Self::PinNotSaved => {
                GatelinkError::Database("certificate pin could not be saved".into())
            }
            Self::BadSignature => {
                GatelinkError::Connection("handshake signature check failed".into())
            }
        }
    }
}

/// A leaf that passed inspection and waits for `confirm`.
#[derive(Debug, Clone, Copy)]
enum Pending {
    Matched(Fingerprint),
    FirstUse(Fingerprint),
}

/// Handshake-time policy engine for a single connection attempt.
pub struct TlsVerificationSession {
    gateway: GatewayId,
    policy: TrustPolicy,
    store: Arc<CertificateTrustStore>,
    audit: Arc<AuditLog>,
    state: SessionState,
    presented: Option<Fingerprint>,
    pending: Option<Pending>,
    rejection: Option<Rejection>,
}

impl fmt::Debug for TlsVerificationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsVerificationSession")
            .field("gateway", &self.gateway)
            .field("policy", &self.policy)
            .field("state", &self.state)
            .field("presented", &self.presented)
            .field("rejection", &self.rejection)
            .finish()
    }
}

impl TlsVerificationSession {
    pub fn new(
        gateway: GatewayId,
        policy: TrustPolicy,
        store: Arc<CertificateTrustStore>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            gateway,
            policy,
            store,
            audit,
            state: SessionState::AwaitingHandshake,
            presented: None,
            pending: None,
            rejection: None,
        }
    }

    pub fn gateway(&self) -> &GatewayId {
        &self.gateway
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Fingerprint of the leaf presented during verification, if any.
    pub fn presented_fingerprint(&self) -> Option<Fingerprint> {
        self.presented
    }

    /// Set once the session is `Rejected`.
    pub fn rejection(&self) -> Option<Rejection> {
        self.rejection
    }

    /// Evaluate the peer's chain (leaf first, DER-encoded) and settle the
    /// verdict in one step.
    ///
    /// Only the leaf is considered. Calling this on a session that already
    /// reached a verdict fails with `SessionFinished` and changes nothing.
    pub fn verify<C: AsRef<[u8]>>(&mut self, chain: &[C]) -> Result<Verified> {
        self.inspect(chain)?;
        self.confirm()
    }

    /// Check the leaf against the trust store without writing anything.
    ///
    /// A mismatch, an unknown certificate with TOFU off, or an empty chain
    /// rejects the session here. Otherwise it stays `Verifying` until
    /// [`confirm`](Self::confirm) or [`abandon`](Self::abandon).
    pub fn inspect<C: AsRef<[u8]>>(&mut self, chain: &[C]) -> Result<()> {
        if self.state != SessionState::AwaitingHandshake {
            return Err(GatelinkError::SessionFinished);
        }
        self.state = SessionState::Verifying;

        let pending = match chain.first() {
            Some(leaf) => self.evaluate(fingerprint_der(leaf.as_ref()))?,
            None => {
                self.record(
                    Severity::Error,
                    format!("rejected {}: peer sent no certificate", self.gateway),
                );
                return Err(
                    self.reject(Rejection::EmptyChain, GatelinkError::EmptyCertificateChain)
                );
            }
        };
        self.pending = Some(pending);
        Ok(())
    }

    /// Accept the inspected leaf, pinning it on first contact.
    pub fn confirm(&mut self) -> Result<Verified> {
        let verified = match self.pending.take() {
            Some(Pending::Matched(fingerprint)) => Ok(Verified {
                fingerprint,
                first_use: false,
            }),
            Some(Pending::FirstUse(presented)) => self.trust_on_first_use(presented),
            None => return Err(GatelinkError::SessionFinished),
        };
        if verified.is_ok() {
            self.state = SessionState::Trusted;
        }
        verified
    }

    /// Reject an inspected leaf whose holder failed the handshake
    /// signature check. Nothing is pinned.
    pub fn abandon(&mut self) {
        if self.pending.take().is_none() {
            return;
        }
        self.record(
            Severity::Error,
            format!("rejected {}: handshake signature check failed", self.gateway),
        );
        self.state = SessionState::Rejected;
        self.rejection = Some(Rejection::BadSignature);
    }

    fn evaluate(&mut self, presented: Fingerprint) -> Result<Pending> {
        self.presented = Some(presented);

        match self.store.lookup(&self.gateway) {
            Some(pinned) if pinned == presented => {
                debug!(
                    gateway = %self.gateway,
                    fingerprint = %presented.truncated(),
                    "certificate matches pin"
                );
                Ok(Pending::Matched(presented))
            }
            Some(pinned) => Err(self.mismatch(pinned, presented)),
            None if self.policy.tofu_enabled => Ok(Pending::FirstUse(presented)),
            None => {
                self.record(
                    Severity::Error,
                    format!(
                        "rejected {}: unknown certificate {} and trust-on-first-use is disabled",
                        self.gateway, presented
                    ),
                );
                Err(self.reject(
                    Rejection::UnknownCertificate,
                    GatelinkError::UnknownCertificate,
                ))
            }
        }
    }

    fn trust_on_first_use(&mut self, presented: Fingerprint) -> Result<Verified> {
        match self.store.pin(&self.gateway, presented) {
            Ok(PinOutcome::Pinned(_)) => {
                self.record(
                    Severity::Info,
                    format!("pinned certificate {} for {} on first use", presented, self.gateway),
                );
                Ok(Verified {
                    fingerprint: presented,
                    first_use: true,
                })
            }
            // Another session pinned the same certificate since inspection.
            Ok(PinOutcome::AlreadyPinned(_)) => Ok(Verified {
                fingerprint: presented,
                first_use: false,
            }),
            Err(GatelinkError::PinConflict) => {
                let pinned = self.store.lookup(&self.gateway).unwrap_or(presented);
                Err(self.mismatch(pinned, presented))
            }
            Err(e) => {
                self.record(
                    Severity::Error,
                    format!("rejected {}: pin could not be saved ({e})", self.gateway),
                );
                Err(self.reject(Rejection::PinNotSaved, e))
            }
        }
    }

    fn mismatch(&mut self, pinned: Fingerprint, presented: Fingerprint) -> GatelinkError {
        error!(
            gateway = %self.gateway,
            pinned = %pinned.truncated(),
            presented = %presented.truncated(),
            "certificate does not match pin"
        );
        self.record(
            Severity::Critical,
            format!(
                "certificate mismatch for {}: pinned {} but presented {}",
                self.gateway, pinned, presented
            ),
        );
        self.reject(Rejection::Mismatch, GatelinkError::TrustViolation)
    }

    fn reject(&mut self, rejection: Rejection, err: GatelinkError) -> GatelinkError {
        self.state = SessionState::Rejected;
        self.rejection = Some(rejection);
        err
    }

    fn record(&self, severity: Severity, details: String) {
        self.audit.log(EventType::TlsVerification, &details, severity);
    }
}

// ---------------------------------------------------------------------------
// rustls integration
// ---------------------------------------------------------------------------

/// rustls verifier for one connection attempt.
///
/// Build a fresh one per connection. The leaf is inspected when rustls
/// presents it and the verdict is settled by the handshake signature check
/// that follows; after the handshake, `state()` and `rejection()` report it.
pub struct GatewayCertVerifier {
    session: Mutex<TlsVerificationSession>,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for GatewayCertVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCertVerifier")
            .field("state", &self.state())
            .finish()
    }
}

impl GatewayCertVerifier {
    pub fn new(session: TlsVerificationSession) -> Self {
        Self::with_provider(session, Arc::new(rustls::crypto::ring::default_provider()))
    }

    pub fn with_provider(session: TlsVerificationSession, provider: Arc<CryptoProvider>) -> Self {
        Self {
            session: Mutex::new(session),
            provider,
        }
    }

    fn session(&self) -> MutexGuard<'_, TlsVerificationSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.session().state()
    }

    pub fn presented_fingerprint(&self) -> Option<Fingerprint> {
        self.session().presented_fingerprint()
    }

    pub fn rejection(&self) -> Option<Rejection> {
        self.session().rejection()
    }

    pub fn provider(&self) -> &Arc<CryptoProvider> {
        &self.provider
    }

    /// Settle an inspected leaf with the outcome of the signature check.
    fn conclude(
        &self,
        signature: std::result::Result<HandshakeSignatureValid, rustls::Error>,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        let mut session = self.session();
        match signature {
            Ok(valid) if session.state() == SessionState::Verifying => {
                session.confirm().map(|_| valid).map_err(to_tls_error)
            }
            Ok(valid) => Ok(valid),
            Err(e) => {
                session.abandon();
                Err(e)
            }
        }
    }
}

fn to_tls_error(err: GatelinkError) -> rustls::Error {
    match err {
        GatelinkError::TrustViolation => {
            rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure)
        }
        GatelinkError::UnknownCertificate => {
            rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer)
        }
        GatelinkError::EmptyCertificateChain => rustls::Error::NoCertificatesPresented,
        other => rustls::Error::General(other.to_string()),
    }
}

impl ServerCertVerifier for GatewayCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        self.session()
            .inspect(&[end_entity.as_ref()])
            .map(|()| ServerCertVerified::assertion())
            .map_err(to_tls_error)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.conclude(verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        ))
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.conclude(verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        ))
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Client configuration that trusts exactly what `verifier` accepts.
///
/// Session resumption is disabled so every connection goes through
/// certificate verification.
pub fn client_config(verifier: Arc<GatewayCertVerifier>) -> Result<ClientConfig> {
    let mut config = ClientConfig::builder_with_provider(verifier.provider().clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| GatelinkError::Connection(format!("TLS setup failed: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    config.resumption = Resumption::disabled();
    Ok(config)
}
