// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Gatelink.
//
// Display strings are deliberately terse. The trust variants in particular
// never carry fingerprints or certificate bytes; the detail for a rejected
// handshake lives in the redacted audit trail only.

use thiserror::Error;

/// Top-level error type for all Gatelink operations.
#[derive(Debug, Error)]
pub enum GatelinkError {
    // -- Trust errors --
    #[error("certificate verification failed")]
    TrustViolation,

    #[error("unknown certificate")]
    UnknownCertificate,

    #[error("gateway is already pinned to a different certificate")]
    PinConflict,

    #[error("verification session has already finished")]
    SessionFinished,

    #[error("empty certificate chain")]
    EmptyCertificateChain,

    // -- Format errors --
    #[error("malformed gateway address")]
    InvalidGatewayId,

    #[error("invalid certificate fingerprint")]
    InvalidFingerprint,

    #[error("invalid pairing code format")]
    InvalidCodeFormat,

    // -- Pairing / transport --
    #[error("no trusted gateway connection")]
    GatewayNotConnected,

    #[error("gateway did not respond in time")]
    Timeout,

    #[error("gateway rejected the request")]
    ServerRejected,

    #[error("operation cancelled")]
    Cancelled,

    #[error("gateway connection failed: {0}")]
    Connection(String),

    #[error("gateway protocol error: {0}")]
    Protocol(String),

    // -- Vault / key material --
    #[error("refusing to store an empty secret")]
    EmptySecret,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("device identity key error: {0}")]
    Identity(String),

    #[error("redaction rules failed to compile: {0}")]
    Redaction(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Platform bridge --
    #[error("platform bridge error: {0}")]
    Bridge(String),

    #[error("feature not available on this platform")]
    PlatformUnavailable,
}

impl GatelinkError {
    /// True for failures that mean the peer is not who we pinned.
    pub fn is_trust_violation(&self) -> bool {
        matches!(self, Self::TrustViolation)
    }

    /// True for input validation failures raised before any I/O.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidGatewayId | Self::InvalidFingerprint | Self::InvalidCodeFormat
        )
    }

    /// True for storage failures that must not undo an otherwise
    /// successful operation.
    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Io(_) | Self::Bridge(_))
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, GatelinkError>;
