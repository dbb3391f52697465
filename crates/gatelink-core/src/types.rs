// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Gatelink trust engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GatelinkError, Result};

/// Longest gateway identifier accepted, in bytes (the DNS name limit).
pub const MAX_GATEWAY_ID_LEN: usize = 253;

/// Length of a certificate fingerprint in bytes (SHA-256).
pub const FINGERPRINT_LEN: usize = 32;

/// Number of hex characters kept when a fingerprint is shown truncated.
pub const FINGERPRINT_DISPLAY_CHARS: usize = 8;

// ---------------------------------------------------------------------------
// Gateway identity
// ---------------------------------------------------------------------------

/// Opaque, stable identifier for one gateway. Unique within the device.
///
/// Typically the host name (or `host:port`) the user connected to. Any
/// identifier that is empty, too long, or contains whitespace or control
/// characters is rejected before network activity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GatewayId(String);

impl GatewayId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let malformed = id.is_empty()
            || id.len() > MAX_GATEWAY_ID_LEN
            || id.chars().any(|c| c.is_whitespace() || c.is_control());
        if malformed {
            return Err(GatelinkError::InvalidGatewayId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GatewayId {
    type Error = GatelinkError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<GatewayId> for String {
    fn from(id: GatewayId) -> Self {
        id.0
    }
}

impl FromStr for GatewayId {
    type Err = GatelinkError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// SHA-256 digest of a leaf certificate's DER encoding.
///
/// `Display` renders the full lowercase hex (used for persistence). `Debug`
/// renders only the truncated form so fingerprints stay out of logs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Full 64-character lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string (either case).
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; FINGERPRINT_LEN];
        hex::decode_to_slice(s.trim(), &mut bytes).map_err(|_| GatelinkError::InvalidFingerprint)?;
        Ok(Self(bytes))
    }

    /// First eight hex characters followed by an ellipsis, e.g. `3f9a12bc…`.
    pub fn truncated(&self) -> String {
        let hex = self.to_hex();
        format!("{}…", &hex[..FINGERPRINT_DISPLAY_CHARS])
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = GatelinkError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_hex()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.truncated())
    }
}

/// The single fingerprint trusted for a gateway, and when it was pinned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedCertificate {
    pub gateway: GatewayId,
    pub fingerprint: Fingerprint,
    pub pinned_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// What a stored credential is for. One entry per (gateway, kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialKind {
    Token,
    Password,
    DeviceIdentity,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 3] = [Self::Token, Self::Password, Self::DeviceIdentity];

    /// Stable key fragment used in keychain account names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Password => "password",
            Self::DeviceIdentity => "device-identity",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a stored secret may be read, and whether it may leave the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessibilityTier {
    WhenUnlocked,
    AfterFirstUnlock,
    WhenUnlockedThisDeviceOnly,
    /// Usable after the first unlock since boot; never exported in backups.
    #[default]
    AfterFirstUnlockThisDeviceOnly,
    WhenPasscodeSetThisDeviceOnly,
}

impl AccessibilityTier {
    /// True when the platform must never migrate the secret to another device.
    pub fn is_device_bound(&self) -> bool {
        matches!(
            self,
            Self::WhenUnlockedThisDeviceOnly
                | Self::AfterFirstUnlockThisDeviceOnly
                | Self::WhenPasscodeSetThisDeviceOnly
        )
    }
}

// ---------------------------------------------------------------------------
// Audit vocabulary
// ---------------------------------------------------------------------------

/// Unique identifier for an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of a security-relevant event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    Connection,
    TlsVerification,
    Authentication,
    PermissionRequest,
    DataAccess,
    ConfigurationChange,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::TlsVerification => "tls_verification",
            Self::Authentication => "authentication",
            Self::PermissionRequest => "permission_request",
            Self::DataAccess => "data_access",
            Self::ConfigurationChange => "configuration_change",
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "connection" => Ok(Self::Connection),
            "tls_verification" | "tlsverification" | "tls" => Ok(Self::TlsVerification),
            "authentication" | "auth" => Ok(Self::Authentication),
            "permission_request" | "permissionrequest" => Ok(Self::PermissionRequest),
            "data_access" | "dataaccess" => Ok(Self::DataAccess),
            "configuration_change" | "configurationchange" | "config" => {
                Ok(Self::ConfigurationChange)
            }
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit severity. Ordered: `Info < Warning < Error < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_id_rejects_malformed_input() {
        assert!(GatewayId::new("home.example.net:18789").is_ok());
        assert!(GatewayId::new("").is_err());
        assert!(GatewayId::new("has space").is_err());
        assert!(GatewayId::new("tab\there").is_err());
        assert!(GatewayId::new("a".repeat(MAX_GATEWAY_ID_LEN + 1)).is_err());
    }

    #[test]
    fn gateway_id_deserialization_validates() {
        let ok: GatewayId = serde_json::from_str("\"gw.local\"").unwrap();
        assert_eq!(ok.as_str(), "gw.local");
        assert!(serde_json::from_str::<GatewayId>("\"\"").is_err());
    }

    #[test]
    fn fingerprint_hex_parsing() {
        let hex = "AB".repeat(32);
        let fp = Fingerprint::from_hex(&hex).unwrap();
        assert_eq!(fp.to_hex(), hex.to_ascii_lowercase());
        assert!(Fingerprint::from_hex("abcd").is_err());
        assert!(Fingerprint::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn fingerprint_debug_is_truncated() {
        let fp = Fingerprint::from_bytes([0x3f; FINGERPRINT_LEN]);
        assert_eq!(fp.truncated(), "3f3f3f3f…");
        let debug = format!("{fp:?}");
        assert!(!debug.contains(&fp.to_hex()));
        assert!(debug.contains("3f3f3f3f…"));
    }

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
    }

    #[test]
    fn event_type_round_trips_through_str() {
        for ty in [
            EventType::Connection,
            EventType::TlsVerification,
            EventType::Authentication,
            EventType::PermissionRequest,
            EventType::DataAccess,
            EventType::ConfigurationChange,
        ] {
            assert_eq!(ty.as_str().parse::<EventType>().unwrap(), ty);
        }
    }

    #[test]
    fn default_tier_is_device_bound() {
        assert_eq!(
            AccessibilityTier::default(),
            AccessibilityTier::AfterFirstUnlockThisDeviceOnly
        );
        assert!(AccessibilityTier::default().is_device_bound());
        assert!(!AccessibilityTier::AfterFirstUnlock.is_device_bound());
    }
}
