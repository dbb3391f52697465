// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::AccessibilityTier;

/// Persistent application settings, stored as `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Pin a gateway's certificate automatically on first contact.
    /// When false, unknown gateways are refused.
    pub tofu_enabled: bool,
    /// Upper bound on the whole pairing exchange, in seconds.
    pub pairing_timeout_secs: u64,
    /// How many audit events are retained (most recent first).
    pub audit_retention: usize,
    /// Accessibility tier applied to credentials written by pairing.
    pub credential_tier: AccessibilityTier,
    /// Environment variable holding the desktop vault passphrase.
    pub vault_passphrase_env: String,
}

impl AppConfig {
    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tofu_enabled: true,
            pairing_timeout_secs: 30,
            audit_retention: 1000,
            credential_tier: AccessibilityTier::default(),
            vault_passphrase_env: "GATELINK_VAULT_PASSPHRASE".into(),
        }
    }
}
