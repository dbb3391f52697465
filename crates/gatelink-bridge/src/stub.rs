// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stub keychain for desktop/CI builds where native mobile APIs are unavailable.
//
// Every method returns `PlatformUnavailable`. Real implementations live in
// the `ios` and `android` modules.

use gatelink_core::AccessibilityTier;
use gatelink_core::error::{GatelinkError, Result};

use crate::traits::NativeKeychain;

/// Keychain returned on non-mobile platforms.
pub struct StubKeychain;

impl NativeKeychain for StubKeychain {
    fn backend_name(&self) -> &str {
        "stub"
    }

    fn store_secret(&self, _key: &str, _value: &[u8], _tier: AccessibilityTier) -> Result<()> {
        tracing::warn!("NativeKeychain::store_secret called on stub keychain");
        Err(GatelinkError::PlatformUnavailable)
    }

    fn load_secret(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        tracing::warn!("NativeKeychain::load_secret called on stub keychain");
        Err(GatelinkError::PlatformUnavailable)
    }

    fn delete_secret(&self, _key: &str) -> Result<()> {
        Err(GatelinkError::PlatformUnavailable)
    }
}
