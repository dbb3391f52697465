// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-agnostic keychain trait.

use gatelink_core::AccessibilityTier;
use gatelink_core::error::Result;

/// Secure key storage in the platform keychain / keystore.
///
/// Keys are opaque account names chosen by the caller. Implementations must
/// replace an existing value atomically: a reader sees either the old bytes
/// or the new bytes, never a mix.
pub trait NativeKeychain: Send + Sync {
    /// Short backend name for diagnostics (e.g. "ios-keychain").
    fn backend_name(&self) -> &str;

    /// Store a secret under the given key, replacing any existing value.
    fn store_secret(&self, key: &str, value: &[u8], tier: AccessibilityTier) -> Result<()>;

    /// Retrieve a secret by key. Returns None if not found.
    fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a secret by key. Succeeds if the key does not exist.
    fn delete_secret(&self, key: &str) -> Result<()>;
}
