// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Process-local keychain.
//
// Nothing survives the process. Used by tests and by tooling that must not
// touch the real device keychain. Values are zeroed when replaced or removed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use zeroize::Zeroizing;

use gatelink_core::AccessibilityTier;
use gatelink_core::error::{GatelinkError, Result};

use crate::traits::NativeKeychain;

struct Entry {
    value: Zeroizing<Vec<u8>>,
    tier: AccessibilityTier,
}

/// In-memory `NativeKeychain`.
#[derive(Default)]
pub struct MemoryKeychain {
    entries: Mutex<HashMap<String, Entry>>,
    fail_writes: AtomicBool,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `store_secret` fail with a bridge error.
    /// Lets tests exercise the "write failed" paths of callers.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Accessibility tier recorded for `key`, if present.
    pub fn tier_of(&self, key: &str) -> Option<AccessibilityTier> {
        self.lock().get(key).map(|e| e.tier)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NativeKeychain for MemoryKeychain {
    fn backend_name(&self) -> &str {
        "memory"
    }

    fn store_secret(&self, key: &str, value: &[u8], tier: AccessibilityTier) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GatelinkError::Bridge("memory keychain write disabled".into()));
        }
        self.lock().insert(
            key.to_owned(),
            Entry {
                value: Zeroizing::new(value.to_vec()),
                tier,
            },
        );
        Ok(())
    }

    fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().get(key).map(|e| e.value.to_vec()))
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_load_delete() {
        let kc = MemoryKeychain::new();
        kc.store_secret("gw/token", b"abc", AccessibilityTier::WhenUnlocked)
            .unwrap();
        assert_eq!(kc.load_secret("gw/token").unwrap().as_deref(), Some(&b"abc"[..]));
        assert_eq!(kc.tier_of("gw/token"), Some(AccessibilityTier::WhenUnlocked));

        kc.store_secret("gw/token", b"xyz", AccessibilityTier::default())
            .unwrap();
        assert_eq!(kc.load_secret("gw/token").unwrap().as_deref(), Some(&b"xyz"[..]));

        kc.delete_secret("gw/token").unwrap();
        assert_eq!(kc.load_secret("gw/token").unwrap(), None);
        // Deleting again is fine.
        kc.delete_secret("gw/token").unwrap();
    }

    #[test]
    fn injected_write_failure() {
        let kc = MemoryKeychain::new();
        kc.set_fail_writes(true);
        assert!(kc.store_secret("k", b"v", AccessibilityTier::default()).is_err());
        assert!(kc.is_empty());
    }
}
