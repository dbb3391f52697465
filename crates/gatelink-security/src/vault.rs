// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Credential vault: per-gateway secrets over the platform keychain.
//
// Each credential is addressed by (gateway, kind) and stored under the
// keychain account `"<gateway>/<kind>"`. Operations on the same entry are
// serialized by a per-entry lock; different entries proceed in parallel.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use gatelink_bridge::NativeKeychain;
use gatelink_core::error::{GatelinkError, Result};
use gatelink_core::{AccessibilityTier, CredentialKind, GatewayId};

/// Secret bytes, zeroed on drop and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(Zeroizing<Vec<u8>>);

impl SecretValue {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    /// The secret as UTF-8 text (tokens and passwords).
    pub fn expose_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.0)
            .map_err(|_| GatelinkError::Decryption("stored secret is not valid UTF-8".into()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SecretValue {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretValue([REDACTED; {} bytes])", self.0.len())
    }
}

type EntryKey = (GatewayId, CredentialKind);

/// Device-local storage for tokens, passwords and device identity keys.
pub struct CredentialVault {
    keychain: Arc<dyn NativeKeychain>,
    locks: Mutex<HashMap<EntryKey, Arc<Mutex<()>>>>,
}

impl CredentialVault {
    pub fn new(keychain: Arc<dyn NativeKeychain>) -> Self {
        debug!(backend = keychain.backend_name(), "credential vault ready");
        Self {
            keychain,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.keychain.backend_name()
    }

    fn account(scope: &GatewayId, kind: CredentialKind) -> String {
        format!("{scope}/{}", kind.as_str())
    }

    /// Run `op` on the keychain account for (scope, kind) while holding that
    /// entry's lock. The lock is dropped from the map once nobody else holds
    /// or waits on it.
    fn with_entry<T>(
        &self,
        scope: &GatewayId,
        kind: CredentialKind,
        op: impl FnOnce(&str) -> T,
    ) -> T {
        let key = (scope.clone(), kind);
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            op(&Self::account(scope, kind))
        };

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and `lock` remain; clones are taken under `locks`.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&key);
        }
        result
    }

    #[cfg(test)]
    fn tracked_entries(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Store `secret`, replacing any existing value for (scope, kind).
    ///
    /// Empty secrets are refused; "no credential" is expressed by `delete`.
    #[instrument(skip(self, secret), fields(gateway = %scope, kind = kind.as_str()))]
    pub fn store(
        &self,
        scope: &GatewayId,
        kind: CredentialKind,
        secret: &[u8],
        tier: AccessibilityTier,
    ) -> Result<()> {
        if secret.is_empty() {
            return Err(GatelinkError::EmptySecret);
        }
        self.with_entry(scope, kind, |account| {
            self.keychain.store_secret(account, secret, tier)
        })?;
        debug!(?tier, "credential stored");
        Ok(())
    }

    /// The secret for (scope, kind), or `None` if absent.
    ///
    /// An empty stored value counts as absent.
    #[instrument(skip(self), fields(gateway = %scope, kind = kind.as_str()))]
    pub fn retrieve(&self, scope: &GatewayId, kind: CredentialKind) -> Result<Option<SecretValue>> {
        let loaded = self.with_entry(scope, kind, |account| self.keychain.load_secret(account))?;
        Ok(loaded.map(SecretValue::new).filter(|s| !s.is_empty()))
    }

    pub fn contains(&self, scope: &GatewayId, kind: CredentialKind) -> Result<bool> {
        Ok(self.retrieve(scope, kind)?.is_some())
    }

    /// Remove (scope, kind). Succeeds if nothing was stored.
    #[instrument(skip(self), fields(gateway = %scope, kind = kind.as_str()))]
    pub fn delete(&self, scope: &GatewayId, kind: CredentialKind) -> Result<()> {
        self.with_entry(scope, kind, |account| self.keychain.delete_secret(account))?;
        debug!("credential deleted");
        Ok(())
    }

    /// Remove every credential kind for `scope` (logout / unpair).
    ///
    /// Every kind is attempted; the first failure is returned afterwards.
    pub fn delete_all(&self, scope: &GatewayId) -> Result<()> {
        let mut first_err = None;
        for kind in CredentialKind::ALL {
            if let Err(e) = self.delete(scope, kind) {
                warn!(gateway = %scope, kind = kind.as_str(), error = %e, "credential delete failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatelink_bridge::MemoryKeychain;

    fn make_vault() -> (Arc<MemoryKeychain>, CredentialVault) {
        let keychain = Arc::new(MemoryKeychain::new());
        let vault = CredentialVault::new(keychain.clone());
        (keychain, vault)
    }

    fn gw(name: &str) -> GatewayId {
        GatewayId::new(name).unwrap()
    }

    #[test]
    fn store_then_retrieve() {
        let (_, vault) = make_vault();
        vault
            .store(&gw("gw.local"), CredentialKind::Token, b"tok", AccessibilityTier::default())
            .unwrap();
        let secret = vault.retrieve(&gw("gw.local"), CredentialKind::Token).unwrap().unwrap();
        assert_eq!(secret.expose(), b"tok");
        assert_eq!(secret.expose_str().unwrap(), "tok");
    }

    #[test]
    fn absent_entry_is_none() {
        let (_, vault) = make_vault();
        assert!(vault.retrieve(&gw("gw.local"), CredentialKind::Password).unwrap().is_none());
        assert!(!vault.contains(&gw("gw.local"), CredentialKind::Password).unwrap());
    }

    #[test]
    fn empty_secret_is_refused() {
        let (keychain, vault) = make_vault();
        let err = vault
            .store(&gw("gw.local"), CredentialKind::Token, b"", AccessibilityTier::default())
            .unwrap_err();
        assert!(matches!(err, GatelinkError::EmptySecret));
        assert!(keychain.is_empty());
    }

    #[test]
    fn empty_stored_value_reads_as_absent() {
        let (keychain, vault) = make_vault();
        keychain
            .store_secret("gw.local/token", b"", AccessibilityTier::default())
            .unwrap();
        assert!(vault.retrieve(&gw("gw.local"), CredentialKind::Token).unwrap().is_none());
    }

    #[test]
    fn scopes_are_isolated() {
        let (_, vault) = make_vault();
        let tier = AccessibilityTier::default();
        vault.store(&gw("a.lan"), CredentialKind::Token, b"a", tier).unwrap();
        vault.store(&gw("b.lan"), CredentialKind::Token, b"b", tier).unwrap();
        vault.delete(&gw("a.lan"), CredentialKind::Token).unwrap();

        assert!(vault.retrieve(&gw("a.lan"), CredentialKind::Token).unwrap().is_none());
        assert_eq!(
            vault.retrieve(&gw("b.lan"), CredentialKind::Token).unwrap().unwrap().expose(),
            b"b"
        );
    }

    #[test]
    fn tier_reaches_the_keychain() {
        let (keychain, vault) = make_vault();
        vault
            .store(
                &gw("gw.local"),
                CredentialKind::Password,
                b"pw",
                AccessibilityTier::WhenPasscodeSetThisDeviceOnly,
            )
            .unwrap();
        assert_eq!(
            keychain.tier_of("gw.local/password"),
            Some(AccessibilityTier::WhenPasscodeSetThisDeviceOnly)
        );
    }

    #[test]
    fn delete_all_removes_every_kind() {
        let (keychain, vault) = make_vault();
        let tier = AccessibilityTier::default();
        for kind in CredentialKind::ALL {
            vault.store(&gw("gw.local"), kind, b"x", tier).unwrap();
        }
        vault.store(&gw("other.lan"), CredentialKind::Token, b"y", tier).unwrap();

        vault.delete_all(&gw("gw.local")).unwrap();
        assert_eq!(keychain.len(), 1);
    }

    #[test]
    fn entry_locks_do_not_accumulate() {
        let (_, vault) = make_vault();
        let tier = AccessibilityTier::default();
        for i in 0..16 {
            let scope = gw(&format!("gw{i}.lan"));
            vault.store(&scope, CredentialKind::Token, b"t", tier).unwrap();
            vault.retrieve(&scope, CredentialKind::Password).unwrap();
            vault.delete_all(&scope).unwrap();
        }
        assert_eq!(vault.tracked_entries(), 0);
    }

    #[test]
    fn debug_never_shows_secret() {
        let secret = SecretValue::from("hunter2hunter2");
        let shown = format!("{secret:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("14 bytes"));
    }

    #[test]
    fn concurrent_writers_leave_one_whole_value() {
        let (_, vault) = make_vault();
        let vault = Arc::new(vault);
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let vault = vault.clone();
                std::thread::spawn(move || {
                    let value = vec![b'a' + i; 64];
                    vault
                        .store(&gw("gw.local"), CredentialKind::Token, &value, AccessibilityTier::default())
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(vault.tracked_entries(), 0);
        let stored = vault.retrieve(&gw("gw.local"), CredentialKind::Token).unwrap().unwrap();
        let first = stored.expose()[0];
        assert!(stored.expose().iter().all(|&b| b == first));
        assert_eq!(stored.len(), 64);
    }
}
