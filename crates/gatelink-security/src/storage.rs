// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Encrypted storage: age (scrypt passphrase) encryption of byte buffers, and
// a desktop `NativeKeychain` that keeps every secret in one age file.
//
// The keychain file is a JSON map `{ account: { tier, value_hex } }`,
// encrypted as a whole. Writes go to a sibling temporary file which is then
// renamed over the original, so a crash leaves either the old or the new
// file and never a torn one.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use age::secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use zeroize::Zeroizing;

use gatelink_bridge::NativeKeychain;
use gatelink_core::AccessibilityTier;
use gatelink_core::error::{GatelinkError, Result};

/// Passphrase-based encrypted storage backed by the `age` crate.
///
/// Each encrypt/decrypt call is stateless. The passphrase is held in a
/// `SecretString`, zeroised on drop.
pub struct EncryptedStorage {
    passphrase: SecretString,
}

impl EncryptedStorage {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: SecretString::from(passphrase.into()),
        }
    }

    /// Encrypt `plaintext` into a complete age file (header + payload).
    #[instrument(skip_all, fields(plaintext_len = plaintext.len()))]
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let encryptor = age::Encryptor::with_user_passphrase(self.passphrase.clone());
        let mut ciphertext = Vec::new();

        let mut writer = encryptor
            .wrap_output(&mut ciphertext)
            .map_err(|e| GatelinkError::Encryption(e.to_string()))?;

        writer
            .write_all(plaintext)
            .map_err(|e| GatelinkError::Encryption(e.to_string()))?;

        writer
            .finish()
            .map_err(|e| GatelinkError::Encryption(e.to_string()))?;

        debug!(ciphertext_len = ciphertext.len(), "encryption complete");
        Ok(ciphertext)
    }

    /// Decrypt a complete age file back into plaintext.
    #[instrument(skip_all, fields(ciphertext_len = ciphertext.len()))]
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let decryptor = age::Decryptor::new(ciphertext)
            .map_err(|e| GatelinkError::Decryption(e.to_string()))?;

        let identity = age::scrypt::Identity::new(self.passphrase.clone());

        let mut reader = decryptor
            .decrypt(std::iter::once(&identity as &dyn age::Identity))
            .map_err(|e| GatelinkError::Decryption(e.to_string()))?;

        let mut plaintext = Zeroizing::new(Vec::new());
        reader
            .read_to_end(&mut plaintext)
            .map_err(|e| GatelinkError::Decryption(e.to_string()))?;

        debug!(plaintext_len = plaintext.len(), "decryption complete");
        Ok(plaintext)
    }
}

// ---------------------------------------------------------------------------
// File keychain
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct FileEntry {
    tier: AccessibilityTier,
    value_hex: String,
}

impl Drop for FileEntry {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.value_hex);
    }
}

type Entries = BTreeMap<String, FileEntry>;

/// Desktop `NativeKeychain`: one age-encrypted file per device.
///
/// Entries are decrypted once at open and kept in memory; every change
/// re-encrypts and rewrites the whole file before returning.
pub struct EncryptedFileKeychain {
    path: PathBuf,
    storage: EncryptedStorage,
    entries: Mutex<Entries>,
}

impl EncryptedFileKeychain {
    /// Open the keychain file at `path`, or start an empty one if it does
    /// not exist yet. A wrong passphrase fails with `Decryption`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, passphrase: impl Into<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let storage = EncryptedStorage::new(passphrase);

        let entries = if path.exists() {
            let ciphertext = fs::read(&path)?;
            let plaintext = storage.decrypt(&ciphertext)?;
            serde_json::from_slice(&plaintext)?
        } else {
            Entries::new()
        };

        debug!(entries = entries.len(), "file keychain opened");
        Ok(Self {
            path,
            storage,
            entries: Mutex::new(entries),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encrypt `entries` and atomically replace the file.
    fn flush(&self, entries: &Entries) -> Result<()> {
        let plaintext = Zeroizing::new(serde_json::to_vec(entries)?);
        let ciphertext = self.storage.encrypt(&plaintext)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("age.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&ciphertext)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl NativeKeychain for EncryptedFileKeychain {
    fn backend_name(&self) -> &str {
        "age-file"
    }

    fn store_secret(&self, key: &str, value: &[u8], tier: AccessibilityTier) -> Result<()> {
        let mut entries = self.lock();
        let previous = entries.insert(
            key.to_owned(),
            FileEntry {
                tier,
                value_hex: hex::encode(value),
            },
        );
        if let Err(e) = self.flush(&entries) {
            // Keep memory in step with the file that is still on disk.
            match previous {
                Some(old) => {
                    entries.insert(key.to_owned(), old);
                }
                None => {
                    entries.remove(key);
                }
            }
            return Err(e);
        }
        info!(key, "secret stored in file keychain");
        Ok(())
    }

    fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.lock();
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };
        hex::decode(&entry.value_hex)
            .map(Some)
            .map_err(|_| GatelinkError::Decryption(format!("corrupt keychain entry {key}")))
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        let mut entries = self.lock();
        let Some(removed) = entries.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.flush(&entries) {
            entries.insert(key.to_owned(), removed);
            return Err(e);
        }
        info!(key, "secret deleted from file keychain");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let storage = EncryptedStorage::new("correct-horse-battery-staple");
        let plaintext = b"gateway token";

        let ciphertext = storage.encrypt(plaintext).expect("encrypt failed");
        assert_ne!(&ciphertext[..], plaintext);

        let decrypted = storage.decrypt(&ciphertext).expect("decrypt failed");
        assert_eq!(&decrypted[..], plaintext);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let storage_a = EncryptedStorage::new("passphrase-alpha");
        let storage_b = EncryptedStorage::new("passphrase-beta");

        let ciphertext = storage_a.encrypt(b"secret").expect("encrypt failed");
        assert!(storage_b.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn file_keychain_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.age");
        {
            let kc = EncryptedFileKeychain::open(&path, "pw").unwrap();
            kc.store_secret("gw.local/token", b"tok", AccessibilityTier::default())
                .unwrap();
        }
        let raw = fs::read(&path).unwrap();
        assert!(!raw.windows(3).any(|w| w == b"tok"));

        let kc = EncryptedFileKeychain::open(&path, "pw").unwrap();
        assert_eq!(
            kc.load_secret("gw.local/token").unwrap().as_deref(),
            Some(&b"tok"[..])
        );
        kc.delete_secret("gw.local/token").unwrap();
        assert_eq!(kc.load_secret("gw.local/token").unwrap(), None);
    }

    #[test]
    fn file_keychain_rejects_wrong_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.age");
        EncryptedFileKeychain::open(&path, "right")
            .unwrap()
            .store_secret("k", b"v", AccessibilityTier::default())
            .unwrap();
        assert!(matches!(
            EncryptedFileKeychain::open(&path, "wrong"),
            Err(GatelinkError::Decryption(_))
        ));
    }
}
