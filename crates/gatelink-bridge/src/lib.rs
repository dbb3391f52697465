// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Gatelink: Native platform keychain abstractions.
//
// Defines the `NativeKeychain` trait and picks the implementation for the
// target operating system: Security.framework on iOS, Keystore-backed
// EncryptedSharedPreferences on Android, and a stub elsewhere. The
// process-local `MemoryKeychain` is available on every platform for tests.

use std::sync::Arc;

pub mod memory;
pub mod traits;

#[cfg(target_os = "ios")]
pub mod ios;

#[cfg(target_os = "android")]
pub mod android;

#[cfg(not(any(target_os = "ios", target_os = "android")))]
pub mod stub;

pub use memory::MemoryKeychain;
pub use traits::NativeKeychain;

/// Returns the keychain implementation for the target operating system.
///
/// On desktop and CI this is a stub that refuses every operation; callers
/// that need persistence there supply their own `NativeKeychain`.
pub fn platform_keychain() -> Arc<dyn NativeKeychain> {
    #[cfg(target_os = "ios")]
    {
        Arc::new(ios::IosKeychain::new())
    }
    #[cfg(target_os = "android")]
    {
        Arc::new(android::AndroidKeychain::new())
    }
    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    {
        Arc::new(stub::StubKeychain)
    }
}
