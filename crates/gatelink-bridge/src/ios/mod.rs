// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// iOS keychain via Security.framework.
//
// Requires compilation with the iOS SDK (Xcode). Secrets are generic-password
// items under one service identifier; the account attribute is the caller's
// key. The accessibility attribute is set on every add and update, so a
// replaced secret never keeps a weaker tier than the one requested.
//
// Unsafe code here falls into two categories:
//
// 1. Toll-free bridging (string_obj, data_obj, as_cf): casts
//    between NSString/CFString, NSData/CFData and NSDictionary/CFDictionary,
//    which share size and layout.
//
// 2. Security.framework C FFI (SecItemAdd, SecItemCopyMatching, ...): C calls
//    taking toll-free bridged dictionaries. All are thread-safe.

#![cfg(target_os = "ios")]

use std::ffi::c_void;

use objc2::msg_send;
use objc2::rc::Retained;
use objc2::runtime::{AnyObject, Bool};
use objc2_foundation::{NSData, NSDictionary, NSString};

use gatelink_core::AccessibilityTier;
use gatelink_core::error::{GatelinkError, Result};

use crate::traits::NativeKeychain;

// -- Security.framework FFI --------------------------------------------------

/// OSStatus success.
const ERR_SEC_SUCCESS: i32 = 0;
/// The item was not found in the keychain.
const ERR_SEC_ITEM_NOT_FOUND: i32 = -25300;
/// A duplicate item already exists.
const ERR_SEC_DUPLICATE_ITEM: i32 = -25299;
/// Device locked and the item's tier forbids access.
const ERR_SEC_INTERACTION_NOT_ALLOWED: i32 = -25308;

unsafe extern "C" {
    fn SecItemAdd(attributes: *const c_void, result: *mut *const c_void) -> i32;
    fn SecItemCopyMatching(query: *const c_void, result: *mut *const c_void) -> i32;
    fn SecItemUpdate(query: *const c_void, attrs_to_update: *const c_void) -> i32;
    fn SecItemDelete(query: *const c_void) -> i32;
}

// `CFStringRef` globals, usable as `NSString *`.
unsafe extern "C" {
    static kSecClass: &'static NSString;
    static kSecClassGenericPassword: &'static NSString;
    static kSecAttrAccount: &'static NSString;
    static kSecAttrService: &'static NSString;
    static kSecAttrAccessible: &'static NSString;
    static kSecAttrAccessibleWhenUnlocked: &'static NSString;
    static kSecAttrAccessibleAfterFirstUnlock: &'static NSString;
    static kSecAttrAccessibleWhenUnlockedThisDeviceOnly: &'static NSString;
    static kSecAttrAccessibleAfterFirstUnlockThisDeviceOnly: &'static NSString;
    static kSecAttrAccessibleWhenPasscodeSetThisDeviceOnly: &'static NSString;
    static kSecValueData: &'static NSString;
    static kSecReturnData: &'static NSString;
    static kSecMatchLimit: &'static NSString;
    static kSecMatchLimitOne: &'static NSString;
}

/// The keychain service identifier for all Gatelink secrets.
const KEYCHAIN_SERVICE: &str = "org.hyperpolymath.gatelink";

// -- Bridging helpers --------------------------------------------------------

type Attributes = NSDictionary<NSString, AnyObject>;

fn as_cf(dict: &Attributes) -> *const c_void {
    dict as *const Attributes as *const c_void
}

// SAFETY (both): the argument is an NSObject subclass, so the pointer is a
// valid `AnyObject` with the same lifetime.
fn string_obj(s: &NSString) -> &AnyObject {
    unsafe { &*(s as *const NSString as *const AnyObject) }
}

fn data_obj(d: &NSData) -> &AnyObject {
    unsafe { &*(d as *const NSData as *const AnyObject) }
}

/// `kSecAttrAccessible*` constant for a tier.
fn accessible_constant(tier: AccessibilityTier) -> &'static NSString {
    // SAFETY: process-lifetime Security.framework constants.
    unsafe {
        match tier {
            AccessibilityTier::WhenUnlocked => kSecAttrAccessibleWhenUnlocked,
            AccessibilityTier::AfterFirstUnlock => kSecAttrAccessibleAfterFirstUnlock,
            AccessibilityTier::WhenUnlockedThisDeviceOnly => {
                kSecAttrAccessibleWhenUnlockedThisDeviceOnly
            }
            AccessibilityTier::AfterFirstUnlockThisDeviceOnly => {
                kSecAttrAccessibleAfterFirstUnlockThisDeviceOnly
            }
            AccessibilityTier::WhenPasscodeSetThisDeviceOnly => {
                kSecAttrAccessibleWhenPasscodeSetThisDeviceOnly
            }
        }
    }
}

fn os_status_err(call: &str, status: i32) -> GatelinkError {
    if status == ERR_SEC_INTERACTION_NOT_ALLOWED {
        GatelinkError::Bridge(format!("{call}: keychain locked (OSStatus {status})"))
    } else {
        GatelinkError::Bridge(format!("{call} failed with OSStatus {status}"))
    }
}

// -- IosKeychain ---------------------------------------------------------------

/// Identifies one generic-password item: (service, account).
struct Item {
    account: Retained<NSString>,
    service: Retained<NSString>,
}

impl Item {
    fn new(key: &str) -> Self {
        Self {
            account: NSString::from_str(key),
            service: NSString::from_str(KEYCHAIN_SERVICE),
        }
    }

    /// Item-identifying attributes followed by `extra`.
    fn attributes(&self, extra: &[(&NSString, &AnyObject)]) -> Retained<Attributes> {
        // SAFETY: process-lifetime Security.framework constants.
        let (class_key, class_value, account_key, service_key) = unsafe {
            (kSecClass, kSecClassGenericPassword, kSecAttrAccount, kSecAttrService)
        };
        let mut keys = vec![class_key, account_key, service_key];
        let mut values = vec![
            string_obj(class_value),
            string_obj(&self.account),
            string_obj(&self.service),
        ];
        for (k, v) in extra {
            keys.push(*k);
            values.push(*v);
        }
        NSDictionary::from_slices(&keys, &values)
    }
}

/// `NativeKeychain` over the iOS Keychain. Thread-safe; no main-thread
/// requirement.
#[derive(Default)]
pub struct IosKeychain;

impl IosKeychain {
    pub fn new() -> Self {
        Self
    }

    /// Replace data and tier of an existing item.
    fn update(item: &Item, data: &NSData, tier: AccessibilityTier) -> Result<()> {
        let query = item.attributes(&[]);
        // SAFETY: process-lifetime Security.framework constants.
        let (data_key, accessible_key) = unsafe { (kSecValueData, kSecAttrAccessible) };
        let changes = NSDictionary::from_slices(
            &[data_key, accessible_key],
            &[data_obj(data), string_obj(accessible_constant(tier))],
        );

        // SAFETY: both dictionaries outlive the call.
        match unsafe { SecItemUpdate(as_cf(&query), as_cf(&changes)) } {
            ERR_SEC_SUCCESS => Ok(()),
            code => Err(os_status_err("SecItemUpdate", code)),
        }
    }
}

impl NativeKeychain for IosKeychain {
    fn backend_name(&self) -> &str {
        "ios-keychain"
    }

    /// Add the item, or on a duplicate update data and tier together.
    fn store_secret(&self, key: &str, value: &[u8], tier: AccessibilityTier) -> Result<()> {
        tracing::debug!(key, ?tier, "keychain store");
        let item = Item::new(key);
        let data = NSData::with_bytes(value);

        // SAFETY: process-lifetime Security.framework constants.
        let (accessible_key, data_key) = unsafe { (kSecAttrAccessible, kSecValueData) };
        let attrs = item.attributes(&[
            (accessible_key, string_obj(accessible_constant(tier))),
            (data_key, data_obj(&data)),
        ]);

        // SAFETY: `attrs` outlives the call; no result object requested.
        match unsafe { SecItemAdd(as_cf(&attrs), std::ptr::null_mut()) } {
            ERR_SEC_SUCCESS => Ok(()),
            ERR_SEC_DUPLICATE_ITEM => Self::update(&item, &data, tier),
            code => Err(os_status_err("SecItemAdd", code)),
        }
    }

    fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        tracing::debug!(key, "keychain load");
        let item = Item::new(key);

        // kSecReturnData wants a CFBoolean; an NSNumber bool is the same object.
        // SAFETY: class method returning an autoreleased NSNumber, retained here.
        let yes: Retained<AnyObject> =
            unsafe { msg_send![objc2::class!(NSNumber), numberWithBool: Bool::YES] };
        // SAFETY: process-lifetime Security.framework constants.
        let (return_key, limit_key, limit_one) =
            unsafe { (kSecReturnData, kSecMatchLimit, kSecMatchLimitOne) };
        let query = item.attributes(&[(return_key, &*yes), (limit_key, string_obj(limit_one))]);

        let mut found: *const c_void = std::ptr::null();
        // SAFETY: on success `found` holds a +1 retained CFData.
        match unsafe { SecItemCopyMatching(as_cf(&query), &mut found) } {
            ERR_SEC_SUCCESS if found.is_null() => Ok(None),
            ERR_SEC_SUCCESS => {
                // SAFETY: CFData is NSData; release balances the copy's retain.
                let bytes = unsafe {
                    let bytes = (*(found as *const NSData)).to_vec();
                    let _: () = msg_send![found as *const AnyObject, release];
                    bytes
                };
                Ok(Some(bytes))
            }
            ERR_SEC_ITEM_NOT_FOUND => Ok(None),
            code => Err(os_status_err("SecItemCopyMatching", code)),
        }
    }

    /// Deleting a missing item succeeds.
    fn delete_secret(&self, key: &str) -> Result<()> {
        tracing::debug!(key, "keychain delete");
        let query = Item::new(key).attributes(&[]);

        // SAFETY: `query` outlives the call.
        match unsafe { SecItemDelete(as_cf(&query)) } {
            ERR_SEC_SUCCESS | ERR_SEC_ITEM_NOT_FOUND => Ok(()),
            code => Err(os_status_err("SecItemDelete", code)),
        }
    }
}
