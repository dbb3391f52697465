// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Android keychain via JNI.
//
// Secrets live in AndroidX `EncryptedSharedPreferences`, whose master key is
// generated inside the Android Keystore and never leaves it. Keys are
// encrypted with AES-256-SIV and values with AES-256-GCM. The host app must
// depend on `androidx.security:security-crypto` and exclude the preferences
// file from backups.
//
// Android has no per-item accessibility attribute; every entry is
// device-bound and readable once the Keystore is unlocked after boot, which
// matches the default tier. Other tiers are accepted and logged.

#![cfg(target_os = "android")]

use std::sync::OnceLock;

use jni::objects::{JClass, JObject, JString, JValue};
use jni::{JNIEnv, JavaVM};

use gatelink_core::AccessibilityTier;
use gatelink_core::error::{GatelinkError, Result};

use crate::traits::NativeKeychain;

// ---------------------------------------------------------------------------
// JNI bootstrap helpers
// ---------------------------------------------------------------------------

/// Prefix applied to all preference keys to avoid collisions.
const PREFS_KEY_PREFIX: &str = "gatelink_";

/// EncryptedSharedPreferences file name.
const PREFS_FILE: &str = "gatelink_secrets";

/// `android.util.Base64.NO_WRAP`.
const BASE64_NO_WRAP: i32 = 2;

/// The process `JavaVM`, resolved once from the NDK context.
fn java_vm() -> Result<&'static JavaVM> {
    static VM: OnceLock<JavaVM> = OnceLock::new();
    if let Some(vm) = VM.get() {
        return Ok(vm);
    }
    let ctx = ndk_context::android_context();
    // SAFETY: `ctx.vm()` is the `JavaVM*` set by the NDK glue code and is
    // valid for the lifetime of the process.
    let vm = unsafe { JavaVM::from_raw(ctx.vm().cast()) }
        .map_err(|e| GatelinkError::Bridge(format!("failed to obtain JavaVM: {e}")))?;
    Ok(VM.get_or_init(|| vm))
}

/// Obtain a [`JNIEnv`] for the current thread, attaching it if needed.
fn jni_env() -> Result<JNIEnv<'static>> {
    java_vm()?
        .attach_current_thread_permanently()
        .map_err(|e| GatelinkError::Bridge(format!("failed to attach JNI thread: {e}")))
}

/// The hosting `Activity` (or application context) as a [`JObject`].
fn activity() -> Result<JObject<'static>> {
    let ctx = ndk_context::android_context();
    let ptr = ctx.context();
    if ptr.is_null() {
        return Err(GatelinkError::Bridge(
            "Android context is null, native activity not initialised".into(),
        ));
    }
    // SAFETY: the NDK guarantees this is a valid global jobject.
    Ok(unsafe { JObject::from_raw(ptr.cast()) })
}

/// Map any `jni::errors::Error` into `GatelinkError::Bridge`.
fn jni_err(context: &str, e: jni::errors::Error) -> GatelinkError {
    GatelinkError::Bridge(format!("{context}: {e}"))
}

// ---------------------------------------------------------------------------
// AndroidKeychain
// ---------------------------------------------------------------------------

/// Android implementation of `NativeKeychain`.
///
/// Zero-sized; all state lives on the Java side. The first JNI call happens
/// lazily when a method is invoked.
pub struct AndroidKeychain;

impl AndroidKeychain {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AndroidKeychain {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeKeychain for AndroidKeychain {
    fn backend_name(&self) -> &str {
        "android-keystore"
    }

    /// The value is Base64-encoded and written with `commit()`, so the call
    /// returns only after the encrypted file is on disk.
    fn store_secret(&self, key: &str, value: &[u8], tier: AccessibilityTier) -> Result<()> {
        let mut env = jni_env()?;
        let activity = activity()?;
        let alias = format!("{PREFS_KEY_PREFIX}{key}");

        if !tier.is_device_bound() {
            tracing::debug!(?tier, "Android: entries are always device-bound");
        }
        tracing::info!(alias = %alias, "Android: storing secret");

        // -- Base64.encodeToString(value, Base64.NO_WRAP) -----------------------
        let j_bytes = env
            .byte_array_from_slice(value)
            .map_err(|e| jni_err("byte_array_from_slice(value)", e))?;

        let encoded: JObject = env
            .call_static_method(
                "android/util/Base64",
                "encodeToString",
                "([BI)Ljava/lang/String;",
                &[JValue::Object(&j_bytes), JValue::Int(BASE64_NO_WRAP)],
            )
            .map_err(|e| jni_err("Base64.encodeToString", e))?
            .l()
            .map_err(|e| jni_err("encodeToString->l", e))?;

        let prefs = encrypted_preferences(&mut env, &activity)?;
        let editor = editor(&mut env, &prefs)?;

        let j_alias: JString = env
            .new_string(&alias)
            .map_err(|e| jni_err("new_string(alias)", e))?;

        env.call_method(
            &editor,
            "putString",
            "(Ljava/lang/String;Ljava/lang/String;)Landroid/content/SharedPreferences$Editor;",
            &[JValue::Object(&j_alias), JValue::Object(&encoded)],
        )
        .map_err(|e| jni_err("editor.putString", e))?;

        commit(&mut env, &editor)
    }

    /// Returns `Ok(None)` if the key does not exist.
    fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut env = jni_env()?;
        let activity = activity()?;
        let alias = format!("{PREFS_KEY_PREFIX}{key}");

        tracing::debug!(alias = %alias, "Android: loading secret");

        let prefs = encrypted_preferences(&mut env, &activity)?;

        let j_alias: JString = env
            .new_string(&alias)
            .map_err(|e| jni_err("new_string(alias)", e))?;

        let encoded: JObject = env
            .call_method(
                &prefs,
                "getString",
                "(Ljava/lang/String;Ljava/lang/String;)Ljava/lang/String;",
                &[JValue::Object(&j_alias), JValue::Object(&JObject::null())],
            )
            .map_err(|e| jni_err("getString", e))?
            .l()
            .map_err(|e| jni_err("getString->l", e))?;

        if encoded.is_null() {
            return Ok(None);
        }

        // -- Base64.decode(encoded, Base64.NO_WRAP) -----------------------------
        let decoded: JObject = env
            .call_static_method(
                "android/util/Base64",
                "decode",
                "(Ljava/lang/String;I)[B",
                &[JValue::Object(&encoded), JValue::Int(BASE64_NO_WRAP)],
            )
            .map_err(|e| jni_err("Base64.decode", e))?
            .l()
            .map_err(|e| jni_err("decode->l", e))?;

        let bytes = env
            .convert_byte_array(jni::objects::JByteArray::from(decoded))
            .map_err(|e| jni_err("convert_byte_array(decoded)", e))?;

        Ok(Some(bytes))
    }

    /// Silently succeeds if the key does not exist.
    fn delete_secret(&self, key: &str) -> Result<()> {
        let mut env = jni_env()?;
        let activity = activity()?;
        let alias = format!("{PREFS_KEY_PREFIX}{key}");

        tracing::info!(alias = %alias, "Android: deleting secret");

        let prefs = encrypted_preferences(&mut env, &activity)?;
        let editor = editor(&mut env, &prefs)?;

        let j_alias: JString = env
            .new_string(&alias)
            .map_err(|e| jni_err("new_string(alias)", e))?;

        env.call_method(
            &editor,
            "remove",
            "(Ljava/lang/String;)Landroid/content/SharedPreferences$Editor;",
            &[JValue::Object(&j_alias)],
        )
        .map_err(|e| jni_err("editor.remove", e))?;

        commit(&mut env, &editor)
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load an application class through the activity's class loader.
///
/// `FindClass` on a natively attached thread only sees system classes, so
/// AndroidX classes must come from the app's own loader.
fn app_class<'a>(
    env: &mut JNIEnv<'a>,
    activity: &JObject<'_>,
    dotted_name: &str,
) -> Result<JClass<'a>> {
    let loader: JObject = env
        .call_method(activity, "getClassLoader", "()Ljava/lang/ClassLoader;", &[])
        .map_err(|e| jni_err("getClassLoader", e))?
        .l()
        .map_err(|e| jni_err("getClassLoader->l", e))?;

    let j_name: JString = env
        .new_string(dotted_name)
        .map_err(|e| jni_err("new_string(class_name)", e))?;

    let class: JObject = env
        .call_method(
            &loader,
            "loadClass",
            "(Ljava/lang/String;)Ljava/lang/Class;",
            &[JValue::Object(&j_name)],
        )
        .map_err(|e| jni_err("ClassLoader.loadClass", e))?
        .l()
        .map_err(|e| jni_err("loadClass->l", e))?;

    Ok(JClass::from(class))
}

/// Read a static enum constant from an application class.
fn enum_constant<'a>(
    env: &mut JNIEnv<'a>,
    activity: &JObject<'_>,
    class_name: &str,
    field: &str,
) -> Result<JObject<'a>> {
    let class = app_class(env, activity, class_name)?;
    let sig = format!("L{};", class_name.replace('.', "/"));
    env.get_static_field(&class, field, sig.as_str())
        .map_err(|e| jni_err("get_static_field", e))?
        .l()
        .map_err(|e| jni_err("get_static_field->l", e))
}

/// Open (or create) the Keystore-protected preferences file.
///
/// Equivalent to:
/// ```text
/// EncryptedSharedPreferences.create(
///     PREFS_FILE,
///     MasterKeys.getOrCreate(MasterKeys.AES256_GCM_SPEC),
///     context, AES256_SIV, AES256_GCM)
/// ```
fn encrypted_preferences<'a>(
    env: &mut JNIEnv<'a>,
    activity: &JObject<'_>,
) -> Result<JObject<'a>> {
    let master_keys = app_class(env, activity, "androidx.security.crypto.MasterKeys")?;

    let spec: JObject = env
        .get_static_field(
            &master_keys,
            "AES256_GCM_SPEC",
            "Landroid/security/keystore/KeyGenParameterSpec;",
        )
        .map_err(|e| jni_err("MasterKeys.AES256_GCM_SPEC", e))?
        .l()
        .map_err(|e| jni_err("AES256_GCM_SPEC->l", e))?;

    let master_alias: JObject = env
        .call_static_method(
            &master_keys,
            "getOrCreate",
            "(Landroid/security/keystore/KeyGenParameterSpec;)Ljava/lang/String;",
            &[JValue::Object(&spec)],
        )
        .map_err(|e| jni_err("MasterKeys.getOrCreate", e))?
        .l()
        .map_err(|e| jni_err("getOrCreate->l", e))?;

    let key_scheme = enum_constant(
        env,
        activity,
        "androidx.security.crypto.EncryptedSharedPreferences$PrefKeyEncryptionScheme",
        "AES256_SIV",
    )?;
    let value_scheme = enum_constant(
        env,
        activity,
        "androidx.security.crypto.EncryptedSharedPreferences$PrefValueEncryptionScheme",
        "AES256_GCM",
    )?;

    let esp = app_class(
        env,
        activity,
        "androidx.security.crypto.EncryptedSharedPreferences",
    )?;

    let j_name: JString = env
        .new_string(PREFS_FILE)
        .map_err(|e| jni_err("new_string(prefs_name)", e))?;

    env.call_static_method(
        &esp,
        "create",
        "(Ljava/lang/String;Ljava/lang/String;Landroid/content/Context;\
         Landroidx/security/crypto/EncryptedSharedPreferences$PrefKeyEncryptionScheme;\
         Landroidx/security/crypto/EncryptedSharedPreferences$PrefValueEncryptionScheme;)\
         Landroid/content/SharedPreferences;",
        &[
            JValue::Object(&j_name),
            JValue::Object(&master_alias),
            JValue::Object(activity),
            JValue::Object(&key_scheme),
            JValue::Object(&value_scheme),
        ],
    )
    .map_err(|e| jni_err("EncryptedSharedPreferences.create", e))?
    .l()
    .map_err(|e| jni_err("create->l", e))
}

fn editor<'a>(env: &mut JNIEnv<'a>, prefs: &JObject<'_>) -> Result<JObject<'a>> {
    env.call_method(
        prefs,
        "edit",
        "()Landroid/content/SharedPreferences$Editor;",
        &[],
    )
    .map_err(|e| jni_err("SharedPreferences.edit", e))?
    .l()
    .map_err(|e| jni_err("edit->l", e))
}

/// `editor.commit()`; a `false` return means nothing was written.
fn commit(env: &mut JNIEnv<'_>, editor: &JObject<'_>) -> Result<()> {
    let written = env
        .call_method(editor, "commit", "()Z", &[])
        .map_err(|e| jni_err("editor.commit", e))?
        .z()
        .map_err(|e| jni_err("commit->z", e))?;
    if written {
        Ok(())
    } else {
        Err(GatelinkError::Bridge(
            "EncryptedSharedPreferences commit returned false".into(),
        ))
    }
}
