// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer: opens the trust store, audit log and credential
// vault in the data directory and exposes the operations a front end calls.
//
// The backend types serialize internally, so they are shared as plain `Arc`s
// and `AppServices` stays cheap to clone into async tasks.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gatelink_bridge::NativeKeychain;
use gatelink_core::error::Result;
use gatelink_core::{AppConfig, EventType, GatewayId, Severity};
use gatelink_pairing::{GatewayChannel, PairingCode, PairingCoordinator};
use gatelink_security::{
    AuditEvent, AuditFilter, AuditLog, CertificateTrustStore, CredentialVault, DeviceIdentity,
    SecretValue, SessionState, TrustPolicy,
};

use super::data_dir;
use super::gateway_client::{ConnectOptions, GatewayClient};

const CONFIG_FILE: &str = "config.json";
const TRUST_DB: &str = "trust.db";
const AUDIT_DB: &str = "audit.db";
#[cfg(not(any(target_os = "ios", target_os = "android")))]
const VAULT_FILE: &str = "vault.age";

/// Display projection of a pin. Never carries the full fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinSummary {
    pub gateway: String,
    pub truncated_fingerprint: String,
    pub pinned_at: DateTime<Utc>,
}

/// Outcome of `AppServices::pair` as the user sees it.
#[derive(Debug)]
pub enum PairResult {
    Success {
        gateway: GatewayId,
        /// Device token for this session.
        token: SecretValue,
        /// False when the token could not be written to the vault.
        persisted: bool,
    },
    Failed {
        message: String,
    },
}

/// Shared application services.
#[derive(Clone)]
pub struct AppServices {
    data_dir: PathBuf,
    config: Arc<Mutex<AppConfig>>,
    trust_store: Arc<CertificateTrustStore>,
    audit: Arc<AuditLog>,
    vault: Arc<CredentialVault>,
}

impl AppServices {
    /// Initialise all services in the default data directory.
    pub fn init() -> Result<Self> {
        Self::init_in(data_dir::data_dir()?)
    }

    /// Initialise in `dir` with the platform credential store.
    pub fn init_in(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let config = load_config(&dir).unwrap_or_default();
        let keychain = default_keychain(&dir, &config)?;
        Self::with_keychain(dir, config, keychain)
    }

    /// Initialise in `dir` over an explicit keychain backend.
    pub fn with_keychain(
        dir: impl Into<PathBuf>,
        config: AppConfig,
        keychain: Arc<dyn NativeKeychain>,
    ) -> Result<Self> {
        let dir = dir.into();
        info!(path = %dir.display(), backend = keychain.backend_name(), "initialising app services");

        let trust_store = CertificateTrustStore::open(dir.join(TRUST_DB))?;
        let audit = AuditLog::open(dir.join(AUDIT_DB), config.audit_retention)?;

        info!(pins = trust_store.len(), "app services initialised");
        Ok(Self {
            data_dir: dir,
            config: Arc::new(Mutex::new(config)),
            trust_store: Arc::new(trust_store),
            audit: Arc::new(audit),
            vault: Arc::new(CredentialVault::new(keychain)),
        })
    }

    // -- Trust ---------------------------------------------------------------

    /// Every pinned gateway, ordered by gateway id.
    pub fn pinned_certificates(&self) -> Vec<PinSummary> {
        self.trust_store
            .list()
            .into_iter()
            .map(|pin| PinSummary {
                gateway: pin.gateway.to_string(),
                truncated_fingerprint: pin.fingerprint.truncated(),
                pinned_at: pin.pinned_at,
            })
            .collect()
    }

    /// Forget a gateway's pin so the next connection is treated as first use.
    pub fn remove_pin(&self, gateway: &GatewayId) -> Result<bool> {
        let removed = self.trust_store.remove(gateway)?;
        if removed {
            self.audit.log(
                EventType::ConfigurationChange,
                &format!("certificate pin removed for {gateway}"),
                Severity::Warning,
            );
        }
        Ok(removed)
    }

    pub fn trust_policy(&self) -> TrustPolicy {
        TrustPolicy {
            tofu_enabled: self.config().tofu_enabled,
        }
    }

    /// Open a verified connection to `gateway`.
    pub async fn connect(
        &self,
        gateway: GatewayId,
        options: &ConnectOptions,
    ) -> Result<GatewayClient> {
        GatewayClient::connect(
            gateway,
            options,
            self.trust_policy(),
            self.trust_store.clone(),
            self.audit.clone(),
        )
        .await
    }

    // -- Audit ---------------------------------------------------------------

    /// Matching events, most recent first.
    pub fn audit_events(&self, filter: &AuditFilter) -> Vec<AuditEvent> {
        self.audit.events(filter)
    }

    /// Clear the audit trail. False if the durable copy could not be cleared.
    pub fn clear_audit(&self) -> bool {
        self.audit.clear()
    }

    // -- Pairing & credentials -----------------------------------------------

    /// Pair this device with the gateway behind `channel`.
    ///
    /// Failure details stay in the audit trail; the caller gets one message.
    pub async fn pair(
        &self,
        channel: Option<&dyn GatewayChannel>,
        code: &str,
        cancel: &CancellationToken,
    ) -> PairResult {
        let config = self.config();
        let mut coordinator =
            PairingCoordinator::from_config(self.vault.clone(), self.audit.clone(), &config);

        // No identity key is created for an attempt the coordinator will refuse.
        let ready = channel
            .filter(|c| c.trust_state() == SessionState::Trusted)
            .filter(|_| PairingCode::parse(code).is_ok());
        if let Some(gateway) = ready.map(|c| c.gateway()) {
            match DeviceIdentity::load_or_create(&self.vault, gateway, config.credential_tier) {
                Ok((identity, _created)) => {
                    coordinator = coordinator.with_device_public_key(identity.public_key_hex());
                }
                Err(e) => warn!(error = %e, "device identity unavailable, pairing without it"),
            }
        }

        match coordinator.pair(channel, code, cancel).await {
            Ok(ok) => PairResult::Success {
                gateway: ok.gateway,
                token: ok.token,
                persisted: ok.persisted,
            },
            Err(failure) => PairResult::Failed {
                message: failure.user_message().to_string(),
            },
        }
    }

    /// Delete every credential held for `gateway`. The pin is kept.
    pub fn logout(&self, gateway: &GatewayId) -> Result<()> {
        let result = self.vault.delete_all(gateway);
        let (details, severity) = match &result {
            Ok(()) => (format!("logged out of {gateway}"), Severity::Info),
            Err(e) => (format!("logout from {gateway} incomplete: {e}"), Severity::Warning),
        };
        self.audit
            .log(EventType::Authentication, &details, severity);
        result
    }

    // -- Config --------------------------------------------------------------

    pub fn config(&self) -> AppConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Persist and apply new settings. Retention applies from next start.
    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        persist_config(&self.data_dir, config)?;
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config.clone();
        self.audit.log(
            EventType::ConfigurationChange,
            &format!(
                "settings saved (tofu_enabled={}, pairing_timeout_secs={})",
                config.tofu_enabled, config.pairing_timeout_secs
            ),
            Severity::Info,
        );
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Stop persisting audit events; later events stay in memory only.
    pub fn shutdown(&self) {
        self.audit.shutdown();
    }
}

#[cfg(any(target_os = "ios", target_os = "android"))]
fn default_keychain(_dir: &Path, _config: &AppConfig) -> Result<Arc<dyn NativeKeychain>> {
    Ok(gatelink_bridge::platform_keychain())
}

/// Desktop: age-encrypted vault file when a passphrase is provided,
/// otherwise a process-lifetime vault.
#[cfg(not(any(target_os = "ios", target_os = "android")))]
fn default_keychain(dir: &Path, config: &AppConfig) -> Result<Arc<dyn NativeKeychain>> {
    use gatelink_bridge::MemoryKeychain;
    use gatelink_security::EncryptedFileKeychain;

    match std::env::var(&config.vault_passphrase_env) {
        Ok(passphrase) if !passphrase.is_empty() => Ok(Arc::new(EncryptedFileKeychain::open(
            dir.join(VAULT_FILE),
            passphrase,
        )?)),
        _ => {
            warn!(
                var = %config.vault_passphrase_env,
                "no vault passphrase set; credentials will not outlive this process"
            );
            Ok(Arc::new(MemoryKeychain::new()))
        }
    }
}

fn load_config(data_dir: &Path) -> Option<AppConfig> {
    let path = data_dir.join(CONFIG_FILE);
    let data = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&data) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable config, using defaults");
            None
        }
    }
}

fn persist_config(data_dir: &Path, config: &AppConfig) -> Result<()> {
    let path = data_dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;
    Ok(())
}
