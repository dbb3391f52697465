// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pairing coordinator: validates a code, runs the verify/token exchange over
// a trusted channel under one deadline, and stores the resulting token.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

use gatelink_core::error::GatelinkError;
use gatelink_core::human_errors::PAIRING_FAILED_MESSAGE;
use gatelink_core::{AccessibilityTier, AppConfig, CredentialKind, EventType, GatewayId, Severity};
use gatelink_security::{AuditLog, CredentialVault, SecretValue, SessionState};

use crate::code::PairingCode;
use crate::protocol::{RpcRequest, TokenRequest};
use crate::transport::GatewayChannel;

/// Lifecycle of one pairing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Pending,
    Verified,
    Rejected,
    Expired,
}

/// A code submitted to a specific gateway.
#[derive(Debug, Clone)]
pub struct PairingAttempt {
    pub code: PairingCode,
    pub issued_by: GatewayId,
    pub state: PairingState,
    pub started_at: DateTime<Utc>,
}

/// Why pairing failed. Shown to the user only as [`PAIRING_FAILED_MESSAGE`];
/// the kind itself goes to the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PairingFailure {
    #[error("gatewayNotConnected")]
    GatewayNotConnected,
    #[error("invalidCodeFormat")]
    InvalidCodeFormat,
    #[error("timeout")]
    Timeout,
    #[error("serverRejected")]
    ServerRejected,
    #[error("cancelled")]
    Cancelled,
}

impl PairingFailure {
    pub fn user_message(&self) -> &'static str {
        PAIRING_FAILED_MESSAGE
    }

    /// Terminal attempt state for failures that happen after the code was sent.
    fn attempt_state(&self) -> PairingState {
        match self {
            Self::ServerRejected => PairingState::Rejected,
            _ => PairingState::Expired,
        }
    }
}

impl From<&GatelinkError> for PairingFailure {
    fn from(err: &GatelinkError) -> Self {
        match err {
            GatelinkError::InvalidCodeFormat => Self::InvalidCodeFormat,
            GatelinkError::Timeout => Self::Timeout,
            GatelinkError::Cancelled => Self::Cancelled,
            GatelinkError::GatewayNotConnected | GatelinkError::Connection(_) => {
                Self::GatewayNotConnected
            }
            _ => Self::ServerRejected,
        }
    }
}

impl From<PairingFailure> for GatelinkError {
    fn from(failure: PairingFailure) -> Self {
        match failure {
            PairingFailure::GatewayNotConnected => Self::GatewayNotConnected,
            PairingFailure::InvalidCodeFormat => Self::InvalidCodeFormat,
            PairingFailure::Timeout => Self::Timeout,
            PairingFailure::ServerRejected => Self::ServerRejected,
            PairingFailure::Cancelled => Self::Cancelled,
        }
    }
}

/// Result of a successful pairing.
#[derive(Debug)]
pub struct PairingSuccess {
    pub gateway: GatewayId,
    /// The issued token, usable for this session even if `persisted` is false.
    pub token: SecretValue,
    pub persisted: bool,
}

pub struct PairingCoordinator {
    vault: Arc<CredentialVault>,
    audit: Arc<AuditLog>,
    timeout: Duration,
    tier: AccessibilityTier,
    device_public_key: Option<String>,
    last_attempt: Mutex<Option<PairingAttempt>>,
}

impl PairingCoordinator {
    pub fn new(vault: Arc<CredentialVault>, audit: Arc<AuditLog>, timeout: Duration) -> Self {
        Self {
            vault,
            audit,
            timeout,
            tier: AccessibilityTier::default(),
            device_public_key: None,
            last_attempt: Mutex::new(None),
        }
    }

    pub fn from_config(
        vault: Arc<CredentialVault>,
        audit: Arc<AuditLog>,
        config: &AppConfig,
    ) -> Self {
        Self::new(vault, audit, config.pairing_timeout()).with_tier(config.credential_tier)
    }

    pub fn with_tier(mut self, tier: AccessibilityTier) -> Self {
        self.tier = tier;
        self
    }

    /// Bind issued tokens to this device identity key.
    pub fn with_device_public_key(mut self, public_key_hex: impl Into<String>) -> Self {
        self.device_public_key = Some(public_key_hex.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The most recent attempt that got past code validation.
    pub fn last_attempt(&self) -> Option<PairingAttempt> {
        self.last_attempt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run the full pairing exchange.
    ///
    /// Resolves within the configured timeout, or earlier if `cancel` fires.
    #[instrument(skip_all, fields(gateway = tracing::field::Empty))]
    pub async fn pair(
        &self,
        channel: Option<&dyn GatewayChannel>,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<PairingSuccess, PairingFailure> {
        let Some(channel) = channel.filter(|c| c.trust_state() == SessionState::Trusted) else {
            return Err(self.fail(None, PairingFailure::GatewayNotConnected));
        };
        let gateway = channel.gateway().clone();
        tracing::Span::current().record("gateway", tracing::field::display(&gateway));

        let code = match PairingCode::parse(code) {
            Ok(code) => code,
            Err(_) => return Err(self.fail(Some(&gateway), PairingFailure::InvalidCodeFormat)),
        };

        self.set_attempt(PairingAttempt {
            code: code.clone(),
            issued_by: gateway.clone(),
            state: PairingState::Pending,
            started_at: Utc::now(),
        });

        let deadline = deadline_after(self.timeout);
        let exchange = self.exchange(channel, &code, deadline);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PairingFailure::Cancelled),
            result = timeout_at(deadline, exchange) => match result {
                Err(_elapsed) => Err(PairingFailure::Timeout),
                Ok(Err(e)) => Err(PairingFailure::from(&e)),
                Ok(Ok(token)) => Ok(token),
            },
        };

        match outcome {
            Ok(token) => {
                self.update_attempt(PairingState::Verified);
                Ok(self.finish(gateway, token))
            }
            Err(failure) => {
                self.update_attempt(failure.attempt_state());
                Err(self.fail(Some(&gateway), failure))
            }
        }
    }

    async fn exchange(
        &self,
        channel: &dyn GatewayChannel,
        code: &PairingCode,
        deadline: Instant,
    ) -> gatelink_core::error::Result<Zeroizing<String>> {
        let response = channel
            .request(&RpcRequest::pair_verify(code), remaining(deadline))
            .await?;
        if !response.is_positive() {
            if let Some(err) = &response.error {
                warn!(code = %err.code, "gateway rejected pairing code");
            }
            return Err(GatelinkError::ServerRejected);
        }

        let request = TokenRequest {
            device_public_key: self.device_public_key.clone(),
        };
        let token = channel
            .issue_device_token(&request, remaining(deadline))
            .await?;
        if token.is_empty() {
            return Err(GatelinkError::ServerRejected);
        }
        Ok(token)
    }

    fn finish(&self, gateway: GatewayId, token: Zeroizing<String>) -> PairingSuccess {
        let persisted = match self.vault.store(
            &gateway,
            CredentialKind::Token,
            token.as_bytes(),
            self.tier,
        ) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "paired but device token could not be saved");
                self.audit.log(
                    EventType::Authentication,
                    &format!("paired with {gateway} but the device token was not saved: {e}"),
                    Severity::Warning,
                );
                false
            }
        };

        info!(persisted, "device paired");
        self.audit.log(
            EventType::Authentication,
            &format!("paired with {gateway}"),
            Severity::Info,
        );

        PairingSuccess {
            gateway,
            token: SecretValue::new(token.as_bytes().to_vec()),
            persisted,
        }
    }

    fn fail(&self, gateway: Option<&GatewayId>, failure: PairingFailure) -> PairingFailure {
        let target = gateway.map_or_else(|| "unknown gateway".to_string(), ToString::to_string);
        warn!(%failure, "pairing failed");
        self.audit.log(
            EventType::Authentication,
            &format!("pairing with {target} failed: {failure}"),
            Severity::Warning,
        );
        failure
    }

    fn set_attempt(&self, attempt: PairingAttempt) {
        *self
            .last_attempt
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(attempt);
    }

    fn update_attempt(&self, state: PairingState) {
        if let Some(attempt) = self
            .last_attempt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            attempt.state = state;
        }
    }
}

/// Stand-in deadline for timeouts too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use gatelink_bridge::MemoryKeychain;
    use gatelink_core::error::Result;
    use gatelink_security::AuditFilter;
    use serde_json::json;

    use crate::protocol::{PAIR_VERIFY_METHOD, RpcResponse, TOKEN_ISSUE_METHOD};

    #[derive(Clone, Copy)]
    enum Verify {
        Accept,
        Reject,
        Hang,
    }

    struct FakeChannel {
        gateway: GatewayId,
        state: SessionState,
        verify: Verify,
        requests: AtomicUsize,
        seen_public_key: Mutex<Option<String>>,
    }

    impl FakeChannel {
        fn new(state: SessionState, verify: Verify) -> Self {
            Self {
                gateway: "gw.home.arpa:443".parse().unwrap(),
                state,
                verify,
                requests: AtomicUsize::new(0),
                seen_public_key: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl GatewayChannel for FakeChannel {
        fn gateway(&self) -> &GatewayId {
            &self.gateway
        }

        fn trust_state(&self) -> SessionState {
            self.state
        }

        async fn request(&self, request: &RpcRequest, _timeout: Duration) -> Result<RpcResponse> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            match request.method.as_str() {
                PAIR_VERIFY_METHOD => match self.verify {
                    Verify::Accept => Ok(RpcResponse::success(json!({"verified": true}))),
                    Verify::Reject => Ok(RpcResponse::failure("invalid_code", "no such code")),
                    Verify::Hang => std::future::pending().await,
                },
                TOKEN_ISSUE_METHOD => {
                    *self.seen_public_key.lock().unwrap() = request.params["devicePublicKey"]
                        .as_str()
                        .map(str::to_string);
                    Ok(RpcResponse::success(json!({"token": "device-token-1"})))
                }
                other => Err(GatelinkError::Protocol(format!("unexpected method {other}"))),
            }
        }
    }

    struct Fixture {
        keychain: Arc<MemoryKeychain>,
        vault: Arc<CredentialVault>,
        audit: Arc<AuditLog>,
    }

    impl Fixture {
        fn new() -> Self {
            let keychain = Arc::new(MemoryKeychain::new());
            Self {
                vault: Arc::new(CredentialVault::new(keychain.clone())),
                keychain,
                audit: Arc::new(AuditLog::open_in_memory(100).unwrap()),
            }
        }

        fn coordinator(&self, timeout: Duration) -> PairingCoordinator {
            PairingCoordinator::new(self.vault.clone(), self.audit.clone(), timeout)
        }

        fn auth_events(&self) -> Vec<gatelink_security::AuditEvent> {
            self.audit
                .events(&AuditFilter::default().event_type(EventType::Authentication))
        }
    }

    #[tokio::test]
    async fn unbounded_timeout_still_pairs() {
        let fx = Fixture::new();
        let config = AppConfig {
            pairing_timeout_secs: u64::MAX,
            ..AppConfig::default()
        };
        let coordinator =
            PairingCoordinator::from_config(fx.vault.clone(), fx.audit.clone(), &config);
        let channel = FakeChannel::new(SessionState::Trusted, Verify::Accept);

        let ok = coordinator
            .pair(Some(&channel), "AB3456CD", &CancellationToken::new())
            .await
            .unwrap();
        assert!(ok.persisted);
    }

    #[tokio::test]
    async fn unbounded_timeout_can_be_cancelled() {
        let fx = Fixture::new();
        let coordinator = fx.coordinator(Duration::MAX);
        let channel = FakeChannel::new(SessionState::Trusted, Verify::Hang);
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };
        let err = coordinator
            .pair(Some(&channel), "AB3456CD", &cancel)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert_eq!(err, PairingFailure::Cancelled);
        assert!(fx.keychain.is_empty());
    }

    #[tokio::test]
    async fn success_stores_token_and_audits() {
        let fx = Fixture::new();
        let coordinator = fx
            .coordinator(Duration::from_secs(5))
            .with_device_public_key("04abcd");
        let channel = FakeChannel::new(SessionState::Trusted, Verify::Accept);

        let ok = coordinator
            .pair(Some(&channel), " ab3456cd ", &CancellationToken::new())
            .await
            .unwrap();
        assert!(ok.persisted);
        assert_eq!(ok.token.expose_str().unwrap(), "device-token-1");

        let stored = fx
            .vault
            .retrieve(&channel.gateway, CredentialKind::Token)
            .unwrap()
            .unwrap();
        assert_eq!(stored.expose(), b"device-token-1");
        assert_eq!(
            channel.seen_public_key.lock().unwrap().as_deref(),
            Some("04abcd")
        );

        let events = fx.auth_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity(), Severity::Info);
        assert_eq!(
            coordinator.last_attempt().unwrap().state,
            PairingState::Verified
        );
    }

    #[tokio::test]
    async fn no_channel_is_not_connected() {
        let fx = Fixture::new();
        let err = fx
            .coordinator(Duration::from_secs(1))
            .pair(None, "AB3456CD", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, PairingFailure::GatewayNotConnected);
        assert_eq!(err.user_message(), PAIRING_FAILED_MESSAGE);
        assert!(fx.auth_events()[0]
            .redacted_details()
            .contains("gatewayNotConnected"));
    }

    #[tokio::test]
    async fn untrusted_channel_is_not_connected() {
        let fx = Fixture::new();
        let channel = FakeChannel::new(SessionState::Rejected, Verify::Accept);
        let err = fx
            .coordinator(Duration::from_secs(1))
            .pair(Some(&channel), "AB3456CD", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, PairingFailure::GatewayNotConnected);
        assert_eq!(channel.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bad_code_never_reaches_network() {
        let fx = Fixture::new();
        let channel = FakeChannel::new(SessionState::Trusted, Verify::Accept);
        let coordinator = fx.coordinator(Duration::from_secs(1));
        let err = coordinator
            .pair(Some(&channel), "AB34I6CD", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, PairingFailure::InvalidCodeFormat);
        assert_eq!(channel.requests.load(Ordering::SeqCst), 0);
        assert!(coordinator.last_attempt().is_none());

        let events = fx.auth_events();
        assert_eq!(events[0].severity(), Severity::Warning);
        assert!(events[0].redacted_details().contains("invalidCodeFormat"));
    }

    #[tokio::test]
    async fn negative_response_is_server_rejected() {
        let fx = Fixture::new();
        let channel = FakeChannel::new(SessionState::Trusted, Verify::Reject);
        let coordinator = fx.coordinator(Duration::from_secs(1));
        let err = coordinator
            .pair(Some(&channel), "AB3456CD", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, PairingFailure::ServerRejected);
        assert_eq!(
            coordinator.last_attempt().unwrap().state,
            PairingState::Rejected
        );
        assert!(!fx.vault.contains(&channel.gateway, CredentialKind::Token).unwrap());
    }

    #[tokio::test]
    async fn silent_gateway_times_out() {
        let fx = Fixture::new();
        let channel = FakeChannel::new(SessionState::Trusted, Verify::Hang);
        let coordinator = fx.coordinator(Duration::from_millis(50));
        let err = coordinator
            .pair(Some(&channel), "AB3456CD", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, PairingFailure::Timeout);
        assert_eq!(
            coordinator.last_attempt().unwrap().state,
            PairingState::Expired
        );
        assert!(fx.auth_events()[0].redacted_details().contains("timeout"));
    }

    #[tokio::test]
    async fn cancellation_wins_over_pending_exchange() {
        let fx = Fixture::new();
        let channel = FakeChannel::new(SessionState::Trusted, Verify::Hang);
        let coordinator = fx.coordinator(Duration::from_secs(30));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = coordinator
            .pair(Some(&channel), "AB3456CD", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, PairingFailure::Cancelled);
    }

    #[tokio::test]
    async fn vault_failure_still_pairs() {
        let fx = Fixture::new();
        fx.keychain.set_fail_writes(true);
        let channel = FakeChannel::new(SessionState::Trusted, Verify::Accept);

        let ok = fx
            .coordinator(Duration::from_secs(5))
            .pair(Some(&channel), "AB3456CD", &CancellationToken::new())
            .await
            .unwrap();
        assert!(!ok.persisted);
        assert_eq!(ok.token.expose(), b"device-token-1");

        let events = fx.auth_events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e.severity() == Severity::Warning));
        assert!(events.iter().any(|e| e.severity() == Severity::Info));
    }

    #[test]
    fn error_classification() {
        assert_eq!(
            PairingFailure::from(&GatelinkError::Connection("reset".into())),
            PairingFailure::GatewayNotConnected
        );
        assert_eq!(
            PairingFailure::from(&GatelinkError::Protocol("garbage".into())),
            PairingFailure::ServerRejected
        );
        assert!(matches!(
            GatelinkError::from(PairingFailure::Timeout),
            GatelinkError::Timeout
        ));
    }
}
