// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// TLS connection to a gateway, verified by the pinning verifier, carrying
// newline-delimited JSON requests and responses.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{info, instrument, warn};

use gatelink_core::error::{GatelinkError, Result};
use gatelink_core::{EventType, Fingerprint, GatewayId, Severity};
use gatelink_pairing::{GatewayChannel, RpcRequest, RpcResponse};
use gatelink_security::{
    AuditLog, CertificateTrustStore, GatewayCertVerifier, SessionState, TlsVerificationSession,
    TrustPolicy, client_config,
};

/// Longest response line accepted from a gateway.
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Where and how to reach a gateway.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// `host:port` to dial. Defaults to the gateway id itself.
    pub address: Option<String>,
    /// TLS server name. Defaults to the host part of the gateway id.
    pub server_name: Option<String>,
    /// Bounds the TCP connect and, separately, the TLS handshake.
    pub connect_timeout: Duration,
}

/// An open, certificate-checked connection to one gateway.
pub struct GatewayClient {
    gateway: GatewayId,
    verifier: Arc<GatewayCertVerifier>,
    stream: Mutex<BufReader<TlsStream<TcpStream>>>,
    /// Set when an exchange was cut short; the stream may hold a stale reply.
    broken: AtomicBool,
}

impl GatewayClient {
    /// Dial the gateway and run the TLS handshake through a fresh
    /// verification session.
    #[instrument(skip_all, fields(gateway = %gateway))]
    pub async fn connect(
        gateway: GatewayId,
        options: &ConnectOptions,
        policy: TrustPolicy,
        store: Arc<CertificateTrustStore>,
        audit: Arc<AuditLog>,
    ) -> Result<Self> {
        let address = options
            .address
            .clone()
            .unwrap_or_else(|| gateway.as_str().to_string());
        let host = options
            .server_name
            .clone()
            .unwrap_or_else(|| host_of(gateway.as_str()).to_string());
        let server_name =
            ServerName::try_from(host).map_err(|_| GatelinkError::InvalidGatewayId)?;

        let session = TlsVerificationSession::new(gateway.clone(), policy, store, audit.clone());
        let verifier = Arc::new(GatewayCertVerifier::new(session));
        let connector = TlsConnector::from(Arc::new(client_config(verifier.clone())?));

        let tcp = match tokio::time::timeout(options.connect_timeout, TcpStream::connect(&address))
            .await
        {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(e)) => {
                return Err(connection_failed(&audit, &gateway, e.to_string()));
            }
            Err(_) => {
                return Err(connection_failed(&audit, &gateway, "connect timed out".into()));
            }
        };

        let handshake = connector.connect(server_name, tcp);
        let tls = match tokio::time::timeout(options.connect_timeout, handshake).await {
            Ok(Ok(tls)) => tls,
            Ok(Err(e)) => return Err(handshake_failed(&verifier, &audit, &gateway, e)),
            Err(_) => {
                return Err(connection_failed(&audit, &gateway, "TLS handshake timed out".into()));
            }
        };

        info!("connected");
        audit.log(
            EventType::Connection,
            &format!("connected to {gateway} at {address}"),
            Severity::Info,
        );

        Ok(Self {
            gateway,
            verifier,
            stream: Mutex::new(BufReader::new(tls)),
            broken: AtomicBool::new(false),
        })
    }

    /// Fingerprint of the certificate this connection was verified against.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.verifier.presented_fingerprint()
    }

    async fn exchange(&self, request: &RpcRequest) -> Result<RpcResponse> {
        let mut frame = serde_json::to_vec(request)?;
        frame.push(b'\n');

        let mut stream = self.stream.lock().await;
        stream
            .get_mut()
            .write_all(&frame)
            .await
            .map_err(|e| GatelinkError::Connection(e.to_string()))?;
        stream
            .get_mut()
            .flush()
            .await
            .map_err(|e| GatelinkError::Connection(e.to_string()))?;

        let mut line = String::new();
        let read = (&mut *stream)
            .take(MAX_FRAME_LEN as u64 + 1)
            .read_line(&mut line)
            .await
            .map_err(|e| GatelinkError::Connection(e.to_string()))?;
        if read == 0 {
            return Err(GatelinkError::Connection("gateway closed the connection".into()));
        }
        if line.len() > MAX_FRAME_LEN {
            return Err(GatelinkError::Protocol("response frame too large".into()));
        }
        serde_json::from_str(line.trim_end())
            .map_err(|e| GatelinkError::Protocol(format!("malformed response: {e}")))
    }
}

#[async_trait]
impl GatewayChannel for GatewayClient {
    fn gateway(&self) -> &GatewayId {
        &self.gateway
    }

    fn trust_state(&self) -> SessionState {
        self.verifier.state()
    }

    #[instrument(skip_all, fields(gateway = %self.gateway, method = %request.method))]
    async fn request(&self, request: &RpcRequest, timeout: Duration) -> Result<RpcResponse> {
        guarded(&self.broken, timeout, self.exchange(request)).await
    }
}

/// Run one exchange under `timeout`, refusing to start on a broken
/// connection and marking it broken if the exchange does not complete.
async fn guarded<F>(broken: &AtomicBool, timeout: Duration, exchange: F) -> Result<RpcResponse>
where
    F: Future<Output = Result<RpcResponse>>,
{
    if broken.load(Ordering::Acquire) {
        return Err(GatelinkError::Connection(
            "connection unusable after an interrupted request".into(),
        ));
    }
    let result = match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_elapsed) => Err(GatelinkError::Timeout),
    };
    if matches!(
        result,
        Err(GatelinkError::Timeout | GatelinkError::Connection(_) | GatelinkError::Protocol(_))
    ) {
        warn!("marking gateway connection unusable");
        broken.store(true, Ordering::Release);
    }
    result
}

/// Map a failed handshake to the verification verdict, if the session
/// reached one. The session has already written the audit entry then.
fn handshake_failed(
    verifier: &GatewayCertVerifier,
    audit: &AuditLog,
    gateway: &GatewayId,
    err: std::io::Error,
) -> GatelinkError {
    match verifier.rejection() {
        Some(rejection) => {
            warn!(error = %err, ?rejection, "handshake refused by certificate policy");
            rejection.to_error()
        }
        None => connection_failed(audit, gateway, err.to_string()),
    }
}

fn connection_failed(audit: &AuditLog, gateway: &GatewayId, reason: String) -> GatelinkError {
    warn!(%reason, "connection failed");
    audit.log(
        EventType::Connection,
        &format!("connection to {gateway} failed: {reason}"),
        Severity::Error,
    );
    GatelinkError::Connection(reason)
}

/// Host part of a `host[:port]` gateway id, without IPv6 brackets.
fn host_of(gateway: &str) -> &str {
    if let Some(rest) = gateway.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match gateway.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            host
        }
        _ => gateway,
    }
}
