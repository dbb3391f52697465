// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The seam between pairing logic and whatever carries bytes to the gateway.

use std::time::Duration;

use async_trait::async_trait;
use zeroize::Zeroizing;

use gatelink_core::GatewayId;
use gatelink_core::error::Result;
use gatelink_security::SessionState;

use crate::protocol::{RpcRequest, RpcResponse, TokenRequest};

/// A connection to one gateway whose certificate has been through
/// [`gatelink_security::TlsVerificationSession`].
#[async_trait]
pub trait GatewayChannel: Send + Sync {
    fn gateway(&self) -> &GatewayId;

    /// Trust state of the handshake that opened this channel. Pairing only
    /// proceeds over [`SessionState::Trusted`].
    fn trust_state(&self) -> SessionState;

    /// Send one request and wait at most `timeout` for its response.
    async fn request(&self, request: &RpcRequest, timeout: Duration) -> Result<RpcResponse>;

    /// Obtain a device token after the code has been verified.
    async fn issue_device_token(
        &self,
        request: &TokenRequest,
        timeout: Duration,
    ) -> Result<Zeroizing<String>> {
        let response = self.request(&RpcRequest::token_issue(request), timeout).await?;
        response.into_token().map(Zeroizing::new)
    }
}
