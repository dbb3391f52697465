// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// JSON-RPC style messages exchanged with the gateway during pairing.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use gatelink_core::error::{GatelinkError, Result};

use crate::code::PairingCode;

pub const PAIR_VERIFY_METHOD: &str = "device.pair.verify";
pub const TOKEN_ISSUE_METHOD: &str = "device.token.issue";

/// A request frame: `{"method": ..., "params": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Ask the gateway to confirm the code it is currently displaying.
    pub fn pair_verify(code: &PairingCode) -> Self {
        Self::new(PAIR_VERIFY_METHOD, json!({ "code": code.as_str() }))
    }

    pub fn token_issue(request: &TokenRequest) -> Self {
        match &request.device_public_key {
            Some(key) => Self::new(TOKEN_ISSUE_METHOD, json!({ "devicePublicKey": key })),
            None => Self::new(TOKEN_ISSUE_METHOD, json!({})),
        }
    }
}

/// Error body of a negative response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// A response frame: `{"ok": bool, "result": ..., "error": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(RpcError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    /// A positive verify response is `ok` and does not say `"verified": false`.
    pub fn is_positive(&self) -> bool {
        self.ok
            && self
                .result
                .as_ref()
                .and_then(|r| r.get("verified"))
                .and_then(Value::as_bool)
                .unwrap_or(true)
    }

    /// Pull the issued token out of a `device.token.issue` response.
    pub fn into_token(self) -> Result<String> {
        if !self.ok {
            return Err(GatelinkError::ServerRejected);
        }
        match self.result {
            Some(Value::Object(mut map)) => match map.remove("token") {
                Some(Value::String(token)) if !token.is_empty() => Ok(token),
                _ => Err(GatelinkError::Protocol("token missing from response".into())),
            },
            _ => Err(GatelinkError::Protocol("token missing from response".into())),
        }
    }
}

/// Parameters for token issuance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRequest {
    /// Hex SEC1 public key of the device identity the token is bound to.
    pub device_public_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_request_wire_shape() {
        let code = PairingCode::parse("ab3456cd").unwrap();
        let req = RpcRequest::pair_verify(&code);
        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(
            wire,
            json!({"method": "device.pair.verify", "params": {"code": "AB3456CD"}})
        );
    }

    #[test]
    fn token_request_carries_public_key() {
        let req = RpcRequest::token_issue(&TokenRequest {
            device_public_key: Some("abcd".into()),
        });
        assert_eq!(req.method, TOKEN_ISSUE_METHOD);
        assert_eq!(req.params["devicePublicKey"], "abcd");
    }

    #[test]
    fn negative_responses() {
        let rejected: RpcResponse =
            serde_json::from_str(r#"{"ok":false,"error":{"code":"bad_code","message":"nope"}}"#)
                .unwrap();
        assert!(!rejected.is_positive());
        assert_eq!(rejected.error.as_ref().unwrap().code, "bad_code");

        let unverified = RpcResponse::success(json!({"verified": false}));
        assert!(!unverified.is_positive());
    }

    #[test]
    fn bare_ok_is_positive() {
        let resp: RpcResponse = serde_json::from_str(r#"{"ok":true}"#).unwrap();
        assert!(resp.is_positive());
    }

    #[test]
    fn token_extraction() {
        let resp = RpcResponse::success(json!({"token": "tok-1"}));
        assert_eq!(resp.into_token().unwrap(), "tok-1");

        assert!(matches!(
            RpcResponse::success(json!({"token": ""})).into_token(),
            Err(GatelinkError::Protocol(_))
        ));
        assert!(matches!(
            RpcResponse::failure("denied", "no").into_token(),
            Err(GatelinkError::ServerRejected)
        ));
    }
}
