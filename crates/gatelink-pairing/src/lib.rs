// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// gatelink-pairing: one-time device authorization over a trusted connection.
//
// The user types the short code their gateway shows; the coordinator checks
// its format, asks the gateway to verify it, obtains a device token and puts
// that token in the credential vault.

pub mod code;
pub mod coordinator;
pub mod protocol;
pub mod transport;

pub use code::PairingCode;
pub use coordinator::{
    PairingAttempt, PairingCoordinator, PairingFailure, PairingState, PairingSuccess,
};
pub use protocol::{RpcError, RpcRequest, RpcResponse, TokenRequest};
pub use transport::GatewayChannel;
