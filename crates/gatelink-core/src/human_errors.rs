// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages.
//
// Every technical error is mapped to a short plain-English message and a
// suggestion. Nothing here echoes error payloads: platform text, fingerprints
// and identifiers stay in the audit trail and the diagnostic log.

use crate::error::GatelinkError;

/// The one message shown for any pairing failure. The specific reason is
/// recorded in the audit log only.
pub const PAIRING_FAILED_MESSAGE: &str =
    "Pairing didn't work. Check the code shown on your gateway and try again.";

/// What the user can do about an error. Drives icon and button choice in UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remedy {
    /// Trying the same thing again may work.
    TryAgain,
    /// The user has to change something first.
    ActionRequired,
    /// Retrying will not help.
    Permanent,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the user should try (shown as body text).
    pub suggestion: String,
    /// Whether an explicit user retry makes sense. Nothing retries automatically.
    pub retriable: bool,
    pub remedy: Remedy,
}

impl HumanError {
    fn new(message: &str, suggestion: &str, remedy: Remedy) -> Self {
        Self {
            message: message.into(),
            suggestion: suggestion.into(),
            retriable: remedy == Remedy::TryAgain,
            remedy,
        }
    }
}

/// Convert a `GatelinkError` into a `HumanError` safe to show the user.
pub fn humanize_error(err: &GatelinkError) -> HumanError {
    use GatelinkError as E;
    use Remedy::*;

    match err {
        // -- Trust --
        E::TrustViolation | E::EmptyCertificateChain => HumanError::new(
            "This gateway's identity has changed.",
            "Do not continue unless you replaced the gateway's certificate yourself. If you did, remove the saved certificate for this gateway and connect again.",
            ActionRequired,
        ),

        E::UnknownCertificate => HumanError::new(
            "This gateway isn't trusted yet.",
            "Automatic trust for new gateways is turned off. Turn it on in Settings to connect to a new gateway.",
            ActionRequired,
        ),

        E::PinConflict => HumanError::new(
            "A different certificate is already saved for this gateway.",
            "Remove the saved certificate first if you want to trust a new one.",
            ActionRequired,
        ),

        E::SessionFinished => HumanError::new(
            "That connection attempt has already ended.",
            "Start a new connection.",
            TryAgain,
        ),

        // -- Format --
        E::InvalidGatewayId => HumanError::new(
            "The gateway address doesn't look right.",
            "Check the address and try again. It should look like gateway.example.net.",
            ActionRequired,
        ),

        E::InvalidFingerprint => HumanError::new(
            "That certificate fingerprint isn't valid.",
            "A fingerprint is 64 hexadecimal characters.",
            ActionRequired,
        ),

        // -- Pairing --
        E::InvalidCodeFormat
        | E::GatewayNotConnected
        | E::Timeout
        | E::ServerRejected
        | E::Cancelled => HumanError::new(
            PAIRING_FAILED_MESSAGE,
            "Make sure this device is connected to your gateway, then enter the code again.",
            TryAgain,
        ),

        E::Connection(_) | E::Protocol(_) => HumanError::new(
            "We couldn't talk to your gateway.",
            "Make sure the gateway is running and reachable from this device, then try again.",
            TryAgain,
        ),

        // -- Vault / keys --
        E::EmptySecret => HumanError::new(
            "Nothing to save.",
            "Enter a value before saving.",
            ActionRequired,
        ),

        E::Encryption(_) | E::Decryption(_) | E::Identity(_) => HumanError::new(
            "There was a problem with secure storage.",
            "The app's saved credentials may need to be reset. Sign out of this gateway and pair again.",
            Permanent,
        ),

        E::Redaction(_) => HumanError::new(
            "The app couldn't start its security log.",
            "Please reinstall or update the app.",
            Permanent,
        ),

        // -- Storage --
        E::Database(_) | E::Serialization(_) => HumanError::new(
            "The app's data storage had a problem.",
            "Try closing and reopening the app.",
            TryAgain,
        ),

        E::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::PermissionDenied {
                HumanError::new(
                    "The app doesn't have permission to use its data folder.",
                    "Check the folder permissions and try again.",
                    ActionRequired,
                )
            } else {
                HumanError::new(
                    "There was a problem reading or writing a file.",
                    "Try again. If this keeps happening, your device's storage may be full.",
                    TryAgain,
                )
            }
        }

        // -- Platform --
        E::Bridge(_) => HumanError::new(
            "The device's secure storage didn't respond.",
            "Unlock your device and try again.",
            TryAgain,
        ),

        E::PlatformUnavailable => HumanError::new(
            "This feature isn't available on your device.",
            "Secure credential storage requires a supported phone, tablet or desktop setup.",
            Permanent,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pairing_failure_shares_one_message() {
        for err in [
            GatelinkError::InvalidCodeFormat,
            GatelinkError::GatewayNotConnected,
            GatelinkError::Timeout,
            GatelinkError::ServerRejected,
            GatelinkError::Cancelled,
        ] {
            assert_eq!(humanize_error(&err).message, PAIRING_FAILED_MESSAGE);
        }
    }

    #[test]
    fn trust_violation_is_not_retriable() {
        let human = humanize_error(&GatelinkError::TrustViolation);
        assert_eq!(human.remedy, Remedy::ActionRequired);
        assert!(!human.retriable);
    }

    #[test]
    fn payloads_never_reach_the_user() {
        let secret = "kSecAttrAccount=gw.local/token status=-25308";
        for err in [
            GatelinkError::Bridge(secret.into()),
            GatelinkError::Database(secret.into()),
            GatelinkError::Connection(secret.into()),
            GatelinkError::Decryption(secret.into()),
        ] {
            let human = humanize_error(&err);
            assert!(!human.message.contains(secret));
            assert!(!human.suggestion.contains(secret));
        }
    }
}
