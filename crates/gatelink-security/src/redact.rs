// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Redaction of audit details.
//
// Two rules, applied in this order:
//
//   1. A run of exactly 64 hex characters delimited by word boundaries is a
//      full fingerprint; it is shortened to its first 8 characters plus "…".
//   2. Any remaining run of 32 or more ASCII alphanumerics is treated as a
//      secret (token, key, password hash) and replaced by `[REDACTED]`.
//
// Rule 1 runs first so fingerprints stay recognisable instead of collapsing
// into the generic marker. Intermediate buffers are zeroed on drop.

use regex::{Captures, NoExpand, Regex};
use zeroize::Zeroizing;

use gatelink_core::FINGERPRINT_DISPLAY_CHARS;
use gatelink_core::error::{GatelinkError, Result};

/// Replacement for anything that looks like a raw secret.
pub const REDACTED_MARKER: &str = "[REDACTED]";

const FINGERPRINT_PATTERN: &str = r"\b[0-9A-Fa-f]{64}\b";
const SECRET_PATTERN: &str = r"[A-Za-z0-9]{32,}";

/// Compiled redaction rules. Build once and share.
#[derive(Debug, Clone)]
pub struct Redactor {
    fingerprint: Regex,
    secret: Regex,
}

impl Redactor {
    /// Compile the rules. Failure here is a startup error; an audit log that
    /// cannot redact must not be constructed.
    pub fn new() -> Result<Self> {
        let compile =
            |pattern: &str| Regex::new(pattern).map_err(|e| GatelinkError::Redaction(e.to_string()));
        Ok(Self {
            fingerprint: compile(FINGERPRINT_PATTERN)?,
            secret: compile(SECRET_PATTERN)?,
        })
    }

    /// Apply both rules to `input`.
    pub fn redact(&self, input: &str) -> String {
        let shortened: Zeroizing<String> = Zeroizing::new(
            self.fingerprint
                .replace_all(input, |caps: &Captures<'_>| {
                    format!("{}…", &caps[0][..FINGERPRINT_DISPLAY_CHARS])
                })
                .into_owned(),
        );
        self.secret
            .replace_all(&shortened, NoExpand(REDACTED_MARKER))
            .into_owned()
    }

    /// True if `input` would be changed by redaction.
    pub fn needs_redaction(&self, input: &str) -> bool {
        self.fingerprint.is_match(input) || self.secret.is_match(input)
    }
}
