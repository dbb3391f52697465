// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pairing codes: 8 characters from an alphabet without look-alikes.

use std::fmt;

use ring::rand::{SecureRandom, SystemRandom};

use gatelink_core::error::{GatelinkError, Result};

/// Characters a pairing code may contain. No 0/O, 1/I/L.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Exact length of a pairing code.
pub const CODE_LEN: usize = 8;

/// A syntactically valid pairing code, normalized to upper case.
#[derive(Clone, PartialEq, Eq)]
pub struct PairingCode(String);

impl PairingCode {
    /// Normalize (trim, uppercase) and validate user input.
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim().to_ascii_uppercase();
        let valid = normalized.len() == CODE_LEN
            && normalized.bytes().all(|b| CODE_ALPHABET.contains(&b));
        if valid {
            Ok(Self(normalized))
        } else {
            Err(GatelinkError::InvalidCodeFormat)
        }
    }

    /// Issue a fresh random code (gateway side, test gateways, tooling).
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        // Largest multiple of the alphabet size that fits in a byte; bytes at
        // or above it are discarded so every character is equally likely.
        let limit = (u8::MAX as usize + 1) / CODE_ALPHABET.len() * CODE_ALPHABET.len();

        let mut code = String::with_capacity(CODE_LEN);
        let mut buf = [0u8; 16];
        while code.len() < CODE_LEN {
            rng.fill(&mut buf)
                .map_err(|_| GatelinkError::Identity("system RNG unavailable".into()))?;
            for &b in buf.iter().filter(|&&b| (b as usize) < limit) {
                if code.len() == CODE_LEN {
                    break;
                }
                code.push(CODE_ALPHABET[b as usize % CODE_ALPHABET.len()] as char);
            }
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PairingCode(********)")
    }
}
