// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Certificate fingerprints: SHA-256 over the leaf certificate's DER bytes.

use gatelink_core::error::{GatelinkError, Result};
use gatelink_core::{FINGERPRINT_LEN, Fingerprint};
use sha2::{Digest, Sha256};

/// Fingerprint of a DER-encoded certificate.
///
/// The bytes are hashed as given; nothing is parsed, so a malformed
/// certificate still has a stable fingerprint.
pub fn fingerprint_der(der: &[u8]) -> Fingerprint {
    let digest = Sha256::digest(der);
    let mut bytes = [0u8; FINGERPRINT_LEN];
    bytes.copy_from_slice(&digest);
    Fingerprint::from_bytes(bytes)
}

/// Parse a fingerprint as users tend to paste it.
///
/// Accepts plain hex as well as the colon- or space-separated pairs that
/// browsers and `openssl x509 -fingerprint` print, with an optional
/// `SHA256:` / `sha256=` prefix. Anything that is not exactly 32 bytes of
/// hex is rejected.
pub fn parse_fingerprint(input: &str) -> Result<Fingerprint> {
    let trimmed = input.trim();
    let body = trimmed
        .split_once(['=', ':'])
        .filter(|(prefix, _)| prefix.eq_ignore_ascii_case("sha256"))
        .map_or(trimmed, |(_, rest)| rest);

    let compact: String = body
        .chars()
        .filter(|c| !matches!(c, ':' | ' ' | '-'))
        .collect();
    if compact.len() != FINGERPRINT_LEN * 2 {
        return Err(GatelinkError::InvalidFingerprint);
    }
    Fingerprint::from_hex(&compact)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SHA-256 of the empty byte slice (well-known constant).
    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn fingerprint_of_empty_input() {
        assert_eq!(fingerprint_der(b"").to_hex(), EMPTY_SHA256);
    }

    #[test]
    fn fingerprint_known_value() {
        // SHA-256("hello")
        let expected = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert_eq!(fingerprint_der(b"hello").to_hex(), expected);
    }

    #[test]
    fn distinct_certificates_distinct_fingerprints() {
        let a = fingerprint_der(&[0x30, 0x82, 0x01, 0x00]);
        let b = fingerprint_der(&[0x30, 0x82, 0x01, 0x01]);
        assert_ne!(a, b);
    }

    #[test]
    fn parse_accepts_common_formats() {
        let fp = fingerprint_der(b"hello");
        let hex = fp.to_hex();
        let colons = hex
            .as_bytes()
            .chunks(2)
            .map(|pair| std::str::from_utf8(pair).unwrap().to_ascii_uppercase())
            .collect::<Vec<_>>()
            .join(":");

        assert_eq!(parse_fingerprint(&hex).unwrap(), fp);
        assert_eq!(parse_fingerprint(&colons).unwrap(), fp);
        assert_eq!(parse_fingerprint(&format!("SHA256:{colons}")).unwrap(), fp);
        assert_eq!(parse_fingerprint(&format!("  sha256={hex}  ")).unwrap(), fp);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!(parse_fingerprint("abcd").is_err());
        assert!(parse_fingerprint(&format!("{EMPTY_SHA256}00")).is_err());
        assert!(parse_fingerprint("").is_err());
    }
}
