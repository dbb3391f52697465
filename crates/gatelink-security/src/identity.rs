// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device identity: an ECDSA P-256 key pair per gateway.
//
// The private key is held as a PKCS#8 v1 DER document and lives in the
// credential vault under the `deviceIdentity` kind. The public key is the
// uncompressed SEC1 encoding (0x04 || x || y, 65 bytes) that the gateway
// records when the device pairs.

use std::fmt;

use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, KeyPair};
use tracing::{debug, info, instrument};
use zeroize::Zeroizing;

use gatelink_core::error::{GatelinkError, Result};
use gatelink_core::{AccessibilityTier, CredentialKind, GatewayId};

use crate::vault::CredentialVault;

/// This device's signing key for one gateway.
pub struct DeviceIdentity {
    /// PKCS#8 v1 DER-encoded private key (includes the public key).
    pkcs8_der: Zeroizing<Vec<u8>>,
    /// Uncompressed SEC1 public key bytes.
    public_key: Vec<u8>,
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

impl DeviceIdentity {
    /// Generate a fresh key pair using the OS CSPRNG.
    #[instrument]
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let pkcs8_document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .map_err(|e| GatelinkError::Identity(format!("key generation failed: {e}")))?;
        Self::from_pkcs8(pkcs8_document.as_ref())
    }

    /// Rebuild an identity from stored PKCS#8 bytes.
    pub fn from_pkcs8(pkcs8_der: &[u8]) -> Result<Self> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8_der, &rng)
            .map_err(|e| GatelinkError::Identity(format!("key parsing failed: {e}")))?;

        Ok(Self {
            pkcs8_der: Zeroizing::new(pkcs8_der.to_vec()),
            public_key: key_pair.public_key().as_ref().to_vec(),
        })
    }

    /// Load the identity for `gateway` from the vault, creating and storing
    /// one if none exists. The flag is true when a new key was created.
    #[instrument(skip(vault), fields(gateway = %gateway))]
    pub fn load_or_create(
        vault: &CredentialVault,
        gateway: &GatewayId,
        tier: AccessibilityTier,
    ) -> Result<(Self, bool)> {
        if let Some(stored) = vault.retrieve(gateway, CredentialKind::DeviceIdentity)? {
            debug!("device identity loaded");
            return Ok((Self::from_pkcs8(stored.expose())?, false));
        }

        let identity = Self::generate()?;
        vault.store(
            gateway,
            CredentialKind::DeviceIdentity,
            identity.private_key_pkcs8_der(),
            tier,
        )?;
        info!(public_key = %identity.public_key_hex(), "device identity created");
        Ok((identity, true))
    }

    pub fn private_key_pkcs8_der(&self) -> &[u8] {
        &self.pkcs8_der
    }

    /// The uncompressed SEC1 public key (65 bytes for P-256).
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(&self.public_key)
    }

    /// Sign `message` (ECDSA P-256 + SHA-256, ASN.1 DER signature).
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let rng = SystemRandom::new();
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &self.pkcs8_der, &rng)
                .map_err(|e| GatelinkError::Identity(format!("key load failed: {e}")))?;
        let sig = key_pair
            .sign(&rng, message)
            .map_err(|e| GatelinkError::Identity(format!("signing failed: {e}")))?;
        Ok(sig.as_ref().to_vec())
    }
}
