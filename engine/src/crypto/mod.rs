//! Signature verification for release digest manifests
//!
//! Release digest manifests (`SHA256SUMS`) are signed with detached OpenPGP
//! signatures. This module checks such a signature against the trusted
//! release key.
//!
//! # Security
//!
//! The trusted key is embedded at compile time via build.rs. There is no
//! runtime surface for changing it: a key read from the same filesystem the
//! cache lives on would prove nothing.

use chrono::Utc;
use pgp::types::PublicKeyTrait;
use pgp::{Deserializable, SignedPublicKey, StandaloneSignature};
use pluck_sdk::PullError;

// The key is embedded at compile time.
// In development: the key in keys/dev_public_key.asc (clearly marked).
// In production: the release key selected by build.rs.
const TRUSTED_KEY_ARMORED: &str = include_str!(concat!(env!("OUT_DIR"), "/trusted_key.asc"));

const ARMOR_PREFIX: &[u8] = b"-----BEGIN";

/// Verifies detached signatures against the embedded release key
///
/// Verification is a pure function of the signed bytes, the signature bytes
/// and the current time. The verifier holds no mutable state and can be
/// shared across threads.
///
/// # Examples
///
/// ```no_run
/// use pluck_engine::crypto::SignatureVerifier;
///
/// let verifier = SignatureVerifier::new().unwrap();
/// let sums = std::fs::read("plug_0.1.0_SHA256SUMS").unwrap();
/// let sig = std::fs::read("plug_0.1.0_SHA256SUMS.sig").unwrap();
/// verifier.verify(&sums, &sig).unwrap();
/// ```
#[derive(Debug)]
pub struct SignatureVerifier {
    trusted_key: SignedPublicKey,
}

impl SignatureVerifier {
    /// Create a verifier for the embedded release key
    ///
    /// # Errors
    ///
    /// Returns `PullError::Fatal` if the embedded key does not parse or its
    /// self-signatures do not verify. This should never happen in a properly
    /// built binary.
    pub fn new() -> Result<Self, PullError> {
        let (trusted_key, _headers) = SignedPublicKey::from_string(TRUSTED_KEY_ARMORED)
            .map_err(|e| PullError::Fatal(format!("Invalid embedded release key: {}", e)))?;

        trusted_key
            .verify()
            .map_err(|e| PullError::Fatal(format!("Embedded release key is not self-consistent: {}", e)))?;

        tracing::debug!(
            key_id = ?trusted_key.key_id(),
            subkeys = trusted_key.public_subkeys.len(),
            "Loaded embedded release key"
        );

        Ok(Self { trusted_key })
    }

    /// Verify a detached signature over `signed`
    ///
    /// The signature may be binary or ASCII-armored. It is accepted if it was
    /// made by the primary key or by any public subkey of the release key,
    /// and the key has not expired.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason. The caller collects reasons across
    /// candidate signatures.
    pub fn verify(&self, signed: &[u8], detached_signature: &[u8]) -> Result<(), String> {
        self.check_not_expired()?;

        let signature = parse_signature(detached_signature)?;

        let primary_err = match signature.verify(&self.trusted_key, signed) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        for subkey in &self.trusted_key.public_subkeys {
            if signature.verify(subkey, signed).is_ok() {
                return Ok(());
            }
        }

        Err(format!(
            "signature does not verify under the release key: {}",
            primary_err
        ))
    }

    fn check_not_expired(&self) -> Result<(), String> {
        match self.trusted_key.expires_at() {
            Some(expiry) if expiry <= Utc::now() => {
                Err(format!("release key expired at {}", expiry.to_rfc3339()))
            }
            _ => Ok(()),
        }
    }
}

fn parse_signature(bytes: &[u8]) -> Result<StandaloneSignature, String> {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());

    if bytes[start..].starts_with(ARMOR_PREFIX) {
        StandaloneSignature::from_armor_single(bytes)
            .map(|(signature, _headers)| signature)
            .map_err(|e| format!("malformed armored signature: {}", e))
    } else {
        StandaloneSignature::from_bytes(bytes).map_err(|e| format!("malformed signature: {}", e))
    }
}
