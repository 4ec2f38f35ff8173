//! Ed25519 signing and verification.

use ed25519_dalek::{
    Signature as DalekSignature, Signer as _, SigningKey, Verifier as _, VerifyingKey,
};
use thiserror::Error;

use crate::metadata::{Key, KeyType};

/// Size of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Errors that can occur during signing and verification.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SignerError {
    /// The public key material could not be decoded.
    #[error("invalid public key for '{key_id}': {reason}")]
    InvalidPublicKey {
        /// The key identifier.
        key_id: String,
        /// What was wrong with the material.
        reason: String,
    },

    /// The signature bytes are malformed.
    #[error("malformed signature: expected {SIGNATURE_SIZE} bytes, got {actual}")]
    MalformedSignature {
        /// Length of the rejected signature.
        actual: usize,
    },

    /// The signature does not verify over the payload.
    #[error("signature verification failed for key '{key_id}'")]
    VerificationFailed {
        /// The key that rejected the signature.
        key_id: String,
    },

    /// The key kind cannot verify in-process.
    #[error("key type '{key_type}' is not supported for in-process verification")]
    UnsupportedKeyType {
        /// The unsupported kind.
        key_type: KeyType,
    },

    /// The key entry carries no public material.
    #[error("key '{key_id}' has no public key material")]
    MissingPublicKey {
        /// The key identifier.
        key_id: String,
    },
}

/// Produces signatures over raw payload bytes.
///
/// Implementations identify themselves by the canonical fingerprint of
/// their public key, so signatures can be matched to policy [`Key`]
/// entries.
pub trait Signer: Send + Sync {
    /// Returns the canonical identifier of the signing key.
    fn key_id(&self) -> &str;

    /// Signs `payload`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing key is unavailable or refuses to
    /// sign.
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignerError>;
}

/// Verifies signatures over raw payload bytes.
pub trait Verifier: Send + Sync {
    /// Returns the canonical identifier of the verification key.
    fn key_id(&self) -> &str;

    /// Verifies `signature` over `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::VerificationFailed`] for an invalid
    /// signature and [`SignerError::MalformedSignature`] for undecodable
    /// bytes.
    fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<(), SignerError>;
}

/// An in-process Ed25519 signer.
pub struct Ed25519Signer {
    signing_key: SigningKey,
    public_key: Key,
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("key_id", &self.public_key.key_id)
            .finish_non_exhaustive()
    }
}

impl Ed25519Signer {
    /// Generates a fresh signing key.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self::from_signing_key(SigningKey::generate(&mut rng))
    }

    /// Wraps an existing signing key.
    #[must_use]
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_hex = hex_encode(signing_key.verifying_key().as_bytes());
        let public_key = Key::new_ed25519(public_hex);
        Self {
            signing_key,
            public_key,
        }
    }

    /// Returns the public key as a policy [`Key`] entry.
    #[must_use]
    pub fn public_key(&self) -> Key {
        self.public_key.clone()
    }
}

impl Signer for Ed25519Signer {
    fn key_id(&self) -> &str {
        &self.public_key.key_id
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(self.signing_key.sign(payload).to_bytes().to_vec())
    }
}

/// An Ed25519 verifier resolved from a policy [`Key`] entry.
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    key_id: String,
    verifying_key: VerifyingKey,
}

impl Ed25519Verifier {
    /// Builds a verifier from a policy key entry.
    ///
    /// # Errors
    ///
    /// - [`SignerError::UnsupportedKeyType`] for non-Ed25519 keys
    /// - [`SignerError::MissingPublicKey`] when the entry has no material
    /// - [`SignerError::InvalidPublicKey`] for undecodable material
    pub fn from_key(key: &Key) -> Result<Self, SignerError> {
        if key.key_type != KeyType::Ed25519 {
            return Err(SignerError::UnsupportedKeyType {
                key_type: key.key_type,
            });
        }

        let public_hex =
            key.key_val
                .public
                .as_deref()
                .ok_or_else(|| SignerError::MissingPublicKey {
                    key_id: key.key_id.clone(),
                })?;

        let bytes = hex_decode(public_hex).ok_or_else(|| SignerError::InvalidPublicKey {
            key_id: key.key_id.clone(),
            reason: "public key is not valid hex".to_string(),
        })?;

        let bytes: [u8; PUBLIC_KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| SignerError::InvalidPublicKey {
                    key_id: key.key_id.clone(),
                    reason: format!("expected {PUBLIC_KEY_SIZE} bytes"),
                })?;

        let verifying_key =
            VerifyingKey::from_bytes(&bytes).map_err(|e| SignerError::InvalidPublicKey {
                key_id: key.key_id.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            key_id: key.key_id.clone(),
            verifying_key,
        })
    }
}

impl Verifier for Ed25519Verifier {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<(), SignerError> {
        let bytes: [u8; SIGNATURE_SIZE] =
            signature
                .try_into()
                .map_err(|_| SignerError::MalformedSignature {
                    actual: signature.len(),
                })?;
        let signature = DalekSignature::from_bytes(&bytes);

        self.verifying_key
            .verify(payload, &signature)
            .map_err(|_| SignerError::VerificationFailed {
                key_id: self.key_id.clone(),
            })
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    s.as_bytes()
        .chunks(2)
        .map(|chunk| {
            let hex_str = std::str::from_utf8(chunk).ok()?;
            u8::from_str_radix(hex_str, 16).ok()
        })
        .collect()
}
