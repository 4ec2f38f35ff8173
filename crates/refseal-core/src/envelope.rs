//! DSSE-style signature envelopes.
//!
//! Metadata documents travel inside detached-signature envelopes: the
//! payload is the canonical JSON (RFC 8785) of the document, base64-armored,
//! and each signature covers the DSSE pre-authentication encoding of the
//! payload type and payload bytes. Envelopes are immutable once written to
//! the object store; signing replaces at most a prior signature by the same
//! key.

use std::collections::{BTreeMap, BTreeSet};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{Signer, SignerError, Verifier};

/// Payload type tag carried by every envelope.
pub const PAYLOAD_TYPE: &str = "application/vnd.refseal+json";

/// Errors that can occur constructing, signing, or verifying envelopes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnvelopeError {
    /// The payload could not be serialized canonically.
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The payload is not valid base64.
    #[error("payload is not valid base64")]
    PayloadEncoding,

    /// A signature is not valid base64.
    #[error("signature by '{key_id}' is not valid base64")]
    SignatureEncoding {
        /// The key whose signature was undecodable.
        key_id: String,
    },

    /// A signature by a trusted key failed to verify.
    #[error("bad signature by key '{key_id}'")]
    BadSignature {
        /// The key whose signature failed.
        key_id: String,
    },

    /// The signer failed to produce a signature.
    #[error(transparent)]
    Signer(#[from] SignerError),

    /// The envelope carries an unexpected payload type.
    #[error("unexpected payload type '{actual}', expected '{expected}'")]
    UnexpectedPayloadType {
        /// The payload type found.
        actual: String,
        /// The payload type required.
        expected: String,
    },
}

/// A single detached signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    /// Canonical identifier of the signing key.
    #[serde(rename = "keyid")]
    pub key_id: String,

    /// Base64-encoded signature bytes.
    pub sig: String,
}

/// A DSSE-style envelope: canonical payload plus detached signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Payload type tag.
    pub payload_type: String,

    /// Base64-encoded canonical payload bytes.
    pub payload: String,

    /// Detached signatures, at most one per key.
    pub signatures: Vec<EnvelopeSignature>,
}

impl Envelope {
    /// Wraps `payload` in an unsigned envelope.
    ///
    /// The payload is serialized to RFC 8785 canonical JSON, so sealing
    /// the same document twice yields byte-identical envelopes.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn seal<T: Serialize>(payload: &T) -> Result<Self, EnvelopeError> {
        let bytes = serde_jcs::to_vec(payload)?;
        Ok(Self {
            payload_type: PAYLOAD_TYPE.to_string(),
            payload: BASE64.encode(bytes),
            signatures: Vec::new(),
        })
    }

    /// Returns the decoded payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::PayloadEncoding`] for invalid base64.
    pub fn payload_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        BASE64
            .decode(&self.payload)
            .map_err(|_| EnvelopeError::PayloadEncoding)
    }

    /// Deserializes the payload as `T`.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid base64 or a payload that does not
    /// parse as `T`.
    pub fn open<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        let bytes = self.payload_bytes()?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Returns the DSSE pre-authentication encoding signed by every
    /// signature on this envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::PayloadEncoding`] for invalid base64.
    pub fn pre_authentication_encoding(&self) -> Result<Vec<u8>, EnvelopeError> {
        let payload = self.payload_bytes()?;
        Ok(pae(&self.payload_type, &payload))
    }

    /// Signs the envelope, replacing any prior signature by the same key.
    ///
    /// # Errors
    ///
    /// Propagates signer failures and payload decoding errors.
    pub fn sign(&mut self, signer: &dyn Signer) -> Result<(), EnvelopeError> {
        let message = self.pre_authentication_encoding()?;
        let signature = signer.sign(&message)?;
        let key_id = signer.key_id().to_string();

        self.signatures.retain(|s| s.key_id != key_id);
        self.signatures.push(EnvelopeSignature {
            key_id,
            sig: BASE64.encode(signature),
        });
        Ok(())
    }

    /// Returns the key identifiers whose signatures verify under the
    /// supplied verifiers.
    ///
    /// Signatures by keys outside `verifiers` are ignored; they neither
    /// count nor invalidate. A signature by a known key that fails to
    /// verify is logged and does not count.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::PayloadEncoding`] for invalid base64
    /// payloads and [`EnvelopeError::SignatureEncoding`] for an
    /// undecodable signature by a known key.
    pub fn accepted_signers(
        &self,
        verifiers: &BTreeMap<String, Box<dyn Verifier>>,
    ) -> Result<BTreeSet<String>, EnvelopeError> {
        let message = self.pre_authentication_encoding()?;
        let mut accepted = BTreeSet::new();

        for signature in &self.signatures {
            let Some(verifier) = verifiers.get(&signature.key_id) else {
                tracing::debug!(key_id = %signature.key_id, "ignoring signature by unknown key");
                continue;
            };

            let sig_bytes = BASE64.decode(&signature.sig).map_err(|_| {
                EnvelopeError::SignatureEncoding {
                    key_id: signature.key_id.clone(),
                }
            })?;

            match verifier.verify(&message, &sig_bytes) {
                Ok(()) => {
                    accepted.insert(signature.key_id.clone());
                },
                Err(err) => {
                    tracing::warn!(
                        key_id = %signature.key_id,
                        error = %err,
                        "signature by trusted key failed verification"
                    );
                },
            }
        }

        Ok(accepted)
    }

    /// Checks the payload type tag.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::UnexpectedPayloadType`] on mismatch.
    pub fn require_payload_type(&self, expected: &str) -> Result<(), EnvelopeError> {
        if self.payload_type == expected {
            Ok(())
        } else {
            Err(EnvelopeError::UnexpectedPayloadType {
                actual: self.payload_type.clone(),
                expected: expected.to_string(),
            })
        }
    }
}

/// DSSE pre-authentication encoding:
/// `DSSEv1 <len(type)> <type> <len(payload)> <payload>`.
#[must_use]
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(payload.len() + payload_type.len() + 32);
    message.extend_from_slice(b"DSSEv1 ");
    message.extend_from_slice(payload_type.len().to_string().as_bytes());
    message.push(b' ');
    message.extend_from_slice(payload_type.as_bytes());
    message.push(b' ');
    message.extend_from_slice(payload.len().to_string().as_bytes());
    message.push(b' ');
    message.extend_from_slice(payload);
    message
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::crypto::{Ed25519Signer, Ed25519Verifier};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        value: u32,
    }

    fn doc() -> Doc {
        Doc {
            name: "example".to_string(),
            value: 7,
        }
    }

    fn verifier_map(signers: &[&Ed25519Signer]) -> BTreeMap<String, Box<dyn Verifier>> {
        signers
            .iter()
            .map(|s| {
                let v = Ed25519Verifier::from_key(&s.public_key()).unwrap();
                (s.key_id().to_string(), Box::new(v) as Box<dyn Verifier>)
            })
            .collect()
    }

    #[test]
    fn test_pae_encoding() {
        let message = pae("application/example", b"hello");
        assert_eq!(
            message,
            b"DSSEv1 19 application/example 5 hello".to_vec()
        );
    }

    #[test]
    fn test_seal_is_deterministic() {
        let env1 = Envelope::seal(&doc()).unwrap();
        let env2 = Envelope::seal(&doc()).unwrap();
        assert_eq!(env1, env2);
        assert_eq!(env1.payload_type, PAYLOAD_TYPE);
    }

    #[test]
    fn test_open_roundtrip() {
        let env = Envelope::seal(&doc()).unwrap();
        let back: Doc = env.open().unwrap();
        assert_eq!(back, doc());
    }

    #[test]
    fn test_sign_and_accept() {
        let signer = Ed25519Signer::generate();
        let mut env = Envelope::seal(&doc()).unwrap();
        env.sign(&signer).unwrap();

        let accepted = env.accepted_signers(&verifier_map(&[&signer])).unwrap();
        assert!(accepted.contains(signer.key_id()));
        assert_eq!(accepted.len(), 1);
    }

    #[test]
    fn test_resign_replaces_signature() {
        let signer = Ed25519Signer::generate();
        let mut env = Envelope::seal(&doc()).unwrap();
        env.sign(&signer).unwrap();
        env.sign(&signer).unwrap();
        assert_eq!(env.signatures.len(), 1);
    }

    #[test]
    fn test_unknown_signer_ignored() {
        let trusted = Ed25519Signer::generate();
        let stranger = Ed25519Signer::generate();

        let mut env = Envelope::seal(&doc()).unwrap();
        env.sign(&trusted).unwrap();
        env.sign(&stranger).unwrap();

        // The stranger's signature neither counts nor invalidates.
        let accepted = env.accepted_signers(&verifier_map(&[&trusted])).unwrap();
        assert_eq!(accepted.len(), 1);
        assert!(accepted.contains(trusted.key_id()));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let signer = Ed25519Signer::generate();
        let mut env = Envelope::seal(&doc()).unwrap();
        env.sign(&signer).unwrap();

        env.payload = BASE64.encode(b"{\"name\":\"tampered\",\"value\":7}");

        let accepted = env.accepted_signers(&verifier_map(&[&signer])).unwrap();
        assert!(accepted.is_empty());
    }

    #[test]
    fn test_signature_set_survives_reserialization() {
        let signer = Ed25519Signer::generate();
        let mut env = Envelope::seal(&doc()).unwrap();
        env.sign(&signer).unwrap();

        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);

        let accepted = back.accepted_signers(&verifier_map(&[&signer])).unwrap();
        assert_eq!(accepted.len(), 1);
    }

    #[test]
    fn test_require_payload_type() {
        let env = Envelope::seal(&doc()).unwrap();
        env.require_payload_type(PAYLOAD_TYPE).unwrap();
        assert!(matches!(
            env.require_payload_type("application/other"),
            Err(EnvelopeError::UnexpectedPayloadType { .. })
        ));
    }
}
