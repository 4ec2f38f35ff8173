//! Signing and verification primitives.
//!
//! This module provides the signer/verifier seam used by envelopes and the
//! verification engine:
//!
//! - **Ed25519 signatures**: the concrete scheme shipped in-process
//! - **Key identifiers**: verifiers resolve from policy [`Key`](crate::metadata::Key)
//!   entries by canonical fingerprint
//! - **Trait objects**: callers supply any [`Signer`]/[`Verifier`]
//!   implementation (hardware tokens, agent daemons) behind the same seam
//!
//! # Example
//!
//! ```rust
//! use refseal_core::crypto::{Ed25519Signer, Ed25519Verifier, Signer, Verifier};
//!
//! let signer = Ed25519Signer::generate();
//! let signature = signer.sign(b"payload").unwrap();
//!
//! let verifier = Ed25519Verifier::from_key(&signer.public_key()).unwrap();
//! assert!(verifier.verify(b"payload", &signature).is_ok());
//! ```

mod sign;

pub use sign::{
    Ed25519Signer, Ed25519Verifier, Signer, SignerError, Verifier, PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};
