//! # refseal-core
//!
//! Core library for refseal - a verifiable trust layer for content-addressed
//! repositories.
//!
//! refseal augments a repository with signed Root/Targets policy metadata, an
//! append-only Reference State Log (RSL) that records the authoritative
//! history of every tracked reference, and a verification engine that
//! authorizes reference updates against the policy in force.
//!
//! ## Subsystems
//!
//! - **Policy metadata**: Root and Targets documents, delegations, global
//!   rules, thresholds ([`metadata`])
//! - **Policy state**: threshold-verified loading of the signed metadata
//!   chain ([`policy`])
//! - **Reference State Log**: hash-chained, totally-ordered log of reference
//!   updates ([`rsl`])
//! - **Persistent cache**: index of RSL entry numbers kept consistent with
//!   the log ([`cache`])
//! - **Envelopes**: DSSE-style detached signatures over canonical JSON
//!   payloads ([`envelope`])
//!
//! ## Example
//!
//! ```rust
//! use refseal_core::crypto::Ed25519Signer;
//! use refseal_core::metadata::RootMetadata;
//!
//! let signer = Ed25519Signer::generate();
//! let root = RootMetadata::initialize(signer.public_key());
//! assert_eq!(root.version, 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod cancel;
pub mod crypto;
pub mod dev;
pub mod envelope;
pub mod hash;
pub mod metadata;
pub mod policy;
pub mod rsl;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cancel::CancelToken;
    pub use crate::crypto::{Ed25519Signer, Signer, Verifier};
    pub use crate::dev::DevMode;
    pub use crate::envelope::Envelope;
    pub use crate::hash::Hash;
    pub use crate::metadata::{Key, Principal, RootMetadata, TargetsMetadata};
    pub use crate::policy::State;
    pub use crate::rsl::ReferenceStateLog;
    pub use crate::store::{MemoryObjectStore, ObjectStore};
}

pub use cancel::CancelToken;
pub use dev::DevMode;
pub use hash::Hash;
pub use store::ObjectStore;
