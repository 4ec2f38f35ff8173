//! Policy state: loading, verifying, and consulting the signed metadata
//! chain.
//!
//! A policy version is a [`PolicyRecord`] blob (the Root envelope plus all
//! Targets envelopes) committed to the object store and announced on the
//! Reference State Log under the policy reference. The
//! [`State`] loader walks those announcements in order, verifying each Root
//! against the previous root of trust, and produces an immutable snapshot
//! of the metadata in force. The [`verification`] engine authorizes
//! reference updates against that snapshot.

mod state;
pub mod verification;

use thiserror::Error;

pub use state::{PolicyRecord, State, StateLoadOptions};
pub use verification::{verify_reference_update, ReferenceUpdate};

use crate::cancel::Cancelled;
use crate::envelope::EnvelopeError;
use crate::metadata::MetadataError;
use crate::rsl::LogError;
use crate::store::StoreError;

/// Reference the policy in force is announced under.
pub const POLICY_REF: &str = "refs/refseal/policy";

/// Reference policy proposals are staged under before they take effect.
pub const POLICY_STAGING_REF: &str = "refs/refseal/policy-staging";

/// Reference attestations are committed under.
pub const ATTESTATIONS_REF: &str = "refs/refseal/attestations";

/// A signature, threshold, expiry, chain, or delegation-path failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum VerificationError {
    /// A signature by a trusted key failed to verify.
    #[error("bad signature by key '{key_id}'")]
    BadSignature {
        /// The key whose signature failed.
        key_id: String,
    },

    /// Fewer valid signatures than the role's threshold.
    #[error("threshold not met for role '{role}': required {required}, got {actual}")]
    ThresholdUnmet {
        /// The role being verified.
        role: String,
        /// The threshold required.
        required: u32,
        /// The number of valid signatures found.
        actual: usize,
    },

    /// A metadata document is past its expiry.
    #[error("metadata for role '{role}' expired at {expires}")]
    Expired {
        /// The expired role.
        role: String,
        /// The expiry timestamp.
        expires: chrono::DateTime<chrono::Utc>,
    },

    /// A referenced key is not present in the trusted key set.
    #[error("unknown key '{key_id}'")]
    UnknownKey {
        /// The missing key identifier.
        key_id: String,
    },

    /// A non-fast-forward update was rejected by a global rule.
    #[error("global rule '{rule}' blocks force-pushing '{ref_name}'")]
    ForcePushBlocked {
        /// The rule that matched.
        rule: String,
        /// The reference being updated.
        ref_name: String,
    },

    /// The signed payload does not describe the requested update.
    #[error("signed payload does not match the proposed reference update")]
    PayloadMismatch,
}

/// Errors that can occur loading or consulting policy state.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PolicyError {
    /// No policy has been committed under the policy reference.
    #[error("no policy found")]
    NoPolicy,

    /// Verification failure, propagated unchanged so callers can render
    /// the subkind.
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// A policy record blob did not parse.
    #[error("malformed policy record: {reason}")]
    MalformedRecord {
        /// What was wrong.
        reason: String,
    },

    /// A key is claimed by more than one principal.
    #[error("key '{key_id}' is claimed by principals '{first}' and '{second}'")]
    DuplicateKeyOwnership {
        /// The contested key.
        key_id: String,
        /// The first claiming principal.
        first: String,
        /// The second claiming principal.
        second: String,
    },

    /// The GitHub app role was expected but is not declared.
    #[error("policy does not declare a github-app role")]
    NoGitHubAppRoleDeclared,

    /// Envelope failure.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Metadata failure.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// Log failure.
    #[error(transparent)]
    Log(#[from] LogError),

    /// Object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The operation was cancelled.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl PolicyError {
    /// Maps the error to the process exit code contract: `2` verification
    /// failure, `3` threshold not met, `1` anything else.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Verification(VerificationError::ThresholdUnmet { .. }) => 3,
            Self::Verification(_) => 2,
            _ => 1,
        }
    }
}
