//! Signed policy metadata.
//!
//! Root and Targets documents, their roles, delegations, global rules, and
//! the pure operations that evolve them. Operations validate their inputs
//! and the role/threshold invariants; they never touch the object store.
//!
//! # Invariants
//!
//! - Every trusted role satisfies `threshold <= |key_ids|`.
//! - The last delegation of a Targets document is always the allow rule
//!   (`paths = ["*"]`, terminating, threshold 1, no keys).
//! - Global rule names are unique within a Root document.
//! - Deleting a key from a role never removes the key entry itself; the
//!   same key may back other roles.

mod keys;
mod root;
mod targets;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use keys::{Key, KeyType, KeyVal, Principal};
pub use root::{GlobalRule, GlobalRuleKind, Hook, HookStage, RootMetadata};
pub use targets::{Delegation, Delegations, TargetsMetadata, ALLOW_RULE_NAME};

/// Name of the Root role.
pub const ROOT_ROLE_NAME: &str = "root";

/// Name of the top-level Targets role.
pub const TARGETS_ROLE_NAME: &str = "targets";

/// Name of the GitHub app role used to verify pull request approval
/// attestations.
pub const GITHUB_APP_ROLE_NAME: &str = "github-app";

/// Errors produced by policy metadata operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MetadataError {
    /// A mutation would leave a role with fewer keys than its threshold.
    #[error("role '{role}' cannot meet threshold {threshold} with {key_count} key(s)")]
    CannotMeetThreshold {
        /// The role whose invariant would break.
        role: String,
        /// The threshold in force (or requested).
        threshold: u32,
        /// The number of keys that would remain.
        key_count: usize,
    },

    /// The named role does not exist in the document.
    #[error("role '{role}' not found")]
    RoleNotFound {
        /// The missing role name.
        role: String,
    },

    /// A key identifier was empty.
    #[error("key ID is empty")]
    KeyIdEmpty,

    /// A rule or delegation name was empty.
    #[error("rule name is empty")]
    RuleNameEmpty,

    /// A rule with this name already exists.
    #[error("a rule named '{name}' already exists")]
    DuplicateRuleName {
        /// The colliding name.
        name: String,
    },

    /// The named rule or delegation does not exist.
    #[error("rule '{name}' not found")]
    RuleNotFound {
        /// The missing name.
        name: String,
    },

    /// A reorder request did not name every existing delegation exactly
    /// once.
    #[error("rule names are not a permutation of the current delegations")]
    NotAPermutation,

    /// No path patterns were supplied for a delegation or global rule.
    #[error("no patterns specified for rule '{name}'")]
    NoPatterns {
        /// The rule missing patterns.
        name: String,
    },

    /// The caller supplied an unrecognized global rule kind.
    #[error("unknown global rule type '{kind}'")]
    UnknownGlobalRuleType {
        /// The unrecognized kind string.
        kind: String,
    },

    /// The caller supplied an unrecognized key kind.
    #[error("unknown key type '{kind}'")]
    UnknownKeyType {
        /// The unrecognized kind string.
        kind: String,
    },

    /// A threshold below one was requested.
    #[error("threshold must be at least 1, got {threshold}")]
    InvalidThreshold {
        /// The rejected threshold.
        threshold: u32,
    },

    /// A hook with this identifier already exists for the stage.
    #[error("hook '{id}' already defined for stage '{stage}'")]
    DuplicateHook {
        /// The colliding hook identifier.
        id: String,
        /// The stage it was defined for.
        stage: HookStage,
    },

    /// The named hook does not exist for the stage.
    #[error("hook '{id}' not found for stage '{stage}'")]
    HookNotFound {
        /// The missing hook identifier.
        id: String,
        /// The stage searched.
        stage: HookStage,
    },

    /// A hook script identifier was the zero hash.
    #[error("hook '{id}' has no script blob")]
    HookBlobMissing {
        /// The offending hook identifier.
        id: String,
    },

    /// A principal identifier was empty.
    #[error("principal ID is empty")]
    PrincipalIdEmpty,
}

/// A set of authorized key identifiers and the number of signatures
/// required from them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Authorized key identifiers, in declaration order, deduplicated.
    #[serde(rename = "keyids")]
    pub key_ids: Vec<String>,

    /// Number of distinct signatures required.
    pub threshold: u32,
}

impl Role {
    /// Creates a role over `key_ids` requiring `threshold` signatures.
    #[must_use]
    pub fn new(key_ids: Vec<String>, threshold: u32) -> Self {
        Self { key_ids, threshold }
    }

    /// Returns `true` if `key_id` is authorized for this role.
    #[must_use]
    pub fn has_key_id(&self, key_id: &str) -> bool {
        self.key_ids.iter().any(|k| k == key_id)
    }

    /// Appends `key_id` unless it is already present.
    pub fn add_key_id(&mut self, key_id: String) {
        if !self.has_key_id(&key_id) {
            self.key_ids.push(key_id);
        }
    }
}

/// Returns the default expiry for a freshly initialized document: one year
/// from now.
#[must_use]
pub fn default_expires() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now() + chrono::Duration::days(365)
}
