//! Root metadata: the trust anchor document.
//!
//! The Root document declares the keys and thresholds for the reserved
//! roles (`root`, `targets`, `github-app`), policy-wide global rules, and
//! the hooks to run at lifecycle stages. Its signing keys bootstrap all
//! other verification; rotating them is subject to the monotonic rule that
//! a new Root version must verify against the previous version's key set.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use super::keys::Key;
use super::{
    default_expires, MetadataError, Role, GITHUB_APP_ROLE_NAME, ROOT_ROLE_NAME, TARGETS_ROLE_NAME,
};
use crate::hash::Hash;

/// Canonical string for the threshold global rule kind.
pub const GLOBAL_RULE_THRESHOLD_TYPE: &str = "threshold";

/// Canonical string for the block-force-pushes global rule kind.
pub const GLOBAL_RULE_BLOCK_FORCE_PUSHES_TYPE: &str = "block-force-pushes";

/// Lifecycle stage a hook runs at.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum HookStage {
    /// Before a commit is created.
    PreCommit,
    /// Before references are pushed to a remote.
    PrePush,
}

impl HookStage {
    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreCommit => "pre-commit",
            Self::PrePush => "pre-push",
        }
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A policy-defined script bound to a lifecycle stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    /// Stable identifier, unique within its stage.
    pub id: String,

    /// Lifecycle stage the hook runs at.
    pub stage: HookStage,

    /// Identifier of the script blob in the object store.
    #[serde(rename = "blobID")]
    pub blob_id: Hash,

    /// Principals the hook applies to.
    #[serde(rename = "principalIDs")]
    pub principal_ids: BTreeSet<String>,
}

impl Hook {
    /// Returns `true` if the hook applies to `principal_id`.
    #[must_use]
    pub fn applies_to(&self, principal_id: &str) -> bool {
        self.principal_ids.contains(principal_id)
    }
}

/// A policy-wide constraint that crosses delegation boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GlobalRule {
    /// Requires a minimum signature threshold on matched references,
    /// regardless of what the matched delegation demands.
    Threshold {
        /// Unique rule name.
        name: String,
        /// Glob patterns over reference names.
        patterns: Vec<String>,
        /// Minimum number of authorized signatures.
        threshold: u32,
    },

    /// Rejects non-fast-forward updates of matched references.
    BlockForcePushes {
        /// Unique rule name.
        name: String,
        /// Glob patterns over reference names.
        patterns: Vec<String>,
    },
}

impl GlobalRule {
    /// Returns the rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Threshold { name, .. } | Self::BlockForcePushes { name, .. } => name,
        }
    }

    /// Returns the rule's reference patterns.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        match self {
            Self::Threshold { patterns, .. } | Self::BlockForcePushes { patterns, .. } => patterns,
        }
    }

    /// Returns `true` if any pattern matches `ref_name`.
    ///
    /// Invalid glob patterns never match.
    #[must_use]
    pub fn matches(&self, ref_name: &str) -> bool {
        patterns_match(self.patterns(), ref_name)
    }
}

/// Compiles `patterns` and matches them against `name`.
pub(crate) fn patterns_match(patterns: &[String], name: &str) -> bool {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let Ok(glob) = Glob::new(pattern) else {
            tracing::warn!(pattern, "skipping invalid glob pattern");
            continue;
        };
        builder.add(glob);
    }
    builder
        .build()
        .map(|set| set.is_match(name))
        .unwrap_or(false)
}

/// Recognized global rule kinds, for callers that accept a kind string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalRuleKind {
    /// [`GlobalRule::Threshold`].
    Threshold,
    /// [`GlobalRule::BlockForcePushes`].
    BlockForcePushes,
}

impl FromStr for GlobalRuleKind {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            GLOBAL_RULE_THRESHOLD_TYPE => Ok(Self::Threshold),
            GLOBAL_RULE_BLOCK_FORCE_PUSHES_TYPE => Ok(Self::BlockForcePushes),
            other => Err(MetadataError::UnknownGlobalRuleType {
                kind: other.to_string(),
            }),
        }
    }
}

/// The trust anchor document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootMetadata {
    /// Document type tag, always `root`.
    #[serde(rename = "type")]
    pub metadata_type: String,

    /// Monotonically increasing document version.
    pub version: u32,

    /// Expiry timestamp; the document is not trusted past this instant.
    pub expires: DateTime<Utc>,

    /// All keys referenced by the roles, keyed by identifier.
    pub keys: BTreeMap<String, Key>,

    /// Reserved roles (`root`, `targets`, `github-app`).
    pub roles: BTreeMap<String, Role>,

    /// Whether pull request approval attestations signed by the
    /// `github-app` role count toward verification thresholds.
    #[serde(default, rename = "githubAppApprovalsTrusted")]
    pub github_app_approvals_trusted: bool,

    /// Policy-wide rules, evaluated in declaration order.
    #[serde(default, rename = "globalRules")]
    pub global_rules: Vec<GlobalRule>,

    /// Hooks to run, keyed by lifecycle stage.
    #[serde(default)]
    pub hooks: BTreeMap<HookStage, Vec<Hook>>,
}

impl RootMetadata {
    /// Initializes a new Root document trusting `root_key` for the Root
    /// role at threshold 1, version 1, expiring one year from now.
    #[must_use]
    pub fn initialize(root_key: Key) -> Self {
        let mut keys = BTreeMap::new();
        let mut roles = BTreeMap::new();
        roles.insert(
            ROOT_ROLE_NAME.to_string(),
            Role::new(vec![root_key.key_id.clone()], 1),
        );
        keys.insert(root_key.key_id.clone(), root_key);

        Self {
            metadata_type: "root".to_string(),
            version: 1,
            expires: default_expires(),
            keys,
            roles,
            github_app_approvals_trusted: false,
            global_rules: Vec::new(),
            hooks: BTreeMap::new(),
        }
    }

    /// Returns the named role.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::RoleNotFound`] if the role is absent.
    pub fn role(&self, name: &str) -> Result<&Role, MetadataError> {
        self.roles.get(name).ok_or_else(|| MetadataError::RoleNotFound {
            role: name.to_string(),
        })
    }

    /// Returns the keys trusted for the named role, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::RoleNotFound`] if the role is absent.
    pub fn role_keys(&self, name: &str) -> Result<Vec<&Key>, MetadataError> {
        let role = self.role(name)?;
        Ok(role
            .key_ids
            .iter()
            .filter_map(|id| self.keys.get(id))
            .collect())
    }

    /// Adds `key` as a trusted Root role key. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::KeyIdEmpty`] for a key without an
    /// identifier.
    pub fn add_root_key(&mut self, key: Key) -> Result<(), MetadataError> {
        self.add_key_to_role(ROOT_ROLE_NAME, key)
    }

    /// Removes `key_id` from the Root role's trusted keys.
    ///
    /// The key entry itself is retained; it may back other roles.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::CannotMeetThreshold`] if removal would
    /// leave the role unable to meet its threshold.
    pub fn delete_root_key(&mut self, key_id: &str) -> Result<(), MetadataError> {
        self.delete_key_from_role(ROOT_ROLE_NAME, key_id)
    }

    /// Adds `key` as a trusted key for the top-level Targets role,
    /// creating the role at threshold 1 on first use. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::KeyIdEmpty`] for a key without an
    /// identifier.
    pub fn add_targets_key(&mut self, key: Key) -> Result<(), MetadataError> {
        if key.key_id.is_empty() {
            return Err(MetadataError::KeyIdEmpty);
        }
        if !self.roles.contains_key(TARGETS_ROLE_NAME) {
            self.roles.insert(
                TARGETS_ROLE_NAME.to_string(),
                Role::new(Vec::new(), 1),
            );
        }
        self.add_key_to_role(TARGETS_ROLE_NAME, key)
    }

    /// Removes `key_id` from the top-level Targets role's trusted keys.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::KeyIdEmpty`] for an empty identifier and
    /// [`MetadataError::CannotMeetThreshold`] if removal would leave the
    /// role unable to meet its threshold.
    pub fn delete_targets_key(&mut self, key_id: &str) -> Result<(), MetadataError> {
        self.delete_key_from_role(TARGETS_ROLE_NAME, key_id)
    }

    /// Trusts `key` for verifying pull request approval attestations,
    /// replacing any previously trusted app key.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::KeyIdEmpty`] for a key without an
    /// identifier.
    pub fn add_github_app_key(&mut self, key: Key) -> Result<(), MetadataError> {
        if key.key_id.is_empty() {
            return Err(MetadataError::KeyIdEmpty);
        }
        let role = Role::new(vec![key.key_id.clone()], 1);
        self.keys.insert(key.key_id.clone(), key);
        self.roles.insert(GITHUB_APP_ROLE_NAME.to_string(), role);
        Ok(())
    }

    /// Removes the GitHub app role entirely.
    pub fn delete_github_app_key(&mut self) {
        self.roles.remove(GITHUB_APP_ROLE_NAME);
    }

    /// Marks pull request approval attestations as trusted.
    pub fn enable_github_app_approvals(&mut self) {
        self.github_app_approvals_trusted = true;
    }

    /// Marks pull request approval attestations as untrusted.
    pub fn disable_github_app_approvals(&mut self) {
        self.github_app_approvals_trusted = false;
    }

    /// Sets the Root role threshold.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::CannotMeetThreshold`] if the role has
    /// fewer keys than `threshold`.
    pub fn update_root_threshold(&mut self, threshold: u32) -> Result<(), MetadataError> {
        self.update_role_threshold(ROOT_ROLE_NAME, threshold)
    }

    /// Sets the top-level Targets role threshold.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::CannotMeetThreshold`] if the role has
    /// fewer keys than `threshold`.
    pub fn update_targets_threshold(&mut self, threshold: u32) -> Result<(), MetadataError> {
        self.update_role_threshold(TARGETS_ROLE_NAME, threshold)
    }

    /// Appends a threshold global rule.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::RuleNameEmpty`], [`MetadataError::NoPatterns`],
    /// [`MetadataError::InvalidThreshold`], or
    /// [`MetadataError::DuplicateRuleName`] on invalid input.
    pub fn add_global_rule_threshold(
        &mut self,
        name: impl Into<String>,
        patterns: Vec<String>,
        threshold: u32,
    ) -> Result<(), MetadataError> {
        let name = name.into();
        if threshold < 1 {
            return Err(MetadataError::InvalidThreshold { threshold });
        }
        self.push_global_rule(GlobalRule::Threshold {
            name,
            patterns,
            threshold,
        })
    }

    /// Appends a block-force-pushes global rule.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::RuleNameEmpty`], [`MetadataError::NoPatterns`],
    /// or [`MetadataError::DuplicateRuleName`] on invalid input.
    pub fn add_global_rule_block_force_pushes(
        &mut self,
        name: impl Into<String>,
        patterns: Vec<String>,
    ) -> Result<(), MetadataError> {
        self.push_global_rule(GlobalRule::BlockForcePushes {
            name: name.into(),
            patterns,
        })
    }

    /// Removes the named global rule.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::RuleNotFound`] if no rule has that name.
    pub fn remove_global_rule(&mut self, name: &str) -> Result<(), MetadataError> {
        let before = self.global_rules.len();
        self.global_rules.retain(|rule| rule.name() != name);
        if self.global_rules.len() == before {
            return Err(MetadataError::RuleNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Returns the hooks declared for `stage`, in declaration order.
    #[must_use]
    pub fn hooks(&self, stage: HookStage) -> &[Hook] {
        self.hooks.get(&stage).map_or(&[], Vec::as_slice)
    }

    /// Appends a hook for its stage.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::RuleNameEmpty`] for an empty id,
    /// [`MetadataError::HookBlobMissing`] for a zero script blob, and
    /// [`MetadataError::DuplicateHook`] when the id is taken.
    pub fn add_hook(&mut self, hook: Hook) -> Result<(), MetadataError> {
        if hook.id.is_empty() {
            return Err(MetadataError::RuleNameEmpty);
        }
        if hook.blob_id.is_zero() {
            return Err(MetadataError::HookBlobMissing { id: hook.id });
        }
        let stage_hooks = self.hooks.entry(hook.stage).or_default();
        if stage_hooks.iter().any(|h| h.id == hook.id) {
            return Err(MetadataError::DuplicateHook {
                id: hook.id,
                stage: hook.stage,
            });
        }
        stage_hooks.push(hook);
        Ok(())
    }

    /// Removes the hook with `id` from `stage`.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::HookNotFound`] if no such hook exists.
    pub fn remove_hook(&mut self, stage: HookStage, id: &str) -> Result<(), MetadataError> {
        let stage_hooks = self.hooks.entry(stage).or_default();
        let before = stage_hooks.len();
        stage_hooks.retain(|h| h.id != id);
        if stage_hooks.len() == before {
            return Err(MetadataError::HookNotFound {
                id: id.to_string(),
                stage,
            });
        }
        Ok(())
    }

    /// Returns `true` if the document's expiry is in the past.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires < now
    }

    fn add_key_to_role(&mut self, role_name: &str, key: Key) -> Result<(), MetadataError> {
        if key.key_id.is_empty() {
            return Err(MetadataError::KeyIdEmpty);
        }
        let Some(role) = self.roles.get_mut(role_name) else {
            return Err(MetadataError::RoleNotFound {
                role: role_name.to_string(),
            });
        };
        role.add_key_id(key.key_id.clone());
        self.keys.insert(key.key_id.clone(), key);
        Ok(())
    }

    fn delete_key_from_role(&mut self, role_name: &str, key_id: &str) -> Result<(), MetadataError> {
        if key_id.is_empty() {
            return Err(MetadataError::KeyIdEmpty);
        }
        let Some(role) = self.roles.get_mut(role_name) else {
            return Err(MetadataError::RoleNotFound {
                role: role_name.to_string(),
            });
        };
        if role.key_ids.len() <= role.threshold as usize {
            return Err(MetadataError::CannotMeetThreshold {
                role: role_name.to_string(),
                threshold: role.threshold,
                key_count: role.key_ids.len().saturating_sub(1),
            });
        }
        role.key_ids.retain(|k| k != key_id);
        Ok(())
    }

    fn update_role_threshold(
        &mut self,
        role_name: &str,
        threshold: u32,
    ) -> Result<(), MetadataError> {
        if threshold < 1 {
            return Err(MetadataError::InvalidThreshold { threshold });
        }
        let Some(role) = self.roles.get_mut(role_name) else {
            return Err(MetadataError::RoleNotFound {
                role: role_name.to_string(),
            });
        };
        if role.key_ids.len() < threshold as usize {
            return Err(MetadataError::CannotMeetThreshold {
                role: role_name.to_string(),
                threshold,
                key_count: role.key_ids.len(),
            });
        }
        role.threshold = threshold;
        Ok(())
    }

    fn push_global_rule(&mut self, rule: GlobalRule) -> Result<(), MetadataError> {
        if rule.name().is_empty() {
            return Err(MetadataError::RuleNameEmpty);
        }
        if rule.patterns().is_empty() {
            return Err(MetadataError::NoPatterns {
                name: rule.name().to_string(),
            });
        }
        if self.global_rules.iter().any(|r| r.name() == rule.name()) {
            return Err(MetadataError::DuplicateRuleName {
                name: rule.name().to_string(),
            });
        }
        self.global_rules.push(rule);
        Ok(())
    }
}
