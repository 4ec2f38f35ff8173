//! Targets metadata: delegations and authorized principals.
//!
//! A Targets document names the principals allowed to act within a
//! namespace and the ordered delegation rules that map reference patterns
//! to authorized roles. Resolution stops at the first terminating match;
//! the distinguished allow rule is always last and matches everything.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::keys::{Key, Principal};
use super::root::patterns_match;
use super::{default_expires, MetadataError, Role};

/// Name of the distinguished catch-all delegation.
pub const ALLOW_RULE_NAME: &str = "allow-rule";

/// An ordered rule mapping reference patterns to an authorized role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    /// Unique delegation name.
    pub name: String,

    /// Glob patterns over reference names, in match order.
    pub paths: Vec<String>,

    /// Whether a match stops resolution here.
    pub terminating: bool,

    /// The role authorized for matched references.
    #[serde(flatten)]
    pub role: Role,
}

impl Delegation {
    /// Returns the distinguished catch-all rule: matches every reference,
    /// terminates resolution, and demands nothing.
    #[must_use]
    pub fn allow_rule() -> Self {
        Self {
            name: ALLOW_RULE_NAME.to_string(),
            paths: vec!["*".to_string()],
            terminating: true,
            role: Role::new(Vec::new(), 1),
        }
    }

    /// Returns `true` if this is the catch-all rule.
    #[must_use]
    pub fn is_allow_rule(&self) -> bool {
        self.name == ALLOW_RULE_NAME
    }

    /// Returns `true` if any path pattern matches `ref_name`.
    #[must_use]
    pub fn matches(&self, ref_name: &str) -> bool {
        patterns_match(&self.paths, ref_name)
    }
}

/// The delegation table of a Targets document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegations {
    /// Keys referenced by the delegation roles, keyed by identifier.
    #[serde(default)]
    pub keys: BTreeMap<String, Key>,

    /// Ordered delegation rules; the allow rule is always last.
    #[serde(default)]
    pub roles: Vec<Delegation>,
}

/// Metadata defining delegations and authorized principals for a
/// reference namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetsMetadata {
    /// Document type tag, always `targets`.
    #[serde(rename = "type")]
    pub metadata_type: String,

    /// Monotonically increasing document version.
    pub version: u32,

    /// Expiry timestamp; the document is not trusted past this instant.
    pub expires: DateTime<Utc>,

    /// Principals known to this document, keyed by identifier.
    #[serde(default)]
    pub principals: BTreeMap<String, Principal>,

    /// The delegation table.
    #[serde(default)]
    pub delegations: Delegations,
}

impl TargetsMetadata {
    /// Initializes a Targets document whose delegations contain only the
    /// allow rule.
    #[must_use]
    pub fn initialize() -> Self {
        Self {
            metadata_type: "targets".to_string(),
            version: 1,
            expires: default_expires(),
            principals: BTreeMap::new(),
            delegations: Delegations {
                keys: BTreeMap::new(),
                roles: vec![Delegation::allow_rule()],
            },
        }
    }

    /// Appends a delegation immediately before the allow rule and
    /// registers `authorized_keys` in the delegation key table.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::RuleNameEmpty`], [`MetadataError::NoPatterns`],
    /// [`MetadataError::InvalidThreshold`], or
    /// [`MetadataError::DuplicateRuleName`] on invalid input.
    pub fn add_delegation(
        &mut self,
        name: impl Into<String>,
        authorized_keys: Vec<Key>,
        paths: Vec<String>,
        threshold: u32,
        terminating: bool,
    ) -> Result<(), MetadataError> {
        let name = name.into();
        if name.is_empty() || name == ALLOW_RULE_NAME {
            return Err(MetadataError::RuleNameEmpty);
        }
        if paths.is_empty() {
            return Err(MetadataError::NoPatterns { name });
        }
        if threshold < 1 {
            return Err(MetadataError::InvalidThreshold { threshold });
        }
        if self.delegation(&name).is_some() {
            return Err(MetadataError::DuplicateRuleName { name });
        }

        let role = Role::new(
            authorized_keys.iter().map(|k| k.key_id.clone()).collect(),
            threshold,
        );
        self.register_keys(authorized_keys)?;

        let delegation = Delegation {
            name,
            paths,
            terminating,
            role,
        };

        // Insert ahead of the allow rule, which stays last.
        let position = self
            .delegations
            .roles
            .iter()
            .position(Delegation::is_allow_rule)
            .unwrap_or(self.delegations.roles.len());
        self.delegations.roles.insert(position, delegation);

        Ok(())
    }

    /// Replaces the named delegation in place.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::RuleNotFound`] if no delegation has that
    /// name, and the same input errors as
    /// [`TargetsMetadata::add_delegation`].
    pub fn update_delegation(
        &mut self,
        name: &str,
        authorized_keys: Vec<Key>,
        paths: Vec<String>,
        threshold: u32,
        terminating: bool,
    ) -> Result<(), MetadataError> {
        if paths.is_empty() {
            return Err(MetadataError::NoPatterns {
                name: name.to_string(),
            });
        }
        if threshold < 1 {
            return Err(MetadataError::InvalidThreshold { threshold });
        }

        let role = Role::new(
            authorized_keys.iter().map(|k| k.key_id.clone()).collect(),
            threshold,
        );

        let Some(delegation) = self
            .delegations
            .roles
            .iter_mut()
            .find(|d| d.name == name && !d.is_allow_rule())
        else {
            return Err(MetadataError::RuleNotFound {
                name: name.to_string(),
            });
        };

        delegation.paths = paths;
        delegation.terminating = terminating;
        delegation.role = role;

        self.register_keys(authorized_keys)
    }

    /// Removes the named delegation. Keys it registered are not garbage
    /// collected.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::RuleNotFound`] if no delegation has that
    /// name.
    pub fn remove_delegation(&mut self, name: &str) -> Result<(), MetadataError> {
        if name == ALLOW_RULE_NAME {
            return Err(MetadataError::RuleNotFound {
                name: name.to_string(),
            });
        }
        let before = self.delegations.roles.len();
        self.delegations.roles.retain(|d| d.name != name);
        if self.delegations.roles.len() == before {
            return Err(MetadataError::RuleNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Permutes the delegations to match `names`. The allow rule is forced
    /// last and must not appear in `names`.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::NotAPermutation`] unless `names` names
    /// every non-allow delegation exactly once.
    pub fn reorder_delegations(&mut self, names: &[String]) -> Result<(), MetadataError> {
        use std::collections::BTreeSet;

        let current: BTreeSet<&str> = self
            .delegations
            .roles
            .iter()
            .filter(|d| !d.is_allow_rule())
            .map(|d| d.name.as_str())
            .collect();
        let requested: BTreeSet<&str> = names.iter().map(String::as_str).collect();

        if names.len() != current.len() || requested != current {
            return Err(MetadataError::NotAPermutation);
        }

        let mut by_name: BTreeMap<String, Delegation> = self
            .delegations
            .roles
            .drain(..)
            .filter(|d| !d.is_allow_rule())
            .map(|d| (d.name.clone(), d))
            .collect();

        let mut reordered = Vec::with_capacity(names.len() + 1);
        for name in names {
            reordered.push(by_name.remove(name).expect("permutation checked above"));
        }
        reordered.push(Delegation::allow_rule());
        self.delegations.roles = reordered;

        Ok(())
    }

    /// Registers keys in the delegation key table without binding them to
    /// any rule.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::KeyIdEmpty`] for a key without an
    /// identifier.
    pub fn add_key_to_delegations(&mut self, keys: Vec<Key>) -> Result<(), MetadataError> {
        self.register_keys(keys)
    }

    /// Adds or replaces a principal.
    ///
    /// # Errors
    ///
    /// Propagates [`Principal::validate`] failures.
    pub fn add_principal(&mut self, principal: Principal) -> Result<(), MetadataError> {
        principal.validate()?;
        self.principals.insert(principal.id().to_string(), principal);
        Ok(())
    }

    /// Returns the named delegation, excluding the allow rule.
    #[must_use]
    pub fn delegation(&self, name: &str) -> Option<&Delegation> {
        self.delegations
            .roles
            .iter()
            .find(|d| d.name == name && !d.is_allow_rule())
    }

    /// Returns `true` if the document's expiry is in the past.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires < now
    }

    fn register_keys(&mut self, keys: Vec<Key>) -> Result<(), MetadataError> {
        for key in keys {
            if key.key_id.is_empty() {
                return Err(MetadataError::KeyIdEmpty);
            }
            self.delegations.keys.insert(key.key_id.clone(), key);
        }
        Ok(())
    }
}
