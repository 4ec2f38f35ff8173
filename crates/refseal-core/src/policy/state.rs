//! Policy state loader.
//!
//! Walks the signed policy chain announced on the Reference State Log and
//! produces a verified, immutable [`State`] snapshot. The initial Root is
//! trust-on-first-use; every subsequent Root version must verify against
//! the key set and threshold of the Root it supersedes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{PolicyError, VerificationError, POLICY_REF};
use crate::cancel::CancelToken;
use crate::crypto::{Ed25519Verifier, Verifier};
use crate::envelope::Envelope;
use crate::hash::Hash;
use crate::metadata::{
    Hook, HookStage, Key, Principal, RootMetadata, TargetsMetadata, GITHUB_APP_ROLE_NAME,
    ROOT_ROLE_NAME, TARGETS_ROLE_NAME,
};
use crate::rsl::{Entry, ReferenceStateLog};
use crate::store::ObjectStore;

/// One committed policy version: the Root envelope plus every Targets
/// envelope, keyed by role name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    /// The Root metadata envelope.
    pub root: Envelope,

    /// Targets metadata envelopes, keyed by role name. The top-level role
    /// is `targets`; every other entry is a delegated role.
    #[serde(default)]
    pub targets: BTreeMap<String, Envelope>,
}

impl PolicyRecord {
    /// Creates a record carrying only a Root envelope.
    #[must_use]
    pub fn new(root: Envelope) -> Self {
        Self {
            root,
            targets: BTreeMap::new(),
        }
    }

    /// Adds or replaces a Targets envelope.
    pub fn set_targets(&mut self, role_name: impl Into<String>, envelope: Envelope) {
        self.targets.insert(role_name.into(), envelope);
    }

    /// Reads a record blob from the store.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::MalformedRecord`] if the blob does not parse.
    pub fn read(store: &dyn ObjectStore, id: &Hash) -> Result<Self, PolicyError> {
        let bytes = store.read_blob(id)?;
        serde_json::from_slice(&bytes).map_err(|err| PolicyError::MalformedRecord {
            reason: err.to_string(),
        })
    }

    /// Writes the record blob and announces it on the log under
    /// `policy_ref`.
    ///
    /// # Errors
    ///
    /// Propagates store and log failures.
    pub fn commit(
        &self,
        store: &dyn ObjectStore,
        policy_ref: &str,
    ) -> Result<Entry, PolicyError> {
        let bytes = serde_jcs::to_vec(self).map_err(|err| PolicyError::MalformedRecord {
            reason: err.to_string(),
        })?;
        let blob_id = store.write_blob(&bytes)?;
        store.set_reference(policy_ref, blob_id)?;

        let log = ReferenceStateLog::new(store);
        Ok(log.record_reference_entry(policy_ref, blob_id)?)
    }
}

/// Options controlling policy state loading.
#[derive(Debug, Clone, Default)]
pub struct StateLoadOptions {
    /// Accept expired metadata. Used when inspecting staged policy that
    /// has not been re-signed yet.
    pub staging: bool,

    /// Cancellation token observed between store operations.
    pub cancel: CancelToken,
}

/// A verified snapshot of the policy in force.
///
/// Immutable once loaded; concurrent operations each load their own
/// snapshot.
#[derive(Debug, Clone)]
pub struct State {
    root: RootMetadata,
    targets: BTreeMap<String, TargetsMetadata>,
    trusted_root_keys: Vec<Key>,
}

impl State {
    /// Loads and verifies the current policy state announced under
    /// [`POLICY_REF`].
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::NoPolicy`] when nothing is committed and
    /// verification errors for a chain that does not verify.
    pub fn load_current(
        store: &dyn ObjectStore,
        options: &StateLoadOptions,
    ) -> Result<Self, PolicyError> {
        Self::load_from_ref(store, POLICY_REF, options)
    }

    /// Loads and verifies the policy state announced under `policy_ref`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::NoPolicy`] when nothing is committed and
    /// verification errors for a chain that does not verify.
    pub fn load_from_ref(
        store: &dyn ObjectStore,
        policy_ref: &str,
        options: &StateLoadOptions,
    ) -> Result<Self, PolicyError> {
        let log = ReferenceStateLog::new(store).with_cancel_token(options.cancel.clone());

        let latest = match log.latest_entry() {
            Ok(entry) => entry,
            Err(crate::rsl::LogError::EmptyLog) => return Err(PolicyError::NoPolicy),
            Err(err) => return Err(err.into()),
        };
        let first = log.first_entry()?;
        let policy_entries =
            log.reference_entries_in_range_for_ref(&first.id, &latest.id, policy_ref)?;
        if policy_entries.is_empty() {
            return Err(PolicyError::NoPolicy);
        }

        // Walk the root chain. The first version is trust-on-first-use,
        // validated by its self-signatures; every later version verifies
        // against the previous version's key set and threshold before
        // being adopted as the trust anchor.
        let mut trusted_root: Option<RootMetadata> = None;
        let mut current_record: Option<PolicyRecord> = None;

        for entry in &policy_entries {
            options.cancel.check()?;

            let target_id = entry
                .target_id()
                .expect("range query returns reference entries only");
            let record = PolicyRecord::read(store, &target_id)?;
            let candidate: RootMetadata = record.root.open()?;

            let anchor = trusted_root.as_ref().unwrap_or(&candidate);
            verify_envelope_for_role(&record.root, anchor, ROOT_ROLE_NAME)?;
            tracing::debug!(version = candidate.version, "adopted root version");

            trusted_root = Some(candidate);
            current_record = Some(record);
        }

        let root = trusted_root.expect("at least one policy entry verified");
        let record = current_record.expect("at least one policy entry verified");

        let now = chrono::Utc::now();
        if !options.staging && root.is_expired(now) {
            return Err(VerificationError::Expired {
                role: ROOT_ROLE_NAME.to_string(),
                expires: root.expires,
            }
            .into());
        }

        let targets = verify_targets(&root, &record, options.staging, now)?;
        check_key_ownership(&targets)?;

        if root.github_app_approvals_trusted && !root.roles.contains_key(GITHUB_APP_ROLE_NAME) {
            tracing::warn!("github-app approvals are trusted but no github-app role is declared");
        }

        let trusted_root_keys = root
            .role_keys(ROOT_ROLE_NAME)
            .map(|keys| keys.into_iter().cloned().collect())
            .unwrap_or_default();

        Ok(Self {
            root,
            targets,
            trusted_root_keys,
        })
    }

    /// Returns the verified Root metadata.
    #[must_use]
    pub const fn root(&self) -> &RootMetadata {
        &self.root
    }

    /// Returns the verified Targets metadata for `role_name`.
    #[must_use]
    pub fn targets(&self, role_name: &str) -> Option<&TargetsMetadata> {
        self.targets.get(role_name)
    }

    /// Returns the verified top-level Targets metadata.
    #[must_use]
    pub fn top_level_targets(&self) -> Option<&TargetsMetadata> {
        self.targets.get(TARGETS_ROLE_NAME)
    }

    /// Returns all verified Targets metadata, keyed by role name.
    #[must_use]
    pub const fn all_targets(&self) -> &BTreeMap<String, TargetsMetadata> {
        &self.targets
    }

    /// Returns the root public keys admitted to sign the next Root
    /// version.
    #[must_use]
    pub fn trusted_root_keys(&self) -> &[Key] {
        &self.trusted_root_keys
    }

    /// Iterates over every principal declared in any Targets document.
    pub fn all_principals(&self) -> impl Iterator<Item = &Principal> {
        self.targets.values().flat_map(|t| t.principals.values())
    }

    /// Resolves a key identifier to the principal that owns it.
    ///
    /// Resolution succeeds iff some principal owns a matching key.
    #[must_use]
    pub fn find_principal_by_key_id(&self, key_id: &str) -> Option<&Principal> {
        self.all_principals().find(|p| p.has_key_id(key_id))
    }

    /// Returns the keys trusted to sign pull request approval
    /// attestations.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::NoGitHubAppRoleDeclared`] when the role is
    /// absent.
    pub fn github_app_keys(&self) -> Result<Vec<Key>, PolicyError> {
        if !self.root.roles.contains_key(GITHUB_APP_ROLE_NAME) {
            return Err(PolicyError::NoGitHubAppRoleDeclared);
        }
        Ok(self
            .root
            .role_keys(GITHUB_APP_ROLE_NAME)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Returns the hooks declared for `stage`.
    #[must_use]
    pub fn hooks(&self, stage: HookStage) -> &[Hook] {
        self.root.hooks(stage)
    }
}

/// Verifies `envelope` against the role named `role_name` as declared in
/// `anchor`.
fn verify_envelope_for_role(
    envelope: &Envelope,
    anchor: &RootMetadata,
    role_name: &str,
) -> Result<(), PolicyError> {
    let role = anchor.role(role_name)?;
    let keys = anchor.role_keys(role_name)?;
    verify_envelope_threshold(envelope, &keys, role.threshold, role_name)
}

/// Verifies that `envelope` carries at least `threshold` valid signatures
/// from `keys`. Surplus signatures and signatures by keys outside the set
/// are ignored.
pub(crate) fn verify_envelope_threshold(
    envelope: &Envelope,
    keys: &[&Key],
    threshold: u32,
    role_name: &str,
) -> Result<(), PolicyError> {
    let mut verifiers: BTreeMap<String, Box<dyn Verifier>> = BTreeMap::new();
    for key in keys {
        match Ed25519Verifier::from_key(key) {
            Ok(verifier) => {
                verifiers.insert(key.key_id.clone(), Box::new(verifier));
            },
            Err(err) => {
                // Keys this process cannot verify still appear in policy;
                // they simply cannot contribute to the threshold here.
                tracing::debug!(key_id = %key.key_id, error = %err, "skipping unverifiable key");
            },
        }
    }

    let accepted = envelope.accepted_signers(&verifiers)?;
    if accepted.len() < threshold as usize {
        return Err(VerificationError::ThresholdUnmet {
            role: role_name.to_string(),
            required: threshold,
            actual: accepted.len(),
        }
        .into());
    }
    Ok(())
}

/// Verifies every Targets envelope in `record`: the top-level document
/// against the Root's `targets` role, delegated documents against the
/// delegation declared in their (already verified) parent.
fn verify_targets(
    root: &RootMetadata,
    record: &PolicyRecord,
    staging: bool,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<BTreeMap<String, TargetsMetadata>, PolicyError> {
    let mut verified: BTreeMap<String, TargetsMetadata> = BTreeMap::new();

    if let Some(envelope) = record.targets.get(TARGETS_ROLE_NAME) {
        verify_envelope_for_role(envelope, root, TARGETS_ROLE_NAME)?;
        let targets: TargetsMetadata = envelope.open()?;
        check_targets_expiry(&targets, TARGETS_ROLE_NAME, staging, now)?;
        verified.insert(TARGETS_ROLE_NAME.to_string(), targets);
    }

    // Delegated documents verify against their parent, so parents must be
    // processed first; iterate until no further progress.
    let mut pending: Vec<&String> = record
        .targets
        .keys()
        .filter(|name| name.as_str() != TARGETS_ROLE_NAME)
        .collect();

    while !pending.is_empty() {
        let mut progressed = false;
        let mut still_pending = Vec::new();

        for name in pending {
            let Some((parent_keys, threshold)) = find_delegating_role(&verified, name) else {
                still_pending.push(name);
                continue;
            };

            let envelope = &record.targets[name];
            let key_refs: Vec<&Key> = parent_keys.iter().collect();
            verify_envelope_threshold(envelope, &key_refs, threshold, name)?;

            let targets: TargetsMetadata = envelope.open()?;
            check_targets_expiry(&targets, name, staging, now)?;
            verified.insert(name.clone(), targets);
            progressed = true;
        }

        if !progressed && !still_pending.is_empty() {
            let name = still_pending[0];
            return Err(PolicyError::MalformedRecord {
                reason: format!("no delegating role found for targets document '{name}'"),
            });
        }
        pending = still_pending;
    }

    Ok(verified)
}

/// Finds the delegation named `name` in any verified document and returns
/// the keys and threshold it demands.
fn find_delegating_role(
    verified: &BTreeMap<String, TargetsMetadata>,
    name: &str,
) -> Option<(Vec<Key>, u32)> {
    for doc in verified.values() {
        if let Some(delegation) = doc.delegation(name) {
            let keys = delegation
                .role
                .key_ids
                .iter()
                .filter_map(|id| doc.delegations.keys.get(id))
                .cloned()
                .collect();
            return Some((keys, delegation.role.threshold));
        }
    }
    None
}

fn check_targets_expiry(
    targets: &TargetsMetadata,
    role_name: &str,
    staging: bool,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(), PolicyError> {
    if !staging && targets.is_expired(now) {
        return Err(VerificationError::Expired {
            role: role_name.to_string(),
            expires: targets.expires,
        }
        .into());
    }
    Ok(())
}

/// Checks that no key is claimed by more than one principal across the
/// verified Targets documents.
fn check_key_ownership(
    targets: &BTreeMap<String, TargetsMetadata>,
) -> Result<(), PolicyError> {
    let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
    for doc in targets.values() {
        for principal in doc.principals.values() {
            for key in principal.keys() {
                if let Some(existing) = owners.get(key.key_id.as_str()) {
                    if *existing != principal.id() {
                        return Err(PolicyError::DuplicateKeyOwnership {
                            key_id: key.key_id.clone(),
                            first: (*existing).to_string(),
                            second: principal.id().to_string(),
                        });
                    }
                } else {
                    owners.insert(&key.key_id, principal.id());
                }
            }
        }
    }
    Ok(())
}
