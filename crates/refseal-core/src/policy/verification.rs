//! Reference update authorization.
//!
//! Given a proposed reference update and a verified policy [`State`], the
//! engine evaluates global rules in declared order, resolves the
//! authoritative role by walking the delegation tree, and counts
//! authorized signatures (and trusted pull request approvals) against the
//! effective threshold.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::state::{verify_envelope_threshold, State};
use super::{PolicyError, VerificationError};
use crate::crypto::{Ed25519Verifier, Verifier};
use crate::envelope::Envelope;
use crate::hash::Hash;
use crate::metadata::{GlobalRule, Key, TargetsMetadata, GITHUB_APP_ROLE_NAME};
use crate::store::ObjectStore;

/// A proposed reference update, also the canonical payload signed by its
/// approvers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceUpdate {
    /// The reference being updated.
    pub ref_name: String,

    /// The current target; zero when the reference is being created.
    #[serde(rename = "fromID")]
    pub from_id: Hash,

    /// The proposed target.
    #[serde(rename = "toID")]
    pub to_id: Hash,
}

/// A pull request approval attestation payload, signed by the GitHub app
/// role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestApproval {
    /// The reference the approved change targets.
    pub ref_name: String,

    /// The approved base target.
    #[serde(rename = "fromID")]
    pub from_id: Hash,

    /// The approved result target.
    #[serde(rename = "toID")]
    pub to_id: Hash,

    /// Principal identifiers of the approvers.
    pub approvers: BTreeSet<String>,
}

/// The role that resolution fixed for a reference.
#[derive(Debug, Clone)]
pub struct ResolvedRole {
    /// Authorized keys, accumulated from non-terminating matches plus the
    /// terminating node.
    pub keys: BTreeMap<String, Key>,

    /// Threshold demanded by the terminating node.
    pub threshold: u32,

    /// Whether resolution terminated at the catch-all allow rule.
    pub terminated_by_allow_rule: bool,
}

/// Authorizes a proposed reference update against the policy state.
///
/// `envelope` carries the update payload signed by its approvers;
/// `approval` optionally carries a pull request approval attestation
/// signed by the GitHub app role.
///
/// # Errors
///
/// Returns [`VerificationError`] subkinds for rule violations, payload
/// mismatches, and unmet thresholds, unchanged for callers to render.
pub fn verify_reference_update(
    state: &State,
    store: &dyn ObjectStore,
    update: &ReferenceUpdate,
    envelope: &Envelope,
    approval: Option<&Envelope>,
) -> Result<(), PolicyError> {
    // The signed payload must describe exactly the proposed update.
    let signed_update: ReferenceUpdate = envelope.open()?;
    if signed_update != *update {
        return Err(VerificationError::PayloadMismatch.into());
    }

    // Global rules evaluate in declared order.
    let mut global_thresholds: Vec<u32> = Vec::new();
    for rule in &state.root().global_rules {
        if !rule.matches(&update.ref_name) {
            continue;
        }
        match rule {
            GlobalRule::BlockForcePushes { name, .. } => {
                if !store.is_ancestor(&update.from_id, &update.to_id)? {
                    return Err(VerificationError::ForcePushBlocked {
                        rule: name.clone(),
                        ref_name: update.ref_name.clone(),
                    }
                    .into());
                }
            },
            GlobalRule::Threshold { threshold, .. } => {
                global_thresholds.push(*threshold);
            },
        }
    }

    let resolved = resolve_role_for_ref(state, &update.ref_name);

    // An unprotected reference (allow rule, nothing accumulated, no
    // threshold rules) needs no signatures at all.
    if resolved.terminated_by_allow_rule
        && resolved.keys.is_empty()
        && global_thresholds.is_empty()
    {
        tracing::debug!(ref_name = %update.ref_name, "reference is not protected by policy");
        return Ok(());
    }

    // Applicable thresholds are unioned by taking the max.
    let effective_threshold = global_thresholds
        .iter()
        .copied()
        .chain(std::iter::once(resolved.threshold))
        .max()
        .unwrap_or(1);

    let mut verifiers: BTreeMap<String, Box<dyn Verifier>> = BTreeMap::new();
    for key in resolved.keys.values() {
        if let Ok(verifier) = Ed25519Verifier::from_key(key) {
            verifiers.insert(key.key_id.clone(), Box::new(verifier));
        }
    }
    let accepted = envelope.accepted_signers(&verifiers)?;

    // Count distinct voters: a principal that signed with two keys, or
    // signed and also approved through the app, still counts once.
    let mut voters: BTreeSet<String> = BTreeSet::new();
    for key_id in &accepted {
        let voter = state
            .find_principal_by_key_id(key_id)
            .map_or_else(|| key_id.clone(), |p| p.id().to_string());
        voters.insert(voter);
    }

    if state.root().github_app_approvals_trusted {
        if let Some(approval_envelope) = approval {
            count_app_approvals(state, update, approval_envelope, &resolved, &mut voters)?;
        }
    }

    if voters.len() < effective_threshold as usize {
        return Err(VerificationError::ThresholdUnmet {
            role: update.ref_name.clone(),
            required: effective_threshold,
            actual: voters.len(),
        }
        .into());
    }

    Ok(())
}

/// Walks the delegation tree and fixes the authoritative role for
/// `ref_name`.
///
/// Non-terminating matches contribute their keys additively; the first
/// terminating match fixes the threshold and stops the walk. A delegated
/// Targets document refines its parent's terminating delegation when it
/// holds a more specific terminating match of its own.
#[must_use]
pub fn resolve_role_for_ref(state: &State, ref_name: &str) -> ResolvedRole {
    let mut resolved = ResolvedRole {
        keys: BTreeMap::new(),
        threshold: 1,
        terminated_by_allow_rule: true,
    };

    let Some(top_level) = state.top_level_targets() else {
        return resolved;
    };

    let mut visited = BTreeSet::new();
    if let Some((threshold, allow)) =
        walk_delegations(state, top_level, ref_name, true, &mut resolved.keys, &mut visited)
    {
        resolved.threshold = threshold;
        resolved.terminated_by_allow_rule = allow;
    }

    resolved
}

/// Returns `Some((threshold, terminated_by_allow_rule))` when a
/// terminating node was found.
fn walk_delegations(
    state: &State,
    doc: &TargetsMetadata,
    ref_name: &str,
    top_level: bool,
    keys: &mut BTreeMap<String, Key>,
    visited: &mut BTreeSet<String>,
) -> Option<(u32, bool)> {
    for delegation in &doc.delegations.roles {
        if !delegation.matches(ref_name) {
            continue;
        }

        if delegation.is_allow_rule() {
            // The top-level allow rule terminates resolution; a delegated
            // document's allow rule just means it does not refine its
            // parent.
            if top_level {
                return Some((delegation.role.threshold, true));
            }
            return None;
        }

        for key_id in &delegation.role.key_ids {
            match doc.delegations.keys.get(key_id) {
                Some(key) => {
                    keys.insert(key_id.clone(), key.clone());
                },
                None => {
                    tracing::warn!(key_id, delegation = %delegation.name, "delegation references unregistered key");
                },
            }
        }

        let child_result = if visited.insert(delegation.name.clone()) {
            state
                .targets(&delegation.name)
                .and_then(|child| walk_delegations(state, child, ref_name, false, keys, visited))
        } else {
            None
        };

        if let Some(result) = child_result {
            return Some(result);
        }

        if delegation.terminating {
            return Some((delegation.role.threshold, false));
        }
    }

    None
}

/// Verifies the approval attestation and adds applicable approvers to the
/// voter set.
fn count_app_approvals(
    state: &State,
    update: &ReferenceUpdate,
    approval_envelope: &Envelope,
    resolved: &ResolvedRole,
    voters: &mut BTreeSet<String>,
) -> Result<(), PolicyError> {
    let app_keys = state.github_app_keys()?;
    let key_refs: Vec<&Key> = app_keys.iter().collect();
    verify_envelope_threshold(approval_envelope, &key_refs, 1, GITHUB_APP_ROLE_NAME)?;

    let approval: PullRequestApproval = approval_envelope.open()?;
    if approval.ref_name != update.ref_name
        || approval.from_id != update.from_id
        || approval.to_id != update.to_id
    {
        tracing::warn!(
            ref_name = %approval.ref_name,
            "ignoring pull request approval for a different update"
        );
        return Ok(());
    }

    for approver in &approval.approvers {
        let Some(principal) = state
            .all_principals()
            .find(|p| p.id() == approver.as_str())
        else {
            continue;
        };
        let authorized = principal
            .keys()
            .iter()
            .any(|k| resolved.keys.contains_key(&k.key_id));
        if authorized {
            voters.insert(principal.id().to_string());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap as Map;

    use super::*;
    use crate::crypto::{Ed25519Signer, Signer as _};
    use crate::metadata::{Principal, RootMetadata, TargetsMetadata, TARGETS_ROLE_NAME};
    use crate::policy::state::PolicyRecord;
    use crate::policy::{StateLoadOptions, POLICY_REF};
    use crate::store::MemoryObjectStore;

    struct Fixture {
        store: MemoryObjectStore,
        root_signer: Ed25519Signer,
        targets_signer: Ed25519Signer,
        root: RootMetadata,
        targets: TargetsMetadata,
    }

    impl Fixture {
        fn new() -> Self {
            let root_signer = Ed25519Signer::generate();
            let targets_signer = Ed25519Signer::generate();

            let mut root = RootMetadata::initialize(root_signer.public_key());
            root.add_targets_key(targets_signer.public_key()).unwrap();

            Self {
                store: MemoryObjectStore::new(),
                root_signer,
                targets_signer,
                root,
                targets: TargetsMetadata::initialize(),
            }
        }

        fn load_state(&self) -> State {
            let mut root_env = Envelope::seal(&self.root).unwrap();
            root_env.sign(&self.root_signer).unwrap();

            let mut targets_env = Envelope::seal(&self.targets).unwrap();
            targets_env.sign(&self.targets_signer).unwrap();

            let mut record = PolicyRecord::new(root_env);
            record.set_targets(TARGETS_ROLE_NAME, targets_env);
            record.commit(&self.store, POLICY_REF).unwrap();

            State::load_current(&self.store, &StateLoadOptions::default()).unwrap()
        }
    }

    fn update(store: &MemoryObjectStore) -> ReferenceUpdate {
        let base = store.write_commit(b"base", &[]).unwrap();
        let next = store.write_commit(b"next", &[base]).unwrap();
        ReferenceUpdate {
            ref_name: "refs/heads/main".to_string(),
            from_id: base,
            to_id: next,
        }
    }

    fn signed_update(update: &ReferenceUpdate, signers: &[&Ed25519Signer]) -> Envelope {
        let mut envelope = Envelope::seal(update).unwrap();
        for signer in signers {
            envelope.sign(*signer).unwrap();
        }
        envelope
    }

    #[test]
    fn test_unprotected_reference_allowed() {
        let fixture = Fixture::new();
        let state = fixture.load_state();

        let update = update(&fixture.store);
        let envelope = signed_update(&update, &[]);

        verify_reference_update(&state, &fixture.store, &update, &envelope, None).unwrap();
    }

    #[test]
    fn test_delegation_requires_authorized_signature() {
        let mut fixture = Fixture::new();
        let maintainer = Ed25519Signer::generate();
        fixture
            .targets
            .add_delegation(
                "protect-main",
                vec![maintainer.public_key()],
                vec!["refs/heads/main".to_string()],
                1,
                true,
            )
            .unwrap();
        let state = fixture.load_state();

        let update = update(&fixture.store);

        // Unsigned: rejected.
        let envelope = signed_update(&update, &[]);
        let result = verify_reference_update(&state, &fixture.store, &update, &envelope, None);
        assert!(matches!(
            result,
            Err(PolicyError::Verification(
                VerificationError::ThresholdUnmet { .. }
            ))
        ));

        // Signed by an unauthorized key: still rejected.
        let stranger = Ed25519Signer::generate();
        let envelope = signed_update(&update, &[&stranger]);
        let result = verify_reference_update(&state, &fixture.store, &update, &envelope, None);
        assert!(matches!(
            result,
            Err(PolicyError::Verification(
                VerificationError::ThresholdUnmet { .. }
            ))
        ));

        // Signed by the maintainer: accepted.
        let envelope = signed_update(&update, &[&maintainer]);
        verify_reference_update(&state, &fixture.store, &update, &envelope, None).unwrap();
    }

    #[test]
    fn test_first_terminating_match_wins() {
        let mut fixture = Fixture::new();
        let first = Ed25519Signer::generate();
        let second = Ed25519Signer::generate();

        fixture
            .targets
            .add_delegation(
                "first",
                vec![first.public_key()],
                vec!["refs/heads/*".to_string()],
                1,
                true,
            )
            .unwrap();
        fixture
            .targets
            .add_delegation(
                "second",
                vec![second.public_key()],
                vec!["refs/heads/main".to_string()],
                1,
                true,
            )
            .unwrap();
        let state = fixture.load_state();

        let resolved = resolve_role_for_ref(&state, "refs/heads/main");
        assert!(resolved.keys.contains_key(&first.key_id().to_string()));
        assert!(!resolved.keys.contains_key(&second.key_id().to_string()));
        assert!(!resolved.terminated_by_allow_rule);
    }

    #[test]
    fn test_non_terminating_match_accumulates_keys() {
        let mut fixture = Fixture::new();
        let reviewer = Ed25519Signer::generate();
        let maintainer = Ed25519Signer::generate();

        fixture
            .targets
            .add_delegation(
                "reviewers",
                vec![reviewer.public_key()],
                vec!["refs/heads/*".to_string()],
                1,
                false,
            )
            .unwrap();
        fixture
            .targets
            .add_delegation(
                "maintainers",
                vec![maintainer.public_key()],
                vec!["refs/heads/main".to_string()],
                2,
                true,
            )
            .unwrap();
        let state = fixture.load_state();

        let resolved = resolve_role_for_ref(&state, "refs/heads/main");
        assert_eq!(resolved.keys.len(), 2);
        assert_eq!(resolved.threshold, 2);

        // Either authorized pair satisfies the threshold of two.
        let update = update(&fixture.store);
        let envelope = signed_update(&update, &[&reviewer, &maintainer]);
        verify_reference_update(&state, &fixture.store, &update, &envelope, None).unwrap();

        let envelope = signed_update(&update, &[&maintainer]);
        let result = verify_reference_update(&state, &fixture.store, &update, &envelope, None);
        assert!(matches!(
            result,
            Err(PolicyError::Verification(
                VerificationError::ThresholdUnmet { .. }
            ))
        ));
    }

    #[test]
    fn test_global_threshold_rule_takes_max() {
        let mut fixture = Fixture::new();
        let maintainer = Ed25519Signer::generate();
        let reviewer = Ed25519Signer::generate();

        fixture
            .targets
            .add_delegation(
                "protect-main",
                vec![maintainer.public_key(), reviewer.public_key()],
                vec!["refs/heads/main".to_string()],
                1,
                true,
            )
            .unwrap();
        fixture
            .root
            .add_global_rule_threshold("two-person-rule", vec!["refs/heads/main".to_string()], 2)
            .unwrap();
        let state = fixture.load_state();

        let update = update(&fixture.store);

        // One signature meets the delegation but not the global rule.
        let envelope = signed_update(&update, &[&maintainer]);
        let result = verify_reference_update(&state, &fixture.store, &update, &envelope, None);
        assert!(matches!(
            result,
            Err(PolicyError::Verification(
                VerificationError::ThresholdUnmet { required: 2, .. }
            ))
        ));

        let envelope = signed_update(&update, &[&maintainer, &reviewer]);
        verify_reference_update(&state, &fixture.store, &update, &envelope, None).unwrap();
    }

    #[test]
    fn test_block_force_pushes() {
        let mut fixture = Fixture::new();
        fixture
            .root
            .add_global_rule_block_force_pushes(
                "no-rewrites",
                vec!["refs/heads/main".to_string()],
            )
            .unwrap();
        let state = fixture.load_state();

        let base = fixture.store.write_commit(b"base", &[]).unwrap();
        let next = fixture.store.write_commit(b"next", &[base]).unwrap();
        let rewritten = fixture.store.write_commit(b"rewritten", &[]).unwrap();

        // Fast-forward: allowed.
        let ff = ReferenceUpdate {
            ref_name: "refs/heads/main".to_string(),
            from_id: base,
            to_id: next,
        };
        let envelope = signed_update(&ff, &[]);
        verify_reference_update(&state, &fixture.store, &ff, &envelope, None).unwrap();

        // Non-fast-forward: blocked.
        let force = ReferenceUpdate {
            ref_name: "refs/heads/main".to_string(),
            from_id: next,
            to_id: rewritten,
        };
        let envelope = signed_update(&force, &[]);
        let result = verify_reference_update(&state, &fixture.store, &force, &envelope, None);
        assert!(matches!(
            result,
            Err(PolicyError::Verification(
                VerificationError::ForcePushBlocked { .. }
            ))
        ));

        // A different reference is unaffected.
        let other = ReferenceUpdate {
            ref_name: "refs/heads/scratch".to_string(),
            from_id: next,
            to_id: rewritten,
        };
        let envelope = signed_update(&other, &[]);
        verify_reference_update(&state, &fixture.store, &other, &envelope, None).unwrap();
    }

    #[test]
    fn test_payload_must_match_update() {
        let fixture = Fixture::new();
        let state = fixture.load_state();

        let update = update(&fixture.store);
        let mut other = update.clone();
        other.ref_name = "refs/heads/other".to_string();
        let envelope = signed_update(&other, &[]);

        let result = verify_reference_update(&state, &fixture.store, &update, &envelope, None);
        assert!(matches!(
            result,
            Err(PolicyError::Verification(VerificationError::PayloadMismatch))
        ));
    }

    #[test]
    fn test_app_approval_counts_toward_threshold() {
        let mut fixture = Fixture::new();
        let maintainer = Ed25519Signer::generate();
        let reviewer = Ed25519Signer::generate();
        let app = Ed25519Signer::generate();

        fixture
            .targets
            .add_delegation(
                "protect-main",
                vec![maintainer.public_key(), reviewer.public_key()],
                vec!["refs/heads/main".to_string()],
                2,
                true,
            )
            .unwrap();
        fixture
            .targets
            .add_principal(Principal::Person {
                id: "reviewer".to_string(),
                name: "Reviewer".to_string(),
                keys: vec![reviewer.public_key()],
                associated_identities: Map::new(),
            })
            .unwrap();
        fixture.root.add_github_app_key(app.public_key()).unwrap();
        fixture.root.enable_github_app_approvals();
        let state = fixture.load_state();

        let update = update(&fixture.store);
        let envelope = signed_update(&update, &[&maintainer]);

        // Without the approval, one of two signatures is missing.
        let result = verify_reference_update(&state, &fixture.store, &update, &envelope, None);
        assert!(matches!(
            result,
            Err(PolicyError::Verification(
                VerificationError::ThresholdUnmet { .. }
            ))
        ));

        // The app-attested approval by the reviewer fills the gap.
        let approval = PullRequestApproval {
            ref_name: update.ref_name.clone(),
            from_id: update.from_id,
            to_id: update.to_id,
            approvers: ["reviewer".to_string()].into(),
        };
        let mut approval_env = Envelope::seal(&approval).unwrap();
        approval_env.sign(&app).unwrap();

        verify_reference_update(&state, &fixture.store, &update, &envelope, Some(&approval_env))
            .unwrap();
    }

    #[test]
    fn test_app_approval_ignored_when_not_trusted() {
        let mut fixture = Fixture::new();
        let maintainer = Ed25519Signer::generate();
        let reviewer = Ed25519Signer::generate();
        let app = Ed25519Signer::generate();

        fixture
            .targets
            .add_delegation(
                "protect-main",
                vec![maintainer.public_key(), reviewer.public_key()],
                vec!["refs/heads/main".to_string()],
                2,
                true,
            )
            .unwrap();
        fixture
            .targets
            .add_principal(Principal::Person {
                id: "reviewer".to_string(),
                name: "Reviewer".to_string(),
                keys: vec![reviewer.public_key()],
                associated_identities: Map::new(),
            })
            .unwrap();
        fixture.root.add_github_app_key(app.public_key()).unwrap();
        // Approvals deliberately left untrusted.
        let state = fixture.load_state();

        let update = update(&fixture.store);
        let envelope = signed_update(&update, &[&maintainer]);
        let approval = PullRequestApproval {
            ref_name: update.ref_name.clone(),
            from_id: update.from_id,
            to_id: update.to_id,
            approvers: ["reviewer".to_string()].into(),
        };
        let mut approval_env = Envelope::seal(&approval).unwrap();
        approval_env.sign(&app).unwrap();

        let result = verify_reference_update(
            &state,
            &fixture.store,
            &update,
            &envelope,
            Some(&approval_env),
        );
        assert!(matches!(
            result,
            Err(PolicyError::Verification(
                VerificationError::ThresholdUnmet { .. }
            ))
        ));
    }
}
