//! End-to-end policy lifecycle: initialization, key rotation, threshold
//! changes, key revocation, and delegation management, exercised through
//! the object store and the Reference State Log the way a real repository
//! would drive them.

use refseal_core::crypto::{Ed25519Signer, Signer as _};
use refseal_core::envelope::Envelope;
use refseal_core::metadata::{
    MetadataError, RootMetadata, TargetsMetadata, ROOT_ROLE_NAME, TARGETS_ROLE_NAME,
};
use refseal_core::policy::{
    verify_reference_update, PolicyError, PolicyRecord, ReferenceUpdate, State, StateLoadOptions,
    VerificationError, POLICY_REF,
};
use refseal_core::store::MemoryObjectStore;

fn commit_policy(
    store: &MemoryObjectStore,
    root: &RootMetadata,
    root_signers: &[&Ed25519Signer],
    targets: Option<(&TargetsMetadata, &Ed25519Signer)>,
) {
    let mut root_env = Envelope::seal(root).unwrap();
    for signer in root_signers {
        root_env.sign(*signer).unwrap();
    }

    let mut record = PolicyRecord::new(root_env);
    if let Some((targets, signer)) = targets {
        let mut env = Envelope::seal(targets).unwrap();
        env.sign(signer).unwrap();
        record.set_targets(TARGETS_ROLE_NAME, env);
    }
    record.commit(store, POLICY_REF).unwrap();
}

fn load(store: &MemoryObjectStore) -> Result<State, PolicyError> {
    State::load_current(store, &StateLoadOptions::default())
}

#[test]
fn initialize_and_sign_root() {
    let store = MemoryObjectStore::new();
    let k1 = Ed25519Signer::generate();

    let root = RootMetadata::initialize(k1.public_key());
    commit_policy(&store, &root, &[&k1], None);

    let state = load(&store).unwrap();
    let role = state.root().role(ROOT_ROLE_NAME).unwrap();
    assert_eq!(role.key_ids, vec![k1.key_id().to_string()]);
    assert_eq!(role.threshold, 1);
}

#[test]
fn root_key_rotation_lifecycle() {
    let store = MemoryObjectStore::new();
    let k1 = Ed25519Signer::generate();
    let k2 = Ed25519Signer::generate();

    // Version 1: K1 alone.
    let mut root = RootMetadata::initialize(k1.public_key());
    commit_policy(&store, &root, &[&k1], None);

    // Version 2: add K2, envelope signed by K1 only.
    root.version = 2;
    root.add_root_key(k2.public_key()).unwrap();
    commit_policy(&store, &root, &[&k1], None);

    let state = load(&store).unwrap();
    assert_eq!(
        state.root().role(ROOT_ROLE_NAME).unwrap().key_ids,
        vec![k1.key_id().to_string(), k2.key_id().to_string()]
    );

    // Threshold raise to 2 succeeds; raising to 3 cannot be met.
    root.version = 3;
    root.update_root_threshold(2).unwrap();
    assert!(matches!(
        root.update_root_threshold(3),
        Err(MetadataError::CannotMeetThreshold { .. })
    ));
    root.update_root_threshold(1).unwrap();
    commit_policy(&store, &root, &[&k1, &k2], None);

    // Version 4: revoke K1 after K2 has countersigned; K2 alone verifies.
    root.version = 4;
    root.delete_root_key(k1.key_id()).unwrap();
    commit_policy(&store, &root, &[&k2], None);

    let state = load(&store).unwrap();
    assert_eq!(
        state.root().role(ROOT_ROLE_NAME).unwrap().key_ids,
        vec![k2.key_id().to_string()]
    );
    assert_eq!(state.trusted_root_keys().len(), 1);
}

#[test]
fn delegation_reorder_lifecycle() {
    let mut targets = TargetsMetadata::initialize();
    let ka = Ed25519Signer::generate();
    let kb = Ed25519Signer::generate();

    targets
        .add_delegation("A", vec![ka.public_key()], vec!["refs/heads/a/*".to_string()], 1, true)
        .unwrap();
    targets
        .add_delegation("B", vec![kb.public_key()], vec!["refs/heads/b/*".to_string()], 1, true)
        .unwrap();

    targets
        .reorder_delegations(&["B".to_string(), "A".to_string()])
        .unwrap();
    let names: Vec<&str> = targets
        .delegations
        .roles
        .iter()
        .map(|d| d.name.as_str())
        .collect();
    assert_eq!(names, vec!["B", "A", "allow-rule"]);

    // A strict subset is not a permutation.
    assert!(matches!(
        targets.reorder_delegations(&["A".to_string()]),
        Err(MetadataError::NotAPermutation)
    ));
}

#[test]
fn delegation_order_decides_authorization() {
    let store = MemoryObjectStore::new();
    let k_root = Ed25519Signer::generate();
    let k_targets = Ed25519Signer::generate();
    let narrow = Ed25519Signer::generate();
    let broad = Ed25519Signer::generate();

    let mut root = RootMetadata::initialize(k_root.public_key());
    root.add_targets_key(k_targets.public_key()).unwrap();

    let mut targets = TargetsMetadata::initialize();
    targets
        .add_delegation(
            "narrow",
            vec![narrow.public_key()],
            vec!["refs/heads/main".to_string()],
            1,
            true,
        )
        .unwrap();
    targets
        .add_delegation(
            "broad",
            vec![broad.public_key()],
            vec!["refs/heads/*".to_string()],
            1,
            true,
        )
        .unwrap();

    commit_policy(&store, &root, &[&k_root], Some((&targets, &k_targets)));
    let state = load(&store).unwrap();

    let base = store.write_commit(b"base", &[]).unwrap();
    let next = store.write_commit(b"next", &[base]).unwrap();
    let update = ReferenceUpdate {
        ref_name: "refs/heads/main".to_string(),
        from_id: base,
        to_id: next,
    };

    // With "narrow" first, only its key authorizes main.
    let mut envelope = Envelope::seal(&update).unwrap();
    envelope.sign(&broad).unwrap();
    assert!(matches!(
        verify_reference_update(&state, &store, &update, &envelope, None),
        Err(PolicyError::Verification(
            VerificationError::ThresholdUnmet { .. }
        ))
    ));

    let mut envelope = Envelope::seal(&update).unwrap();
    envelope.sign(&narrow).unwrap();
    verify_reference_update(&state, &store, &update, &envelope, None).unwrap();

    // After reordering, "broad" terminates first and its key wins.
    targets
        .reorder_delegations(&["broad".to_string(), "narrow".to_string()])
        .unwrap();
    targets.version = 2;
    root.version = 2;
    commit_policy(&store, &root, &[&k_root], Some((&targets, &k_targets)));
    let state = load(&store).unwrap();

    let mut envelope = Envelope::seal(&update).unwrap();
    envelope.sign(&broad).unwrap();
    verify_reference_update(&state, &store, &update, &envelope, None).unwrap();
}

#[test]
fn staged_policy_not_visible_until_committed_to_policy_ref() {
    let store = MemoryObjectStore::new();
    let k1 = Ed25519Signer::generate();

    let root = RootMetadata::initialize(k1.public_key());
    let mut env = Envelope::seal(&root).unwrap();
    env.sign(&k1).unwrap();
    let record = PolicyRecord::new(env);
    record
        .commit(&store, refseal_core::policy::POLICY_STAGING_REF)
        .unwrap();

    // Staging announcements do not constitute policy.
    assert!(matches!(load(&store), Err(PolicyError::NoPolicy)));

    let state = State::load_from_ref(
        &store,
        refseal_core::policy::POLICY_STAGING_REF,
        &StateLoadOptions::default(),
    )
    .unwrap();
    assert_eq!(state.root().version, 1);
}
