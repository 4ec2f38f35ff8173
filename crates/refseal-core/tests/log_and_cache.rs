//! Reference State Log and persistent cache working together over a
//! shared store, including the mirroring helper used after a fetch.

use refseal_core::cache::{PersistentCache, CACHE_REF};
use refseal_core::cancel::CancelToken;
use refseal_core::dev::DevMode;
use refseal_core::hash::Hash;
use refseal_core::policy::POLICY_REF;
use refseal_core::rsl::{ReferenceStateLog, RSL_REF};
use refseal_core::store::{mirror_trust_references, MemoryObjectStore, ObjectStore};

#[test]
fn chain_links_and_numbers_across_writers() {
    let store = MemoryObjectStore::new();
    let writer_a = ReferenceStateLog::new(&store);
    let writer_b = ReferenceStateLog::new(&store);

    // Interleave two writers; every entry must link to its predecessor.
    for i in 0..6u32 {
        let writer = if i % 2 == 0 { &writer_a } else { &writer_b };
        writer
            .record_reference_entry("refs/heads/main", Hash::of(&i.to_le_bytes()))
            .unwrap();
    }

    let mut entry = writer_a.latest_entry().unwrap();
    assert_eq!(entry.number, 6);
    while !entry.prev_id.is_zero() {
        let prev = writer_a.entry(&entry.prev_id).unwrap();
        assert_eq!(prev.number + 1, entry.number);
        entry = prev;
    }
    assert_eq!(entry.number, 1);
}

#[test]
fn skipped_entries_are_invisible_to_range_queries() {
    let store = MemoryObjectStore::new();
    let log = ReferenceStateLog::new(&store);

    let good = log
        .record_reference_entry(POLICY_REF, Hash::of(b"good"))
        .unwrap();
    let bad = log
        .record_reference_entry(POLICY_REF, Hash::of(b"bad"))
        .unwrap();
    let fixed = log
        .record_reference_entry(POLICY_REF, Hash::of(b"fixed"))
        .unwrap();
    log.record_annotation_entry(vec![bad.id], true, "signed with a revoked key")
        .unwrap();

    let entries = log
        .reference_entries_in_range_for_ref(&good.id, &fixed.id, POLICY_REF)
        .unwrap();
    let ids: Vec<Hash> = entries.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![good.id, fixed.id]);
}

#[test]
fn cache_tracks_log_and_stays_idempotent() {
    let store = MemoryObjectStore::new();
    let log = ReferenceStateLog::new(&store);
    let cancel = CancelToken::new();

    for i in 0..3u32 {
        log.record_reference_entry(POLICY_REF, Hash::of(&i.to_le_bytes()))
            .unwrap();
        log.record_reference_entry("refs/heads/main", Hash::of(&[i as u8, 0xff]))
            .unwrap();
    }

    let cache = PersistentCache::populate(&store, DevMode::enabled(), &cancel).unwrap();
    assert_eq!(cache.policy_entries.len(), 3);

    // The cache matches the log-derived list, in order.
    let first = log.first_entry().unwrap();
    let latest = log.latest_entry().unwrap();
    let expected: Vec<(u64, Hash)> = log
        .reference_entries_in_range_for_ref(&first.id, &latest.id, POLICY_REF)
        .unwrap()
        .iter()
        .map(|e| (e.number, e.id))
        .collect();
    let actual: Vec<(u64, Hash)> = cache
        .policy_entries
        .iter()
        .map(|i| (i.number, i.id))
        .collect();
    assert_eq!(actual, expected);

    // Idempotence: an unchanged log leaves the cache reference untouched.
    let before = store.get_reference(CACHE_REF).unwrap();
    PersistentCache::populate(&store, DevMode::enabled(), &cancel).unwrap();
    assert_eq!(store.get_reference(CACHE_REF).unwrap(), before);

    // A new policy entry advances it.
    log.record_reference_entry(POLICY_REF, Hash::of(b"v4"))
        .unwrap();
    PersistentCache::populate(&store, DevMode::enabled(), &cancel).unwrap();
    assert_ne!(store.get_reference(CACHE_REF).unwrap(), before);
}

#[test]
fn mirroring_pulls_log_and_policy_references() {
    let upstream = MemoryObjectStore::new();
    let upstream_log = ReferenceStateLog::new(&upstream);
    upstream_log
        .record_reference_entry(POLICY_REF, Hash::of(b"policy-v1"))
        .unwrap();
    let policy_blob = upstream.write_blob(b"policy record").unwrap();
    upstream.set_reference(POLICY_REF, policy_blob).unwrap();

    let local = MemoryObjectStore::new();
    local.add_remote("origin", upstream.clone());

    mirror_trust_references(&local, "origin").unwrap();

    assert_eq!(
        local.get_reference(RSL_REF).unwrap(),
        upstream.get_reference(RSL_REF).unwrap()
    );
    assert_eq!(local.get_reference(POLICY_REF).unwrap(), Some(policy_blob));

    // The mirrored log is readable locally.
    let local_log = ReferenceStateLog::new(&local);
    assert_eq!(local_log.latest_entry().unwrap().number, 1);
}
