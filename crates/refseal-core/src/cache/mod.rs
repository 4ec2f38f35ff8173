//! Persistent index of the Reference State Log.
//!
//! The cache mirrors a curated projection of the log: the position of
//! every policy entry, every attestation entry, and a per-reference
//! verification watermark. It is stored as a JSON blob under its own
//! reference and is purely an optimization; on corruption or a schema
//! change it is rebuilt from the log.
//!
//! Population is developer-gated and idempotent: repeated invocations on
//! an unchanged log leave the cache reference byte-identical.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::cancel::{CancelToken, Cancelled};
use crate::dev::{DevMode, NotInDevMode};
use crate::hash::Hash;
use crate::policy::{ATTESTATIONS_REF, POLICY_REF};
use crate::rsl::{LogError, ReferenceStateLog};
use crate::store::{ObjectStore, StoreError};

/// Reference the cache blob is committed under.
pub const CACHE_REF: &str = "refs/refseal/cache";

/// Schema version understood by this build. A stored cache with any other
/// version is discarded and rebuilt.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// Cache population requires developer mode.
    #[error(transparent)]
    NotInDevMode(#[from] NotInDevMode),

    /// Object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Log failure while reading entries to index.
    #[error(transparent)]
    Log(#[from] LogError),

    /// The cache blob could not be serialized.
    #[error("cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation was cancelled.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Position of a log entry: its sequence number and identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RslEntryIndex {
    /// Sequence number of the entry.
    pub number: u64,

    /// Identifier of the entry.
    pub id: Hash,
}

/// The on-disk cache document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentCache {
    /// Schema version of this document.
    pub schema_version: u32,

    /// Every policy-reference entry in the log, in order of occurrence.
    #[serde(default)]
    pub policy_entries: Vec<RslEntryIndex>,

    /// Every attestation-reference entry in the log, in order of
    /// occurrence.
    #[serde(default)]
    pub attestation_entries: Vec<RslEntryIndex>,

    /// Last verified entry per tracked reference.
    #[serde(default)]
    pub last_verified_entry_per_ref: BTreeMap<String, RslEntryIndex>,
}

impl Default for PersistentCache {
    fn default() -> Self {
        Self {
            schema_version: CACHE_SCHEMA_VERSION,
            policy_entries: Vec::new(),
            attestation_entries: Vec::new(),
            last_verified_entry_per_ref: BTreeMap::new(),
        }
    }
}

impl PersistentCache {
    /// Loads the cache from the store.
    ///
    /// A missing reference, an undecodable blob, or a schema-version
    /// mismatch all yield a fresh empty cache; the stored document is an
    /// optimization, never a source of truth.
    ///
    /// # Errors
    ///
    /// Propagates store read failures other than a missing blob.
    pub fn load(store: &dyn ObjectStore) -> Result<Self, CacheError> {
        let Some(blob_id) = store.get_reference(CACHE_REF)? else {
            return Ok(Self::default());
        };

        let bytes = match store.read_blob(&blob_id) {
            Ok(bytes) => bytes,
            Err(StoreError::BlobNotFound { .. }) => {
                tracing::warn!("cache reference points at a missing blob, rebuilding");
                return Ok(Self::default());
            },
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_slice::<Self>(&bytes) {
            Ok(cache) if cache.schema_version == CACHE_SCHEMA_VERSION => Ok(cache),
            Ok(cache) => {
                tracing::warn!(
                    found = cache.schema_version,
                    expected = CACHE_SCHEMA_VERSION,
                    "cache schema version mismatch, rebuilding"
                );
                Ok(Self::default())
            },
            Err(err) => {
                tracing::warn!(error = %err, "cache blob is corrupt, rebuilding");
                Ok(Self::default())
            },
        }
    }

    /// Rebuilds the log-derived sections of the cache and commits the
    /// result if it differs from what is stored.
    ///
    /// Only available in developer mode; the verification watermarks are
    /// preserved across population.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotInDevMode`] outside developer mode and
    /// propagates store/log failures.
    pub fn populate(
        store: &dyn ObjectStore,
        dev_mode: DevMode,
        cancel: &CancelToken,
    ) -> Result<Self, CacheError> {
        dev_mode.require()?;

        let mut cache = Self::load(store)?;
        let log = ReferenceStateLog::new(store).with_cancel_token(cancel.clone());

        match log.latest_entry() {
            Ok(latest) => {
                let first = log.first_entry()?;

                cache.policy_entries = log
                    .reference_entries_in_range_for_ref(&first.id, &latest.id, POLICY_REF)?
                    .iter()
                    .map(|e| RslEntryIndex {
                        number: e.number,
                        id: e.id,
                    })
                    .collect();

                cache.attestation_entries = log
                    .reference_entries_in_range_for_ref(&first.id, &latest.id, ATTESTATIONS_REF)?
                    .iter()
                    .map(|e| RslEntryIndex {
                        number: e.number,
                        id: e.id,
                    })
                    .collect();
            },
            Err(LogError::EmptyLog) => {
                cache.policy_entries.clear();
                cache.attestation_entries.clear();
            },
            Err(err) => return Err(err.into()),
        }

        cache.commit(store)?;
        Ok(cache)
    }

    /// Records the last verified entry for a reference.
    pub fn set_last_verified(&mut self, ref_name: impl Into<String>, index: RslEntryIndex) {
        self.last_verified_entry_per_ref
            .insert(ref_name.into(), index);
    }

    /// Returns the last verified entry for a reference.
    #[must_use]
    pub fn last_verified(&self, ref_name: &str) -> Option<RslEntryIndex> {
        self.last_verified_entry_per_ref.get(ref_name).copied()
    }

    /// Commits the cache unless its serialization is byte-identical to
    /// what the cache reference already points at.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn commit(&self, store: &dyn ObjectStore) -> Result<(), CacheError> {
        let bytes = serde_jcs::to_vec(self)?;

        let current = store.get_reference(CACHE_REF)?;
        if let Some(current_id) = current {
            if current_id == Hash::of(&bytes) {
                tracing::debug!("cache unchanged, skipping commit");
                return Ok(());
            }
        }

        let blob_id = store.write_blob(&bytes)?;
        match store.compare_and_swap_reference(CACHE_REF, current, blob_id) {
            Ok(()) => Ok(()),
            Err(StoreError::ReferenceConflict { .. }) => {
                // Another process refreshed the cache first; theirs is at
                // least as new as ours.
                tracing::debug!("cache updated concurrently, keeping the committed version");
                Ok(())
            },
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;

    fn record_policy_entries(store: &MemoryObjectStore, count: usize) -> Vec<RslEntryIndex> {
        let log = ReferenceStateLog::new(store);
        (0..count)
            .map(|i| {
                let entry = log
                    .record_reference_entry(POLICY_REF, Hash::of(format!("v{i}").as_bytes()))
                    .unwrap();
                RslEntryIndex {
                    number: entry.number,
                    id: entry.id,
                }
            })
            .collect()
    }

    #[test]
    fn test_load_missing_is_empty() {
        let store = MemoryObjectStore::new();
        let cache = PersistentCache::load(&store).unwrap();
        assert_eq!(cache, PersistentCache::default());
    }

    #[test]
    fn test_populate_requires_dev_mode() {
        let store = MemoryObjectStore::new();
        let result = PersistentCache::populate(&store, DevMode::disabled(), &CancelToken::new());
        assert!(matches!(result, Err(CacheError::NotInDevMode(_))));
    }

    #[test]
    fn test_populate_indexes_policy_entries() {
        let store = MemoryObjectStore::new();
        let expected = record_policy_entries(&store, 3);

        let cache =
            PersistentCache::populate(&store, DevMode::enabled(), &CancelToken::new()).unwrap();

        assert_eq!(cache.policy_entries, expected);
        assert!(cache.attestation_entries.is_empty());

        let reloaded = PersistentCache::load(&store).unwrap();
        assert_eq!(reloaded, cache);
    }

    #[test]
    fn test_populate_is_idempotent() {
        let store = MemoryObjectStore::new();
        record_policy_entries(&store, 3);

        PersistentCache::populate(&store, DevMode::enabled(), &CancelToken::new()).unwrap();
        let first_commit = store.get_reference(CACHE_REF).unwrap().unwrap();

        PersistentCache::populate(&store, DevMode::enabled(), &CancelToken::new()).unwrap();
        let second_commit = store.get_reference(CACHE_REF).unwrap().unwrap();

        // No changes were committed: the cache reference is byte-identical.
        assert_eq!(first_commit, second_commit);
    }

    #[test]
    fn test_populate_picks_up_new_entries() {
        let store = MemoryObjectStore::new();
        record_policy_entries(&store, 2);
        let cache =
            PersistentCache::populate(&store, DevMode::enabled(), &CancelToken::new()).unwrap();
        assert_eq!(cache.policy_entries.len(), 2);

        record_policy_entries(&store, 1);
        let cache =
            PersistentCache::populate(&store, DevMode::enabled(), &CancelToken::new()).unwrap();
        assert_eq!(cache.policy_entries.len(), 3);
    }

    #[test]
    fn test_schema_mismatch_rebuilds() {
        let store = MemoryObjectStore::new();
        let stale = PersistentCache {
            schema_version: CACHE_SCHEMA_VERSION + 1,
            ..PersistentCache::default()
        };
        let bytes = serde_json::to_vec(&stale).unwrap();
        let blob_id = store.write_blob(&bytes).unwrap();
        store.set_reference(CACHE_REF, blob_id).unwrap();

        let cache = PersistentCache::load(&store).unwrap();
        assert_eq!(cache.schema_version, CACHE_SCHEMA_VERSION);
        assert!(cache.policy_entries.is_empty());
    }

    #[test]
    fn test_corrupt_blob_rebuilds() {
        let store = MemoryObjectStore::new();
        let blob_id = store.write_blob(b"not json").unwrap();
        store.set_reference(CACHE_REF, blob_id).unwrap();

        let cache = PersistentCache::load(&store).unwrap();
        assert_eq!(cache, PersistentCache::default());
    }

    #[test]
    fn test_watermarks_survive_population() {
        let store = MemoryObjectStore::new();
        let entries = record_policy_entries(&store, 1);

        let mut cache = PersistentCache::default();
        cache.set_last_verified("refs/heads/main", entries[0]);
        cache.commit(&store).unwrap();

        let cache =
            PersistentCache::populate(&store, DevMode::enabled(), &CancelToken::new()).unwrap();
        assert_eq!(cache.last_verified("refs/heads/main"), Some(entries[0]));
    }
}
