//! Object store abstraction.
//!
//! The underlying version-control system is addressed through the
//! [`ObjectStore`] trait: content-addressed blobs, named references, and an
//! atomic compare-and-swap reference update. The store is the single source
//! of truth; every mutation of a shared reference (the log head, the cache,
//! the policy reference) funnels through [`ObjectStore::compare_and_swap_reference`].
//!
//! [`MemoryObjectStore`] is the in-process implementation used by tests and
//! embedded callers. Production deployments adapt their VCS behind the same
//! trait.

mod memory;

use std::path::PathBuf;

use thiserror::Error;

pub use memory::MemoryObjectStore;

use crate::hash::Hash;

/// Errors that can occur during object store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Blob not found for the given identifier.
    #[error("blob not found: {id}")]
    BlobNotFound {
        /// The identifier that was not found.
        id: Hash,
    },

    /// Stored content does not match its identifier.
    #[error("blob corrupted: expected {expected}, got {actual}")]
    BlobCorrupted {
        /// The identifier the content was stored under.
        expected: Hash,
        /// The digest of the bytes actually stored.
        actual: Hash,
    },

    /// Reference not found.
    #[error("reference not found: {name}")]
    ReferenceNotFound {
        /// The reference name that was not found.
        name: String,
    },

    /// A compare-and-swap reference update lost the race.
    #[error("reference '{name}' changed concurrently: expected {expected:?}, found {actual:?}")]
    ReferenceConflict {
        /// The reference being updated.
        name: String,
        /// The target the caller expected, `None` for an unborn reference.
        expected: Option<Hash>,
        /// The target actually found, `None` for an unborn reference.
        actual: Option<Hash>,
    },

    /// Remote not configured.
    #[error("remote not found: {name}")]
    RemoteNotFound {
        /// The remote name.
        name: String,
    },

    /// The remote does not advertise the requested reference.
    #[error("remote '{remote}' does not advertise reference '{name}'")]
    RemoteReferenceNotFound {
        /// The remote name.
        remote: String,
        /// The reference name.
        name: String,
    },

    /// The store has no associated repository directory.
    #[error("store has no repository directory")]
    NoGitDir,

    /// I/O error from the backing store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Content-addressed blob and reference storage.
///
/// Implementations must ensure:
/// 1. Blob writes are idempotent and addressed by the SHA-256 of the bytes.
/// 2. Blob reads verify content against the identifier.
/// 3. [`ObjectStore::compare_and_swap_reference`] is atomic with respect to
///    all other reference updates on the same store.
pub trait ObjectStore: Send + Sync {
    /// Reads the blob stored under `id`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::BlobNotFound`] if no blob exists under `id`
    /// - [`StoreError::BlobCorrupted`] if the stored bytes no longer match
    fn read_blob(&self, id: &Hash) -> Result<Vec<u8>, StoreError>;

    /// Writes `content` and returns its identifier. Writing identical
    /// content twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store rejects the write.
    fn write_blob(&self, content: &[u8]) -> Result<Hash, StoreError>;

    /// Returns the target of reference `name`, or `None` if the reference
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn get_reference(&self, name: &str) -> Result<Option<Hash>, StoreError>;

    /// Sets reference `name` to `target` unconditionally.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store rejects the update.
    fn set_reference(&self, name: &str, target: Hash) -> Result<(), StoreError>;

    /// Atomically updates reference `name` from `expected` to `target`.
    ///
    /// `expected = None` asserts the reference does not exist yet.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ReferenceConflict`] if the current target differs
    ///   from `expected`
    fn compare_and_swap_reference(
        &self,
        name: &str,
        expected: Option<Hash>,
        target: Hash,
    ) -> Result<(), StoreError>;

    /// Deletes reference `name`. Deleting an absent reference is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store rejects the update.
    fn delete_reference(&self, name: &str) -> Result<(), StoreError>;

    /// Fetches `ref_name` from `remote`, making its objects available
    /// locally, and returns the remote target.
    ///
    /// # Errors
    ///
    /// - [`StoreError::RemoteNotFound`] if the remote is not configured
    /// - [`StoreError::RemoteReferenceNotFound`] if the remote does not
    ///   advertise `ref_name`
    fn fetch(&self, remote: &str, ref_name: &str) -> Result<Hash, StoreError>;

    /// Returns `true` if `ancestor` is reachable from `descendant` in the
    /// commit graph (or equal to it). The zero hash is an ancestor of
    /// everything.
    ///
    /// # Errors
    ///
    /// Returns an error if graph objects cannot be read.
    fn is_ancestor(&self, ancestor: &Hash, descendant: &Hash) -> Result<bool, StoreError>;

    /// Returns the repository metadata directory (the directory installed
    /// hooks live under).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoGitDir`] for stores without one.
    fn git_dir(&self) -> Result<PathBuf, StoreError>;
}

/// Mirrors the trust references from `remote` after a user-initiated
/// transfer: the reference state log and the policy reference are fetched
/// and their local names updated to the remote targets.
///
/// # Errors
///
/// Propagates fetch and reference-update failures. A remote that does not
/// yet carry a trust reference is skipped.
pub fn mirror_trust_references(store: &dyn ObjectStore, remote: &str) -> Result<(), StoreError> {
    for name in [crate::rsl::RSL_REF, crate::policy::POLICY_REF] {
        match store.fetch(remote, name) {
            Ok(target) => store.set_reference(name, target)?,
            Err(StoreError::RemoteReferenceNotFound { .. }) => {
                tracing::debug!(remote, name, "remote does not carry trust reference, skipping");
            },
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
