//! In-memory object store.
//!
//! Mutex poisoning indicates a panic in another thread, which is
//! unrecoverable.

#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use super::{ObjectStore, StoreError};
use crate::hash::Hash;

/// In-memory [`ObjectStore`] for tests and embedded use.
///
/// Clones share storage, so a clone can stand in for a second process
/// racing on the same store. Remotes are other `MemoryObjectStore`
/// instances linked by name.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    blobs: RwLock<HashMap<Hash, Vec<u8>>>,
    refs: RwLock<HashMap<String, Hash>>,
    /// Commit graph edges: commit id to parent ids.
    parents: RwLock<HashMap<Hash, Vec<Hash>>>,
    remotes: RwLock<HashMap<String, MemoryObjectStore>>,
    git_dir: RwLock<Option<PathBuf>>,
}

impl Clone for MemoryObjectStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl MemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the repository metadata directory reported by
    /// [`ObjectStore::git_dir`].
    pub fn set_git_dir(&self, dir: impl Into<PathBuf>) {
        *self.inner.git_dir.write().expect("lock poisoned") = Some(dir.into());
    }

    /// Links another store as a named remote.
    pub fn add_remote(&self, name: impl Into<String>, remote: Self) {
        self.inner
            .remotes
            .write()
            .expect("lock poisoned")
            .insert(name.into(), remote);
    }

    /// Writes a commit object with the given parents and returns its id.
    ///
    /// The commit body is ordinary blob content; the parent edges feed
    /// [`ObjectStore::is_ancestor`].
    ///
    /// # Errors
    ///
    /// Returns an error if the blob write fails.
    pub fn write_commit(&self, content: &[u8], parents: &[Hash]) -> Result<Hash, StoreError> {
        let id = self.write_blob(content)?;
        self.inner
            .parents
            .write()
            .expect("lock poisoned")
            .insert(id, parents.to_vec());
        Ok(id)
    }

    /// Returns the number of stored blobs.
    #[must_use]
    pub fn blob_count(&self) -> usize {
        self.inner.blobs.read().expect("lock poisoned").len()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn read_blob(&self, id: &Hash) -> Result<Vec<u8>, StoreError> {
        let blobs = self.inner.blobs.read().expect("lock poisoned");
        let content = blobs
            .get(id)
            .ok_or(StoreError::BlobNotFound { id: *id })?;

        let actual = Hash::of(content);
        if actual != *id {
            return Err(StoreError::BlobCorrupted {
                expected: *id,
                actual,
            });
        }

        Ok(content.clone())
    }

    fn write_blob(&self, content: &[u8]) -> Result<Hash, StoreError> {
        let id = Hash::of(content);
        self.inner
            .blobs
            .write()
            .expect("lock poisoned")
            .entry(id)
            .or_insert_with(|| content.to_vec());
        Ok(id)
    }

    fn get_reference(&self, name: &str) -> Result<Option<Hash>, StoreError> {
        Ok(self
            .inner
            .refs
            .read()
            .expect("lock poisoned")
            .get(name)
            .copied())
    }

    fn set_reference(&self, name: &str, target: Hash) -> Result<(), StoreError> {
        self.inner
            .refs
            .write()
            .expect("lock poisoned")
            .insert(name.to_string(), target);
        Ok(())
    }

    fn compare_and_swap_reference(
        &self,
        name: &str,
        expected: Option<Hash>,
        target: Hash,
    ) -> Result<(), StoreError> {
        let mut refs = self.inner.refs.write().expect("lock poisoned");
        let actual = refs.get(name).copied();
        if actual != expected {
            return Err(StoreError::ReferenceConflict {
                name: name.to_string(),
                expected,
                actual,
            });
        }
        refs.insert(name.to_string(), target);
        Ok(())
    }

    fn delete_reference(&self, name: &str) -> Result<(), StoreError> {
        self.inner.refs.write().expect("lock poisoned").remove(name);
        Ok(())
    }

    fn fetch(&self, remote: &str, ref_name: &str) -> Result<Hash, StoreError> {
        let remotes = self.inner.remotes.read().expect("lock poisoned");
        let remote_store = remotes.get(remote).ok_or_else(|| StoreError::RemoteNotFound {
            name: remote.to_string(),
        })?;

        let target = remote_store.get_reference(ref_name)?.ok_or_else(|| {
            StoreError::RemoteReferenceNotFound {
                remote: remote.to_string(),
                name: ref_name.to_string(),
            }
        })?;

        // Mirror the remote's objects and graph edges. Content addressing
        // makes the copy idempotent.
        {
            let remote_blobs = remote_store.inner.blobs.read().expect("lock poisoned");
            let mut blobs = self.inner.blobs.write().expect("lock poisoned");
            for (id, content) in remote_blobs.iter() {
                blobs.entry(*id).or_insert_with(|| content.clone());
            }
        }
        {
            let remote_parents = remote_store.inner.parents.read().expect("lock poisoned");
            let mut parents = self.inner.parents.write().expect("lock poisoned");
            for (id, edges) in remote_parents.iter() {
                parents.entry(*id).or_insert_with(|| edges.clone());
            }
        }

        Ok(target)
    }

    fn is_ancestor(&self, ancestor: &Hash, descendant: &Hash) -> Result<bool, StoreError> {
        if ancestor.is_zero() || ancestor == descendant {
            return Ok(true);
        }

        let parents = self.inner.parents.read().expect("lock poisoned");
        let mut queue = vec![*descendant];
        let mut seen = std::collections::HashSet::new();
        while let Some(current) = queue.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(edges) = parents.get(&current) {
                for parent in edges {
                    if parent == ancestor {
                        return Ok(true);
                    }
                    queue.push(*parent);
                }
            }
        }

        Ok(false)
    }

    fn git_dir(&self) -> Result<PathBuf, StoreError> {
        self.inner
            .git_dir
            .read()
            .expect("lock poisoned")
            .clone()
            .ok_or(StoreError::NoGitDir)
    }
}
