//! Reference State Log.
//!
//! The RSL is an append-only, hash-chained, totally-ordered log of
//! reference updates, committed as a chain of blobs under a dedicated
//! reference. Each entry serializes to a canonical line-oriented text that
//! embeds the previous entry's identifier; the entry's own identifier is
//! the digest of that text. An entry visible through the log reference is
//! never rewritten.
//!
//! Writers race on the log head through the store's compare-and-swap
//! reference update; a loser recomputes the back-pointer and sequence
//! number from the new head and retries. The log never forks under correct
//! writers.

use std::fmt::Write as _;
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

use crate::cancel::{CancelToken, Cancelled};
use crate::hash::Hash;
use crate::store::{ObjectStore, StoreError};

/// Reference the log is committed under.
pub const RSL_REF: &str = "refs/refseal/reference-state-log";

/// Bound on compare-and-swap retries when recording an entry.
const MAX_RECORD_ATTEMPTS: usize = 5;

/// Errors that can occur during log operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LogError {
    /// Object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The log has no entries.
    #[error("the reference state log is empty")]
    EmptyLog,

    /// No entry exists with the given identifier.
    #[error("log entry not found: {id}")]
    EntryNotFound {
        /// The identifier searched for.
        id: Hash,
    },

    /// No entry exists with the given sequence number.
    #[error("no log entry with number {number}")]
    NumberNotFound {
        /// The number searched for.
        number: u64,
    },

    /// An entry blob did not parse as canonical entry text.
    #[error("malformed log entry {id}: {reason}")]
    MalformedEntry {
        /// The offending entry identifier.
        id: Hash,
        /// What was wrong.
        reason: String,
    },

    /// The hash chain is broken or the numbering has a gap. Fatal.
    #[error("log inconsistency: {reason}")]
    Inconsistency {
        /// Description of the first problem found.
        reason: String,
    },

    /// The compare-and-swap retry bound was exhausted.
    #[error("gave up recording entry after {attempts} concurrent-writer conflicts")]
    ConcurrentWriters {
        /// Number of attempts made.
        attempts: usize,
    },

    /// The operation was cancelled.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Type-specific body of a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Records that a reference was updated to a target.
    Reference {
        /// The updated reference name.
        ref_name: String,
        /// The new target of the reference.
        target_id: Hash,
    },

    /// Attaches a message to earlier entries, optionally marking them
    /// skipped.
    Annotation {
        /// Identifiers of the entries annotated.
        entry_ids: Vec<Hash>,
        /// Whether the annotated entries are marked skipped.
        skip: bool,
        /// Free-form message.
        message: String,
    },
}

/// A committed log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Digest of the canonical entry text.
    pub id: Hash,

    /// Identifier of the previous entry, zero at genesis.
    pub prev_id: Hash,

    /// Position in the total order, starting at 1. No gaps.
    pub number: u64,

    /// Type-specific body.
    pub kind: EntryKind,
}

impl Entry {
    /// Returns the canonical text for an entry with the given linkage.
    #[must_use]
    pub fn canonical_text(prev_id: &Hash, number: u64, kind: &EntryKind) -> String {
        let mut text = String::from("entry\n");
        let _ = writeln!(text, "prev {}", prev_id.to_hex());
        let _ = writeln!(text, "number {number}");

        match kind {
            EntryKind::Reference {
                ref_name,
                target_id,
            } => {
                let _ = writeln!(text, "ref {ref_name}");
                let _ = writeln!(text, "targetID {}", target_id.to_hex());
            },
            EntryKind::Annotation {
                entry_ids,
                skip,
                message,
            } => {
                text.push_str("type annotation\n");
                let _ = writeln!(text, "skip {skip}");
                let ids = entry_ids
                    .iter()
                    .map(Hash::to_hex)
                    .collect::<Vec<_>>()
                    .join(" ");
                let _ = writeln!(text, "refs {ids}");
                let _ = writeln!(text, "message {}", BASE64.encode(message.as_bytes()));
            },
        }

        text
    }

    /// Returns this entry's canonical text. Hashing it reproduces
    /// [`Entry::id`].
    #[must_use]
    pub fn to_canonical_text(&self) -> String {
        Self::canonical_text(&self.prev_id, self.number, &self.kind)
    }

    /// Parses an entry from its canonical text.
    ///
    /// The entry identifier is the digest of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::MalformedEntry`] if the text does not follow
    /// the canonical form.
    pub fn parse(bytes: &[u8]) -> Result<Self, LogError> {
        let id = Hash::of(bytes);
        let malformed = |reason: &str| LogError::MalformedEntry {
            id,
            reason: reason.to_string(),
        };

        let text = std::str::from_utf8(bytes).map_err(|_| malformed("not valid UTF-8"))?;
        let mut lines = text.lines();

        if lines.next() != Some("entry") {
            return Err(malformed("missing 'entry' tag"));
        }

        let prev_line = lines.next().ok_or_else(|| malformed("missing 'prev'"))?;
        let prev_hex = prev_line
            .strip_prefix("prev ")
            .ok_or_else(|| malformed("missing 'prev'"))?;
        let prev_id = Hash::from_hex(prev_hex).map_err(|_| malformed("invalid 'prev' hash"))?;

        let number_line = lines.next().ok_or_else(|| malformed("missing 'number'"))?;
        let number = number_line
            .strip_prefix("number ")
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| malformed("invalid 'number'"))?;

        let body_line = lines.next().ok_or_else(|| malformed("missing body"))?;
        let kind = if body_line == "type annotation" {
            let skip_line = lines.next().ok_or_else(|| malformed("missing 'skip'"))?;
            let skip = match skip_line.strip_prefix("skip ") {
                Some("true") => true,
                Some("false") => false,
                _ => return Err(malformed("invalid 'skip'")),
            };

            let refs_line = lines.next().ok_or_else(|| malformed("missing 'refs'"))?;
            let refs = refs_line
                .strip_prefix("refs ")
                .ok_or_else(|| malformed("missing 'refs'"))?;
            let entry_ids = refs
                .split_whitespace()
                .map(Hash::from_hex)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| malformed("invalid entry id in 'refs'"))?;
            if entry_ids.is_empty() {
                return Err(malformed("annotation targets no entries"));
            }

            let message_line = lines.next().ok_or_else(|| malformed("missing 'message'"))?;
            let message_b64 = message_line
                .strip_prefix("message ")
                .unwrap_or_else(|| message_line.strip_prefix("message").unwrap_or_default());
            let message_bytes = BASE64
                .decode(message_b64)
                .map_err(|_| malformed("message is not valid base64"))?;
            let message = String::from_utf8(message_bytes)
                .map_err(|_| malformed("message is not valid UTF-8"))?;

            EntryKind::Annotation {
                entry_ids,
                skip,
                message,
            }
        } else {
            let ref_name = body_line
                .strip_prefix("ref ")
                .ok_or_else(|| malformed("missing 'ref'"))?
                .to_string();
            if ref_name.is_empty() {
                return Err(malformed("empty reference name"));
            }

            let target_line = lines.next().ok_or_else(|| malformed("missing 'targetID'"))?;
            let target_hex = target_line
                .strip_prefix("targetID ")
                .ok_or_else(|| malformed("missing 'targetID'"))?;
            let target_id =
                Hash::from_hex(target_hex).map_err(|_| malformed("invalid 'targetID'"))?;

            EntryKind::Reference {
                ref_name,
                target_id,
            }
        };

        if lines.next().is_some() {
            return Err(malformed("trailing content"));
        }

        Ok(Self {
            id,
            prev_id,
            number,
            kind,
        })
    }

    /// Returns the reference name for reference entries.
    #[must_use]
    pub fn ref_name(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Reference { ref_name, .. } => Some(ref_name),
            EntryKind::Annotation { .. } => None,
        }
    }

    /// Returns the target for reference entries.
    #[must_use]
    pub fn target_id(&self) -> Option<Hash> {
        match &self.kind {
            EntryKind::Reference { target_id, .. } => Some(*target_id),
            EntryKind::Annotation { .. } => None,
        }
    }
}

/// Handle over the log stored in an object store.
///
/// The handle keeps an in-memory head cache so repeated reads do not hit
/// the store; the cache is invalidated whenever a compare-and-swap attempt
/// fails, which is the only way this process can observe a concurrent
/// writer.
pub struct ReferenceStateLog<'a> {
    store: &'a dyn ObjectStore,
    /// `None` = unknown, `Some(None)` = known empty, `Some(Some(id))` =
    /// known head.
    head: Mutex<Option<Option<Hash>>>,
    cancel: CancelToken,
}

impl<'a> ReferenceStateLog<'a> {
    /// Creates a handle over the log in `store`.
    #[must_use]
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self {
            store,
            head: Mutex::new(None),
            cancel: CancelToken::new(),
        }
    }

    /// Attaches a cancellation token observed between store operations.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Records a reference entry.
    ///
    /// # Errors
    ///
    /// Propagates store failures; returns [`LogError::ConcurrentWriters`]
    /// if the retry bound is exhausted.
    pub fn record_reference_entry(
        &self,
        ref_name: impl Into<String>,
        target_id: Hash,
    ) -> Result<Entry, LogError> {
        self.record(EntryKind::Reference {
            ref_name: ref_name.into(),
            target_id,
        })
    }

    /// Records an annotation entry.
    ///
    /// # Errors
    ///
    /// Propagates store failures; returns [`LogError::ConcurrentWriters`]
    /// if the retry bound is exhausted.
    pub fn record_annotation_entry(
        &self,
        entry_ids: Vec<Hash>,
        skip: bool,
        message: impl Into<String>,
    ) -> Result<Entry, LogError> {
        self.record(EntryKind::Annotation {
            entry_ids,
            skip,
            message: message.into(),
        })
    }

    /// Records an entry of the given kind, retrying on head conflicts.
    ///
    /// # Errors
    ///
    /// Propagates store failures; returns [`LogError::ConcurrentWriters`]
    /// if the retry bound is exhausted.
    pub fn record(&self, kind: EntryKind) -> Result<Entry, LogError> {
        for attempt in 1..=MAX_RECORD_ATTEMPTS {
            self.cancel.check()?;

            let head = self.read_head()?;
            let (prev_id, number) = match head {
                None => (Hash::ZERO, 1),
                Some(head_id) => {
                    let head_entry = self.read_entry(&head_id)?;
                    (head_id, head_entry.number + 1)
                },
            };

            let text = Entry::canonical_text(&prev_id, number, &kind);
            let id = self.store.write_blob(text.as_bytes())?;

            match self.store.compare_and_swap_reference(RSL_REF, head, id) {
                Ok(()) => {
                    *self.head.lock().expect("lock poisoned") = Some(Some(id));
                    tracing::debug!(%id, number, "recorded log entry");
                    return Ok(Entry {
                        id,
                        prev_id,
                        number,
                        kind,
                    });
                },
                Err(StoreError::ReferenceConflict { .. }) => {
                    tracing::debug!(attempt, "lost log head race, retrying");
                    self.invalidate_head();
                },
                Err(err) => return Err(err.into()),
            }
        }

        Err(LogError::ConcurrentWriters {
            attempts: MAX_RECORD_ATTEMPTS,
        })
    }

    /// Returns the most recent entry.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::EmptyLog`] when nothing has been recorded.
    pub fn latest_entry(&self) -> Result<Entry, LogError> {
        let head = self.read_head()?.ok_or(LogError::EmptyLog)?;
        self.read_entry(&head)
    }

    /// Returns the genesis entry.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::EmptyLog`] when nothing has been recorded and
    /// [`LogError::Inconsistency`] if the walk finds a broken chain.
    pub fn first_entry(&self) -> Result<Entry, LogError> {
        let mut entry = self.latest_entry()?;
        while !entry.prev_id.is_zero() {
            self.cancel.check()?;
            let prev = self.read_entry(&entry.prev_id)?;
            check_linkage(&prev, &entry)?;
            entry = prev;
        }
        if entry.number != 1 {
            return Err(LogError::Inconsistency {
                reason: format!("genesis entry has number {}", entry.number),
            });
        }
        Ok(entry)
    }

    /// Returns the entry with the given identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::EntryNotFound`] if no blob exists under `id`
    /// or it is not a log entry.
    pub fn entry(&self, id: &Hash) -> Result<Entry, LogError> {
        match self.read_entry(id) {
            Ok(entry) => Ok(entry),
            Err(LogError::Store(StoreError::BlobNotFound { .. })) => {
                Err(LogError::EntryNotFound { id: *id })
            },
            Err(err) => Err(err),
        }
    }

    /// Returns the entry with the given sequence number, walking back
    /// from the head.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::NumberNotFound`] if `number` is out of range
    /// and [`LogError::Inconsistency`] on numbering gaps.
    pub fn entry_by_number(&self, number: u64) -> Result<Entry, LogError> {
        if number == 0 {
            return Err(LogError::NumberNotFound { number });
        }

        let mut entry = self.latest_entry().map_err(|err| match err {
            LogError::EmptyLog => LogError::NumberNotFound { number },
            other => other,
        })?;

        if number > entry.number {
            return Err(LogError::NumberNotFound { number });
        }

        while entry.number != number {
            self.cancel.check()?;
            if entry.prev_id.is_zero() {
                return Err(LogError::Inconsistency {
                    reason: format!(
                        "chain ended at number {} while looking for {number}",
                        entry.number
                    ),
                });
            }
            let prev = self.read_entry(&entry.prev_id)?;
            check_linkage(&prev, &entry)?;
            entry = prev;
        }

        Ok(entry)
    }

    /// Returns the reference entries for `ref_name` with numbers in
    /// `[first_id, last_id]`, ascending, excluding entries marked skipped
    /// by annotations recorded anywhere up to the current head.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::EntryNotFound`] if either bound is not on the
    /// chain and [`LogError::Inconsistency`] on linkage faults.
    pub fn reference_entries_in_range_for_ref(
        &self,
        first_id: &Hash,
        last_id: &Hash,
        ref_name: &str,
    ) -> Result<Vec<Entry>, LogError> {
        let mut skipped: std::collections::HashSet<Hash> = std::collections::HashSet::new();
        let mut in_range: Vec<Entry> = Vec::new();

        let mut cursor = Some(self.latest_entry().map_err(|err| match err {
            LogError::EmptyLog => LogError::EntryNotFound { id: *last_id },
            other => other,
        })?);
        let mut seen_last = false;
        let mut seen_first = false;

        while let Some(entry) = cursor {
            self.cancel.check()?;

            if let EntryKind::Annotation {
                entry_ids, skip, ..
            } = &entry.kind
            {
                if *skip {
                    skipped.extend(entry_ids.iter().copied());
                }
            }

            if entry.id == *last_id {
                seen_last = true;
            }

            if seen_last && matches!(entry.kind, EntryKind::Reference { .. }) {
                in_range.push(entry.clone());
            }

            if entry.id == *first_id {
                if !seen_last {
                    // The bounds are inverted or `last` is not on the
                    // chain above `first`.
                    return Err(LogError::EntryNotFound { id: *last_id });
                }
                seen_first = true;
                break;
            }

            cursor = if entry.prev_id.is_zero() {
                None
            } else {
                let prev = self.read_entry(&entry.prev_id)?;
                check_linkage(&prev, &entry)?;
                Some(prev)
            };
        }

        if !seen_first {
            return Err(LogError::EntryNotFound { id: *first_id });
        }

        in_range.reverse();
        Ok(in_range
            .into_iter()
            .filter(|e| !skipped.contains(&e.id))
            .filter(|e| e.ref_name() == Some(ref_name))
            .collect())
    }

    fn read_head(&self) -> Result<Option<Hash>, LogError> {
        let mut head = self.head.lock().expect("lock poisoned");
        if let Some(known) = *head {
            return Ok(known);
        }
        let current = self.store.get_reference(RSL_REF)?;
        *head = Some(current);
        Ok(current)
    }

    fn invalidate_head(&self) {
        *self.head.lock().expect("lock poisoned") = None;
    }

    fn read_entry(&self, id: &Hash) -> Result<Entry, LogError> {
        let bytes = self.store.read_blob(id)?;
        Entry::parse(&bytes)
    }

}

fn check_linkage(prev: &Entry, entry: &Entry) -> Result<(), LogError> {
    if prev.number + 1 != entry.number {
        return Err(LogError::Inconsistency {
            reason: format!(
                "number gap: entry {} follows entry {}",
                entry.number, prev.number
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;

    fn target(seed: &str) -> Hash {
        Hash::of(seed.as_bytes())
    }

    #[test]
    fn test_numbers_start_at_one_and_increase() {
        let store = MemoryObjectStore::new();
        let log = ReferenceStateLog::new(&store);

        let e1 = log
            .record_reference_entry("refs/heads/main", target("a"))
            .unwrap();
        let e2 = log
            .record_reference_entry("refs/heads/main", target("b"))
            .unwrap();
        let e3 = log
            .record_reference_entry("refs/heads/feature", target("c"))
            .unwrap();

        assert_eq!(e1.number, 1);
        assert_eq!(e2.number, 2);
        assert_eq!(e3.number, 3);
        assert!(e1.prev_id.is_zero());
        assert_eq!(e2.prev_id, e1.id);
        assert_eq!(e3.prev_id, e2.id);
    }

    #[test]
    fn test_canonical_text_hash_roundtrip() {
        let store = MemoryObjectStore::new();
        let log = ReferenceStateLog::new(&store);
        let entry = log
            .record_reference_entry("refs/heads/main", target("a"))
            .unwrap();

        // The blob referenced by the id is the canonical text, and the
        // text hashes back to the id.
        let bytes = store.read_blob(&entry.id).unwrap();
        assert_eq!(bytes, entry.to_canonical_text().as_bytes());
        assert_eq!(Hash::of(&bytes), entry.id);

        let parsed = Entry::parse(&bytes).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_annotation_roundtrip() {
        let store = MemoryObjectStore::new();
        let log = ReferenceStateLog::new(&store);
        let e1 = log
            .record_reference_entry("refs/heads/main", target("a"))
            .unwrap();

        let annotation = log
            .record_annotation_entry(vec![e1.id], true, "bad update\nsee incident 42")
            .unwrap();

        let parsed = Entry::parse(&store.read_blob(&annotation.id).unwrap()).unwrap();
        assert_eq!(parsed, annotation);
        match parsed.kind {
            EntryKind::Annotation {
                entry_ids,
                skip,
                message,
            } => {
                assert_eq!(entry_ids, vec![e1.id]);
                assert!(skip);
                assert_eq!(message, "bad update\nsee incident 42");
            },
            EntryKind::Reference { .. } => panic!("expected annotation"),
        }
    }

    #[test]
    fn test_first_and_latest() {
        let store = MemoryObjectStore::new();
        let log = ReferenceStateLog::new(&store);

        assert!(matches!(log.latest_entry(), Err(LogError::EmptyLog)));

        let e1 = log
            .record_reference_entry("refs/heads/main", target("a"))
            .unwrap();
        let e2 = log
            .record_reference_entry("refs/heads/main", target("b"))
            .unwrap();

        assert_eq!(log.first_entry().unwrap(), e1);
        assert_eq!(log.latest_entry().unwrap(), e2);
    }

    #[test]
    fn test_entry_by_number() {
        let store = MemoryObjectStore::new();
        let log = ReferenceStateLog::new(&store);

        let e1 = log
            .record_reference_entry("refs/heads/main", target("a"))
            .unwrap();
        let e2 = log
            .record_reference_entry("refs/heads/main", target("b"))
            .unwrap();

        assert_eq!(log.entry_by_number(1).unwrap(), e1);
        assert_eq!(log.entry_by_number(2).unwrap(), e2);
        assert!(matches!(
            log.entry_by_number(3),
            Err(LogError::NumberNotFound { number: 3 })
        ));
        assert!(matches!(
            log.entry_by_number(0),
            Err(LogError::NumberNotFound { number: 0 })
        ));
    }

    #[test]
    fn test_range_query_filters_and_orders() {
        let store = MemoryObjectStore::new();
        let log = ReferenceStateLog::new(&store);

        let e1 = log
            .record_reference_entry("refs/heads/main", target("a"))
            .unwrap();
        let _other = log
            .record_reference_entry("refs/heads/feature", target("b"))
            .unwrap();
        let e3 = log
            .record_reference_entry("refs/heads/main", target("c"))
            .unwrap();

        let entries = log
            .reference_entries_in_range_for_ref(&e1.id, &e3.id, "refs/heads/main")
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], e1);
        assert_eq!(entries[1], e3);
    }

    #[test]
    fn test_range_query_honors_skip_annotations() {
        let store = MemoryObjectStore::new();
        let log = ReferenceStateLog::new(&store);

        let e1 = log
            .record_reference_entry("refs/heads/main", target("a"))
            .unwrap();
        let e2 = log
            .record_reference_entry("refs/heads/main", target("b"))
            .unwrap();
        let e3 = log
            .record_reference_entry("refs/heads/main", target("c"))
            .unwrap();
        // The annotation lands after the range but still applies.
        log.record_annotation_entry(vec![e2.id], true, "revoked")
            .unwrap();

        let entries = log
            .reference_entries_in_range_for_ref(&e1.id, &e3.id, "refs/heads/main")
            .unwrap();

        assert_eq!(entries, vec![e1, e3]);
    }

    #[test]
    fn test_range_query_rejects_unknown_bounds() {
        let store = MemoryObjectStore::new();
        let log = ReferenceStateLog::new(&store);
        let e1 = log
            .record_reference_entry("refs/heads/main", target("a"))
            .unwrap();

        let result =
            log.reference_entries_in_range_for_ref(&Hash::of(b"bogus"), &e1.id, "refs/heads/main");
        assert!(matches!(result, Err(LogError::EntryNotFound { .. })));
    }

    #[test]
    fn test_concurrent_writers_converge() {
        let store = MemoryObjectStore::new();
        // Two handles over the same store stand in for two processes.
        let log_a = ReferenceStateLog::new(&store);
        let log_b = ReferenceStateLog::new(&store);

        let e1 = log_a
            .record_reference_entry("refs/heads/main", target("a"))
            .unwrap();
        // B has never read the head; it discovers it and appends.
        let e2 = log_b
            .record_reference_entry("refs/heads/main", target("b"))
            .unwrap();
        // A's cached head is now stale; the CAS fails once and A retries
        // from the new head.
        let e3 = log_a
            .record_reference_entry("refs/heads/main", target("c"))
            .unwrap();

        assert_eq!(e2.prev_id, e1.id);
        assert_eq!(e3.prev_id, e2.id);
        assert_eq!(e3.number, 3);
    }

    #[test]
    fn test_cancellation_observed() {
        let store = MemoryObjectStore::new();
        let token = CancelToken::new();
        let log = ReferenceStateLog::new(&store).with_cancel_token(token.clone());

        log.record_reference_entry("refs/heads/main", target("a"))
            .unwrap();

        token.cancel();
        let result = log.record_reference_entry("refs/heads/main", target("b"));
        assert!(matches!(result, Err(LogError::Cancelled(_))));
    }

    #[test]
    fn test_malformed_entry_rejected() {
        let result = Entry::parse(b"not an entry\n");
        assert!(matches!(result, Err(LogError::MalformedEntry { .. })));

        let result = Entry::parse(b"entry\nprev zz\n");
        assert!(matches!(result, Err(LogError::MalformedEntry { .. })));
    }
}
