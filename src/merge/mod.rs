//! Merge and rebase between branches.
//!
//! A merge either fast-forwards the target, writes one merge commit onto it
//! (squash or diverged merge) or, for a child target, rebases it onto the
//! source. Every attempt ends up in the [`MergeLog`].

mod conflict;
mod engine;

pub use conflict::{
    three_way, ConflictProcessor, DefaultConflictProcessor, DeletionResolution, KeepSource,
    KeepTarget, MergeConflict, Side,
};

use crate::error::Result;
use crate::staging::Commit;
use crate::store::RevisionStore;
use crate::types::{ObjectId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergeKind {
    /// Nothing to merge.
    NoOp,
    /// The target adopted the source's segments without a commit.
    FastForward,
    /// Source changes were collapsed into one commit on the target.
    Squash,
    /// Diverged branches were joined by a commit on the target.
    MergeCommit,
    /// The target was replayed on top of the source.
    Rebase,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergeStatus {
    Completed,
    Conflicts,
    Failed,
}

/// Record of one merge or rebase attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Merge {
    pub id: u64,
    pub source: String,
    pub target: String,
    pub kind: MergeKind,
    pub status: MergeStatus,
    /// Commit written onto the target, if any.
    pub commit: Option<Commit>,
    pub conflicts: Vec<MergeConflict>,
    /// Failure message for `Failed` merges.
    pub error: Option<String>,
    pub started: Timestamp,
    pub finished: Timestamp,
}

impl Merge {
    pub fn is_completed(&self) -> bool {
        self.status == MergeStatus::Completed
    }
}

impl fmt::Display for Merge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({:?}, {:?})",
            self.source, self.target, self.kind, self.status
        )
    }
}

/// Append-only log of merge attempts.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MergeLog {
    merges: Vec<Merge>,
    next_id: u64,
}

impl MergeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `merge` under a fresh id and return it.
    pub fn record(&mut self, mut merge: Merge) -> Merge {
        self.next_id += 1;
        merge.id = self.next_id;
        self.merges.push(merge.clone());
        merge
    }

    pub fn get(&self, id: u64) -> Option<&Merge> {
        self.merges.iter().find(|m| m.id == id)
    }

    /// All attempts, most recent first.
    pub fn all(&self) -> impl Iterator<Item = &Merge> {
        self.merges.iter().rev()
    }

    /// Attempts involving `path` as source or target, most recent first.
    pub fn involving<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Merge> + 'a {
        self.all()
            .filter(move |m| m.source == path || m.target == path)
    }

    pub fn len(&self) -> usize {
        self.merges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merges.is_empty()
    }
}

/// Builder for a merge between two branches.
///
/// ```ignore
/// let merge = store
///     .prepare_merge("MAIN/a", "MAIN")
///     .squash(true)
///     .author("ann")
///     .comment("Promote a")
///     .merge()?;
/// ```
pub struct MergeRequest<'a> {
    store: &'a RevisionStore,
    pub(crate) source: String,
    pub(crate) target: String,
    pub(crate) squash: bool,
    pub(crate) author: String,
    pub(crate) comment: String,
    pub(crate) exclusions: BTreeSet<ObjectId>,
    pub(crate) processor: Arc<dyn ConflictProcessor>,
}

impl<'a> MergeRequest<'a> {
    pub(crate) fn new(store: &'a RevisionStore, source: &str, target: &str) -> Self {
        Self {
            store,
            source: source.to_string(),
            target: target.to_string(),
            squash: false,
            author: String::new(),
            comment: String::new(),
            exclusions: BTreeSet::new(),
            processor: Arc::new(DefaultConflictProcessor),
        }
    }

    pub fn squash(mut self, squash: bool) -> Self {
        self.squash = squash;
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Leave the object out of a squash merge.
    pub fn exclude(mut self, object: ObjectId) -> Self {
        self.exclusions.insert(object);
        self
    }

    pub fn conflict_processor(mut self, processor: impl ConflictProcessor + 'static) -> Self {
        self.processor = Arc::new(processor);
        self
    }

    pub fn merge(self) -> Result<Merge> {
        let store = self.store;
        store.execute_merge(self)
    }

    /// Rebase the target onto the source instead of merging.
    pub fn rebase(self) -> Result<Merge> {
        let store = self.store;
        store.execute_rebase(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(source: &str, target: &str, status: MergeStatus) -> Merge {
        Merge {
            id: 0,
            source: source.into(),
            target: target.into(),
            kind: MergeKind::Squash,
            status,
            commit: None,
            conflicts: vec![],
            error: None,
            started: Timestamp(1),
            finished: Timestamp(2),
        }
    }

    #[test]
    fn test_merge_log_assigns_ids_and_lists_newest_first() {
        let mut log = MergeLog::new();
        let first = log.record(attempt("MAIN/a", "MAIN", MergeStatus::Completed));
        let second = log.record(attempt("MAIN/b", "MAIN", MergeStatus::Conflicts));

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(log.len(), 2);

        let ids: Vec<u64> = log.all().map(|m| m.id).collect();
        assert_eq!(ids, vec![2, 1]);

        let involving_a: Vec<u64> = log.involving("MAIN/a").map(|m| m.id).collect();
        assert_eq!(involving_a, vec![1]);
        assert!(!log.get(2).unwrap().is_completed());
    }
}
