//! Single-use transaction buffer.

use super::commit::Commit;
use crate::error::Result;
use crate::revisions::{Change, Document, RevisionSearcher, Revisioned};
use crate::store::RevisionStore;
use crate::types::{ObjectId, Timestamp};
use std::collections::BTreeMap;

/// A pending operation on one logical object.
#[derive(Clone, Debug, PartialEq)]
pub enum StagedChange {
    New(Document),
    Changed(Document),
    Removed,
}

/// Buffers new, changed and removed objects until [`StagingArea::commit`].
///
/// Objects are keyed by logical id, so staging the same id twice replaces
/// the earlier operation.
pub struct StagingArea<'a> {
    store: &'a RevisionStore,
    changes: BTreeMap<ObjectId, StagedChange>,
    branch: Option<String>,
    timestamp: Option<Timestamp>,
    merge_source: Option<String>,
}

impl<'a> StagingArea<'a> {
    pub(crate) fn new(store: &'a RevisionStore) -> Self {
        Self {
            store,
            changes: BTreeMap::new(),
            branch: None,
            timestamp: None,
            merge_source: None,
        }
    }

    /// Bind the area to the commit it is about to become.
    pub(crate) fn bind(&mut self, branch: &str, timestamp: Timestamp, merge_source: Option<&str>) {
        self.branch = Some(branch.to_string());
        self.timestamp = Some(timestamp);
        self.merge_source = merge_source.map(String::from);
    }

    /// Branch being committed to. `None` until [`StagingArea::commit`] is
    /// called, so pre-commit hooks always see it.
    pub fn branch_path(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    /// Branch whose content is being merged or rebased onto, if any.
    pub fn merge_source(&self) -> Option<&str> {
        self.merge_source.as_deref()
    }

    pub fn stage_new(&mut self, doc: Document) {
        self.changes.insert(doc.object_id(), StagedChange::New(doc));
    }

    pub fn stage_new_typed<T: Revisioned>(&mut self, value: &T) -> Result<()> {
        self.stage_new(value.to_document()?);
        Ok(())
    }

    pub fn stage_change(&mut self, doc: Document) {
        self.changes
            .insert(doc.object_id(), StagedChange::Changed(doc));
    }

    pub fn stage_change_typed<T: Revisioned>(&mut self, value: &T) -> Result<()> {
        self.stage_change(value.to_document()?);
        Ok(())
    }

    pub fn stage_remove(&mut self, doc_type: &str, id: &str) {
        self.changes
            .insert(ObjectId::new(doc_type, id), StagedChange::Removed);
    }

    /// Drop a pending operation.
    pub fn unstage(&mut self, object: &ObjectId) -> Option<StagedChange> {
        self.changes.remove(object)
    }

    pub fn get(&self, object: &ObjectId) -> Option<&StagedChange> {
        self.changes.get(object)
    }

    pub fn changes(&self) -> impl Iterator<Item = (&ObjectId, &StagedChange)> {
        self.changes.iter()
    }

    pub fn new_objects(&self) -> impl Iterator<Item = &Document> {
        self.changes.values().filter_map(|c| match c {
            StagedChange::New(doc) => Some(doc),
            _ => None,
        })
    }

    pub fn changed_objects(&self) -> impl Iterator<Item = &Document> {
        self.changes.values().filter_map(|c| match c {
            StagedChange::Changed(doc) => Some(doc),
            _ => None,
        })
    }

    pub fn removed_objects(&self) -> impl Iterator<Item = &ObjectId> {
        self.changes
            .iter()
            .filter(|(_, c)| matches!(c, StagedChange::Removed))
            .map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Read committed content of a branch while staging.
    pub fn read<T, F>(&self, reference: &str, f: F) -> Result<T>
    where
        F: FnOnce(&RevisionSearcher<'_>) -> Result<T>,
    {
        self.store.read(reference, f)
    }

    /// Commit the staged changes to `branch` at `timestamp`.
    ///
    /// Runs pre-commit hooks, applies every change atomically, advances the
    /// branch head, records the commit and finally runs post-commit hooks.
    pub fn commit(
        self,
        commit_id: &str,
        branch: &str,
        timestamp: Timestamp,
        author: &str,
        comment: &str,
    ) -> Result<Commit> {
        let store = self.store;
        store.commit_staged(self, commit_id, branch, timestamp, author, comment)
    }

    pub(crate) fn into_changes(self) -> Vec<Change> {
        self.changes
            .into_iter()
            .map(|(object, change)| match change {
                StagedChange::New(doc) | StagedChange::Changed(doc) => (object, Some(doc)),
                StagedChange::Removed => (object, None),
            })
            .collect()
    }
}
