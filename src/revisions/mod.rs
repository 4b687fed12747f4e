//! Segmented revision store.
//!
//! Every write produces a new revision tagged with the segment it was
//! written in. Reads go through a [`View`] (segments plus a point in time)
//! so each branch sees a consistent snapshot of the shared arena.

mod document;
mod index;
mod query;
mod revision;

pub use document::{Document, PropertyDiff, Revisioned, CONTAINER_PROPERTY};
pub use index::{Change, RevisionArena, RevisionIndex};
pub use query::{Expr, Hits, Query, SortBy, SortOrder};
pub use revision::{Revision, RevisionBody, View};

use crate::error::Result;
use crate::types::{ObjectId, Timestamp};
use std::collections::BTreeMap;

/// Read access to one branch view.
pub struct RevisionSearcher<'a> {
    index: &'a RevisionIndex,
    path: String,
    view: View,
}

impl<'a> RevisionSearcher<'a> {
    pub(crate) fn new(index: &'a RevisionIndex, path: impl Into<String>, view: View) -> Self {
        Self {
            index,
            path: path.into(),
            view,
        }
    }

    /// The branch reference this searcher was opened against.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn get(&self, doc_type: &str, id: &str) -> Option<Document> {
        self.get_object(&ObjectId::new(doc_type, id))
    }

    pub fn get_object(&self, object: &ObjectId) -> Option<Document> {
        self.index.read().get(&self.view, object).cloned()
    }

    pub fn get_typed<T: Revisioned>(&self, id: &str) -> Result<Option<T>> {
        self.get(T::DOC_TYPE, id)
            .map(|doc| T::from_document(&doc))
            .transpose()
    }

    pub fn exists(&self, doc_type: &str, id: &str) -> bool {
        self.get(doc_type, id).is_some()
    }

    /// All visible documents of a type, ordered by id.
    pub fn get_all(&self, doc_type: &str) -> Vec<Document> {
        self.index
            .read()
            .documents_of_type(&self.view, doc_type)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn search(&self, query: &Query) -> Hits<Document> {
        let arena = self.index.read();
        let docs = match &query.doc_type {
            Some(doc_type) => arena.documents_of_type(&self.view, doc_type),
            None => arena.documents(&self.view),
        };
        let items = docs
            .into_iter()
            .map(|doc| (doc.id.clone(), doc.to_value(), doc.clone()))
            .collect();
        query.execute(items)
    }

    pub fn search_typed<T: Revisioned>(&self, query: &Query) -> Result<Hits<T>> {
        let mut query = query.clone();
        query.doc_type = Some(T::DOC_TYPE.to_string());
        let hits = self.search(&query);
        let items = hits
            .items
            .iter()
            .map(T::from_document)
            .collect::<Result<Vec<T>>>()?;
        Ok(Hits {
            items,
            total: hits.total,
            offset: hits.offset,
            limit: hits.limit,
        })
    }
}

/// Buffered write access to a branch head.
///
/// Operations are collected and applied atomically once the write closure
/// returns successfully.
pub struct RevisionWriter<'a> {
    searcher: RevisionSearcher<'a>,
    timestamp: Timestamp,
    pending: BTreeMap<ObjectId, Option<Document>>,
}

impl<'a> RevisionWriter<'a> {
    pub(crate) fn new(searcher: RevisionSearcher<'a>, timestamp: Timestamp) -> Self {
        Self {
            searcher,
            timestamp,
            pending: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &str {
        self.searcher.path()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Create or supersede the document.
    pub fn put(&mut self, doc: Document) {
        self.pending.insert(doc.object_id(), Some(doc));
    }

    pub fn put_typed<T: Revisioned>(&mut self, value: &T) -> Result<()> {
        self.put(value.to_document()?);
        Ok(())
    }

    /// Tombstone the document.
    pub fn remove(&mut self, doc_type: &str, id: &str) {
        self.pending.insert(ObjectId::new(doc_type, id), None);
    }

    /// Read through pending operations to the branch head.
    pub fn get(&self, doc_type: &str, id: &str) -> Option<Document> {
        let object = ObjectId::new(doc_type, id);
        match self.pending.get(&object) {
            Some(pending) => pending.clone(),
            None => self.searcher.get_object(&object),
        }
    }

    pub fn searcher(&self) -> &RevisionSearcher<'a> {
        &self.searcher
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn into_changes(self) -> Vec<Change> {
        self.pending.into_iter().collect()
    }
}
