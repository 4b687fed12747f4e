//! In-memory revision arena with per-object, per-segment and per-type lookups.

use super::document::Document;
use super::revision::{Revision, RevisionBody, View};
use crate::types::{ObjectId, RevisionId, SegmentId, Timestamp};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A pending change resolved to its final content. `None` removes.
pub type Change = (ObjectId, Option<Document>);

/// Append-only arena of revisions. Only purge removes entries.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RevisionArena {
    revisions: BTreeMap<RevisionId, Revision>,
    next_id: u64,

    /// Object to its revisions (rebuilt on load).
    #[serde(skip)]
    by_object: HashMap<ObjectId, BTreeSet<RevisionId>>,

    /// Segment to the revisions written in it (rebuilt on load).
    #[serde(skip)]
    by_segment: HashMap<SegmentId, BTreeSet<RevisionId>>,

    /// Document type to ids ever written under it (rebuilt on load).
    #[serde(skip)]
    by_type: BTreeMap<String, BTreeSet<String>>,
}

impl RevisionArena {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    /// Rebuild the derived lookups after deserialization.
    pub fn rebuild_indexes(&mut self) {
        self.by_object.clear();
        self.by_segment.clear();
        self.by_type.clear();

        let entries: Vec<(RevisionId, ObjectId, SegmentId)> = self
            .revisions
            .values()
            .map(|r| (r.id, r.object.clone(), r.segment))
            .collect();
        for (id, object, segment) in entries {
            self.index_revision(id, &object, segment);
        }
    }

    fn index_revision(&mut self, id: RevisionId, object: &ObjectId, segment: SegmentId) {
        self.by_object.entry(object.clone()).or_default().insert(id);
        self.by_segment.entry(segment).or_default().insert(id);
        self.by_type
            .entry(object.doc_type.clone())
            .or_default()
            .insert(object.id.clone());
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn tombstone_count(&self) -> usize {
        self.revisions.values().filter(|r| r.is_tombstone()).count()
    }

    pub fn revision(&self, id: RevisionId) -> Option<&Revision> {
        self.revisions.get(&id)
    }

    /// Every revision of `object` visible from `view`.
    pub fn visible_revisions(&self, view: &View, object: &ObjectId) -> Vec<&Revision> {
        self.by_object
            .get(object)
            .into_iter()
            .flatten()
            .filter_map(|id| self.revisions.get(id))
            .filter(|r| view.sees(r))
            .collect()
    }

    /// The winning visible revision of `object`: latest timestamp, then
    /// highest revision id.
    pub fn resolve(&self, view: &View, object: &ObjectId) -> Option<&Revision> {
        self.visible_revisions(view, object)
            .into_iter()
            .max_by_key(|r| (r.timestamp, r.id))
    }

    /// The document visible from `view`, if any.
    pub fn get(&self, view: &View, object: &ObjectId) -> Option<&Document> {
        self.resolve(view, object).and_then(|r| r.document())
    }

    /// All visible documents of a type, ordered by id.
    pub fn documents_of_type(&self, view: &View, doc_type: &str) -> Vec<&Document> {
        self.by_type
            .get(doc_type)
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(view, &ObjectId::new(doc_type, id.clone())))
            .collect()
    }

    /// All visible documents of every type, ordered by type then id.
    pub fn documents(&self, view: &View) -> Vec<&Document> {
        self.by_type
            .keys()
            .flat_map(|doc_type| self.documents_of_type(view, doc_type))
            .collect()
    }

    pub fn doc_types(&self) -> impl Iterator<Item = &String> {
        self.by_type.keys()
    }

    /// Objects with at least one revision written in one of `segments`.
    pub fn objects_in(&self, segments: &BTreeSet<SegmentId>) -> BTreeSet<ObjectId> {
        segments
            .iter()
            .filter_map(|segment| self.by_segment.get(segment))
            .flatten()
            .filter_map(|id| self.revisions.get(id))
            .map(|r| r.object.clone())
            .collect()
    }

    pub fn revisions_in(&self, segment: SegmentId) -> Vec<RevisionId> {
        self.by_segment
            .get(&segment)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Write `changes` into `segment` at `timestamp`.
    ///
    /// Revisions visible from any of `supersede` are marked replaced in
    /// `segment`. A removal only leaves a tombstone when something was
    /// visible to remove. Returns the ids of the new revisions.
    pub fn apply(
        &mut self,
        segment: SegmentId,
        timestamp: Timestamp,
        supersede: &[&View],
        changes: Vec<Change>,
    ) -> Vec<RevisionId> {
        let mut written = Vec::with_capacity(changes.len());

        for (object, content) in changes {
            let mut replaced: BTreeSet<RevisionId> = BTreeSet::new();
            for view in supersede {
                replaced.extend(self.visible_revisions(view, &object).iter().map(|r| r.id));
            }

            let body = match content {
                Some(doc) => RevisionBody::Document(doc),
                None if replaced.is_empty() => continue,
                None => RevisionBody::Tombstone,
            };

            for id in &replaced {
                if let Some(revision) = self.revisions.get_mut(id) {
                    revision.replace_in(segment, timestamp);
                }
            }

            written.push(self.insert(object, segment, timestamp, body));
        }

        written
    }

    fn insert(
        &mut self,
        object: ObjectId,
        segment: SegmentId,
        timestamp: Timestamp,
        body: RevisionBody,
    ) -> RevisionId {
        let id = RevisionId(self.next_id.max(1));
        self.next_id = id.0 + 1;

        self.index_revision(id, &object, segment);
        self.revisions.insert(
            id,
            Revision {
                id,
                object,
                segment,
                timestamp,
                replaced_in: BTreeMap::new(),
                body,
            },
        );
        id
    }

    /// Remove revisions written in `scan` that no view in `keep` can see.
    /// Returns the number of revisions reclaimed.
    pub fn reclaim(&mut self, scan: &BTreeSet<SegmentId>, keep: &[View]) -> usize {
        let doomed: Vec<RevisionId> = scan
            .iter()
            .filter_map(|segment| self.by_segment.get(segment))
            .flatten()
            .filter_map(|id| self.revisions.get(id))
            .filter(|r| !keep.iter().any(|view| view.sees(r)))
            .map(|r| r.id)
            .collect();

        for id in &doomed {
            self.remove(*id);
        }
        doomed.len()
    }

    fn remove(&mut self, id: RevisionId) {
        let Some(revision) = self.revisions.remove(&id) else {
            return;
        };

        if let Some(ids) = self.by_segment.get_mut(&revision.segment) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_segment.remove(&revision.segment);
            }
        }

        let orphaned = match self.by_object.get_mut(&revision.object) {
            Some(ids) => {
                ids.remove(&id);
                ids.is_empty()
            }
            None => false,
        };
        if orphaned {
            self.by_object.remove(&revision.object);
            if let Some(ids) = self.by_type.get_mut(&revision.object.doc_type) {
                ids.remove(&revision.object.id);
                if ids.is_empty() {
                    self.by_type.remove(&revision.object.doc_type);
                }
            }
        }
    }
}

/// Thread-safe holder of the revision arena.
#[derive(Debug, Default)]
pub struct RevisionIndex {
    arena: RwLock<RevisionArena>,
}

impl RevisionIndex {
    pub fn new() -> Self {
        Self {
            arena: RwLock::new(RevisionArena::new()),
        }
    }

    pub fn from_arena(mut arena: RevisionArena) -> Self {
        arena.rebuild_indexes();
        Self {
            arena: RwLock::new(arena),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, RevisionArena> {
        self.arena.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, RevisionArena> {
        self.arena.write()
    }

    pub fn len(&self) -> usize {
        self.arena.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.read().is_empty()
    }
}
