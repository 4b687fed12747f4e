//! Revisions and view-based visibility.

use super::document::Document;
use crate::types::{ObjectId, RevisionId, SegmentId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Payload of a revision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RevisionBody {
    Document(Document),
    Tombstone,
}

/// One persisted version of a logical object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Revision {
    pub id: RevisionId,
    pub object: ObjectId,
    /// Segment the revision was written in.
    pub segment: SegmentId,
    pub timestamp: Timestamp,
    /// Segments in which a newer revision superseded this one, with the
    /// time of supersession.
    pub replaced_in: BTreeMap<SegmentId, Timestamp>,
    pub body: RevisionBody,
}

impl Revision {
    pub fn document(&self) -> Option<&Document> {
        match &self.body {
            RevisionBody::Document(doc) => Some(doc),
            RevisionBody::Tombstone => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.body, RevisionBody::Tombstone)
    }

    pub(crate) fn replace_in(&mut self, segment: SegmentId, at: Timestamp) {
        self.replaced_in
            .entry(segment)
            .and_modify(|t| *t = (*t).min(at))
            .or_insert(at);
    }
}

/// A point-in-time read scope: a set of segments and a timestamp.
///
/// A revision is visible iff its segment is in the set, it was written at or
/// before `as_of`, and no segment of the set superseded it at or before
/// `as_of`. Range views additionally only admit revisions written in `only`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct View {
    segments: BTreeSet<SegmentId>,
    as_of: Timestamp,
    only: Option<BTreeSet<SegmentId>>,
}

impl View {
    pub fn new(segments: BTreeSet<SegmentId>, as_of: Timestamp) -> Self {
        Self {
            segments,
            as_of,
            only: None,
        }
    }

    pub fn restricted_to(mut self, only: BTreeSet<SegmentId>) -> Self {
        self.only = Some(only);
        self
    }

    pub fn segments(&self) -> &BTreeSet<SegmentId> {
        &self.segments
    }

    pub fn as_of(&self) -> Timestamp {
        self.as_of
    }

    pub fn is_range(&self) -> bool {
        self.only.is_some()
    }

    pub fn sees(&self, revision: &Revision) -> bool {
        if revision.timestamp > self.as_of || !self.segments.contains(&revision.segment) {
            return false;
        }
        if let Some(only) = &self.only {
            if !only.contains(&revision.segment) {
                return false;
            }
        }
        !revision
            .replaced_in
            .iter()
            .any(|(segment, at)| *at <= self.as_of && self.segments.contains(segment))
    }
}
