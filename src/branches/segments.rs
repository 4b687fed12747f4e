//! Append-only log of branch segments.
//!
//! A segment is a timestamp-bounded slice of one branch's history. Creating
//! a branch freezes the parent's current segment and starts fresh ones for
//! both sides, so later commits on either side never leak into the other.

use crate::types::{SegmentId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    /// Path of the branch that writes into this segment.
    pub branch: String,
    pub start: Timestamp,
    /// Timestamp of the last commit written into the segment.
    pub end: Timestamp,
    pub frozen: bool,
}

impl Segment {
    pub fn has_commits(&self) -> bool {
        self.end > self.start
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SegmentLog {
    segments: BTreeMap<SegmentId, Segment>,
    next_id: u64,
}

impl SegmentLog {
    pub fn allocate(&mut self, branch: &str, start: Timestamp) -> SegmentId {
        let id = SegmentId(self.next_id);
        self.next_id += 1;
        self.segments.insert(
            id,
            Segment {
                id,
                branch: branch.to_string(),
                start,
                end: start,
                frozen: false,
            },
        );
        id
    }

    pub fn get(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(&id)
    }

    pub fn freeze(&mut self, id: SegmentId) {
        if let Some(segment) = self.segments.get_mut(&id) {
            segment.frozen = true;
        }
    }

    /// Record a commit at `at` in the segment.
    pub fn advance(&mut self, id: SegmentId, at: Timestamp) {
        if let Some(segment) = self.segments.get_mut(&id) {
            segment.end = segment.end.max(at);
        }
    }

    /// Segments written by the branch at `path`, oldest first.
    pub fn owned_by<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Segment> + 'a {
        self.segments.values().filter(move |s| s.branch == path)
    }

    /// `(earliest start, latest end)` over the commit-bearing segments among
    /// `ids`, or `None` when none of them carries commits.
    pub fn span<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a SegmentId>,
    ) -> Option<(Timestamp, Timestamp)> {
        ids.into_iter()
            .filter_map(|id| self.segments.get(id))
            .filter(|s| s.has_commits())
            .fold(None, |span, s| {
                Some(match span {
                    None => (s.start, s.end),
                    Some((start, end)) => (start.min(s.start), end.max(s.end)),
                })
            })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
