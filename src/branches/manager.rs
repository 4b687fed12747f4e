//! Branch registry and state bookkeeping.

use super::branch::{
    validate_metadata, validate_name, BranchRef, BranchState, Metadata, RevisionBranch, MAIN_PATH,
    SEPARATOR,
};
use super::segments::SegmentLog;
use crate::error::{Result, StoreError};
use crate::revisions::{Hits, Query, View};
use crate::types::{SegmentId, Timestamp};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// All branches plus the segment log they reference.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BranchIndex {
    branches: BTreeMap<String, RevisionBranch>,
    segments: SegmentLog,
}

impl BranchIndex {
    /// A fresh index containing only MAIN.
    pub fn new(created: Timestamp) -> Self {
        let mut index = Self::default();
        let segment = index.segments.allocate(MAIN_PATH, created);

        index.branches.insert(
            MAIN_PATH.to_string(),
            RevisionBranch {
                path: MAIN_PATH.to_string(),
                parent_path: String::new(),
                name: MAIN_PATH.to_string(),
                base_timestamp: created,
                head_timestamp: created,
                deleted: false,
                metadata: Metadata::new(),
                segments: BTreeSet::from([segment]),
                base_segments: BTreeSet::new(),
                current_segment: segment,
                merge_sources: BTreeSet::new(),
            },
        );
        index
    }

    pub fn get(&self, path: &str) -> Result<&RevisionBranch> {
        self.branches
            .get(path)
            .ok_or_else(|| StoreError::branch_not_found(path))
    }

    fn get_mut(&mut self, path: &str) -> Result<&mut RevisionBranch> {
        self.branches
            .get_mut(path)
            .ok_or_else(|| StoreError::branch_not_found(path))
    }

    pub fn branches(&self) -> impl Iterator<Item = &RevisionBranch> {
        self.branches.values()
    }

    pub fn segments(&self) -> &SegmentLog {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Freeze the branch's current segment and continue in a fresh one.
    pub fn cut(&mut self, path: &str) -> Result<SegmentId> {
        let (head, current) = {
            let branch = self.get(path)?;
            (branch.head_timestamp, branch.current_segment)
        };

        self.segments.freeze(current);
        let fresh = self.segments.allocate(path, head);

        let branch = self.get_mut(path)?;
        branch.segments.insert(fresh);
        branch.current_segment = fresh;
        Ok(fresh)
    }

    /// Allocate a segment for `path` without making it current.
    pub(crate) fn allocate_segment(&mut self, path: &str, start: Timestamp) -> SegmentId {
        self.segments.allocate(path, start)
    }

    pub(crate) fn advance_segment(&mut self, segment: SegmentId, at: Timestamp) {
        self.segments.advance(segment, at);
    }

    pub(crate) fn freeze_segment(&mut self, segment: SegmentId) {
        self.segments.freeze(segment);
    }

    pub(crate) fn replace(&mut self, branch: RevisionBranch) {
        self.branches.insert(branch.path.clone(), branch);
    }

    pub fn create(
        &mut self,
        parent_path: &str,
        name: &str,
        metadata: Metadata,
    ) -> Result<RevisionBranch> {
        validate_name(name)?;
        validate_metadata(&metadata)?;

        let parent = self.get(parent_path)?;
        if parent.deleted {
            return Err(StoreError::bad_request(format!(
                "parent branch '{}' is deleted",
                parent_path
            )));
        }

        let path = parent.child_path(name);
        if matches!(self.branches.get(&path), Some(existing) if !existing.deleted) {
            return Err(StoreError::bad_request(format!(
                "branch '{}' already exists",
                path
            )));
        }

        let base_segments = parent.segments.clone();
        let base = parent.head_timestamp;

        self.cut(parent_path)?;
        let segment = self.segments.allocate(&path, base);

        let mut segments = base_segments.clone();
        segments.insert(segment);

        let branch = RevisionBranch {
            path: path.clone(),
            parent_path: parent_path.to_string(),
            name: name.to_string(),
            base_timestamp: base,
            head_timestamp: base,
            deleted: false,
            metadata,
            segments,
            base_segments,
            current_segment: segment,
            merge_sources: BTreeSet::new(),
        };
        self.branches.insert(path, branch.clone());
        Ok(branch)
    }

    /// Soft-delete the branch and its whole subtree. Returns affected paths.
    pub fn delete(&mut self, path: &str) -> Result<Vec<String>> {
        if path == MAIN_PATH {
            return Err(StoreError::bad_request("MAIN cannot be deleted"));
        }
        self.get(path)?;

        let mut affected = vec![path.to_string()];
        affected.extend(self.descendants(path).map(|b| b.path.clone()));

        for p in &affected {
            if let Some(branch) = self.branches.get_mut(p) {
                branch.deleted = true;
            }
        }
        Ok(affected)
    }

    pub fn children<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a RevisionBranch> + 'a {
        self.branches.values().filter(move |b| b.parent_path == path)
    }

    /// All branches below `path`, at any depth.
    pub fn descendants<'a>(
        &'a self,
        path: &'a str,
    ) -> impl Iterator<Item = &'a RevisionBranch> + 'a {
        let prefix = format!("{}{}", path, SEPARATOR);
        self.branches
            .values()
            .filter(move |b| b.path.starts_with(&prefix))
    }

    pub fn update_metadata(&mut self, path: &str, metadata: Metadata) -> Result<RevisionBranch> {
        validate_metadata(&metadata)?;
        let branch = self.get_mut(path)?;
        branch.metadata = metadata;
        Ok(branch.clone())
    }

    /// Advance the head of `path` to `timestamp`.
    pub fn handle_commit(&mut self, path: &str, timestamp: Timestamp) -> Result<()> {
        let segment = {
            let branch = self.get_mut(path)?;
            if branch.deleted {
                return Err(StoreError::bad_request(format!(
                    "branch '{}' is deleted",
                    path
                )));
            }
            if timestamp <= branch.head_timestamp {
                return Err(StoreError::bad_request(format!(
                    "commit timestamp {} on '{}' must be after head {}",
                    timestamp, path, branch.head_timestamp
                )));
            }
            branch.head_timestamp = timestamp;
            branch.current_segment
        };
        self.segments.advance(segment, timestamp);
        Ok(())
    }

    // --- State ---

    /// Span of the commits on `branch` that `other` does not have.
    /// `(head, head)` when there are none.
    fn own_span(&self, branch: &RevisionBranch, other: &RevisionBranch) -> (Timestamp, Timestamp) {
        let own = branch
            .segments
            .iter()
            .filter(|s| self.is_own(**s, other));
        self.segments
            .span(own)
            .unwrap_or((branch.head_timestamp, branch.head_timestamp))
    }

    /// A segment is own relative to `other` unless `other` sees it,
    /// squash-merged it, or replayed it.
    fn is_own(&self, id: SegmentId, other: &RevisionBranch) -> bool {
        !other.segments.contains(&id)
            && !other.merge_sources.contains(&id)
            && !self.replayed_in(id, other)
    }

    /// True when `id` was written by `other` or one of its ancestors and
    /// `other` sees a later segment of the same writer. That only happens
    /// after a rebase, which replays the older segments into a fresh one.
    fn replayed_in(&self, id: SegmentId, other: &RevisionBranch) -> bool {
        let Some(segment) = self.segments.get(id) else {
            return false;
        };
        let writer = segment.branch.as_str();
        let in_lineage = other.path == writer
            || other
                .path
                .strip_prefix(writer)
                .map_or(false, |rest| rest.starts_with(SEPARATOR));
        in_lineage
            && other.segments.range(id..).any(|later| {
                *later != id
                    && self
                        .segments
                        .get(*later)
                        .map_or(false, |s| s.branch == writer)
            })
    }

    /// Pairwise state of `path` relative to `other`.
    pub fn state_between(&self, path: &str, other: &str) -> Result<BranchState> {
        let branch = self.get(path)?;
        let other = self.get(other)?;
        Ok(BranchState::classify(
            self.own_span(branch, other),
            self.own_span(other, branch),
        ))
    }

    /// True when the branch's base is no longer on its parent's lineage, or
    /// any ancestor is in that situation.
    pub fn is_stale(&self, path: &str) -> Result<bool> {
        let branch = self.get(path)?;
        if branch.is_main() {
            return Ok(false);
        }
        let parent = self.get(&branch.parent_path)?;
        if !branch.base_segments.is_subset(&parent.segments) {
            return Ok(true);
        }
        self.is_stale(&parent.path)
    }

    /// State of `path` relative to its current parent.
    pub fn state(&self, path: &str) -> Result<BranchState> {
        let branch = self.get(path)?;
        if branch.is_main() {
            return Ok(BranchState::UpToDate);
        }
        if self.is_stale(path)? {
            return Ok(BranchState::Stale);
        }
        self.state_between(path, &branch.parent_path)
    }

    /// True if `path` has commits in segments `other` cannot see.
    pub fn has_content_for(&self, path: &str, other: &str) -> Result<bool> {
        let branch = self.get(path)?;
        let other = self.get(other)?;
        let (base, head) = self.own_span(branch, other);
        Ok(head > base)
    }

    /// Segments of `path` whose content `other` does not have.
    pub fn own_segments(&self, path: &str, other: &str) -> Result<BTreeSet<SegmentId>> {
        let branch = self.get(path)?;
        let other = self.get(other)?;
        Ok(branch
            .segments
            .iter()
            .copied()
            .filter(|s| self.is_own(*s, other))
            .collect())
    }

    // --- Views ---

    pub fn head_view(&self, path: &str) -> Result<View> {
        let branch = self.get(path)?;
        Ok(View::new(branch.segments.clone(), branch.head_timestamp))
    }

    pub fn base_view(&self, path: &str) -> Result<View> {
        let branch = self.get(path)?;
        if branch.is_main() {
            return Err(StoreError::bad_request("MAIN does not have a base"));
        }
        Ok(View::new(branch.base_segments.clone(), branch.base_timestamp))
    }

    /// What `compare` wrote since it diverged from `base`.
    pub fn range_view(&self, base: &str, compare: &str) -> Result<View> {
        let base = self.get(base)?;
        let compare = self.get(compare)?;
        let only = compare
            .segments
            .difference(&base.segments)
            .copied()
            .collect();
        Ok(View::new(compare.segments.clone(), compare.head_timestamp).restricted_to(only))
    }

    pub fn view(&self, reference: &BranchRef) -> Result<View> {
        match reference {
            BranchRef::Head(path) => self.head_view(path),
            BranchRef::Base(path) => self.base_view(path),
            BranchRef::Range { base, compare } => self.range_view(base, compare),
        }
    }

    /// The shared history of two branches: segments both see, plus segments
    /// one of them squash-merged from the other.
    ///
    /// Shared segments are always frozen, so the view is not time-bounded.
    pub fn common_view(&self, a: &str, b: &str) -> Result<View> {
        let a = self.get(a)?;
        let b = self.get(b)?;

        let mut segments: BTreeSet<SegmentId> =
            a.segments.intersection(&b.segments).copied().collect();
        segments.extend(a.segments.intersection(&b.merge_sources));
        segments.extend(b.segments.intersection(&a.merge_sources));

        Ok(View::new(segments, Timestamp::MAX))
    }

    /// Views whose revisions must survive a purge: every branch head and
    /// base, deleted branches included, and each branch's shared history
    /// with its parent.
    pub fn protected_views(&self) -> Vec<View> {
        let mut views = Vec::new();
        for branch in self.branches.values() {
            views.push(View::new(branch.segments.clone(), branch.head_timestamp));
            if !branch.is_main() {
                views.push(View::new(
                    branch.base_segments.clone(),
                    branch.base_timestamp,
                ));
                if let Ok(common) = self.common_view(&branch.path, &branch.parent_path) {
                    views.push(common);
                }
            }
        }
        views
    }
}

/// Thread-safe registry of branches.
pub struct BranchManager {
    index: RwLock<BranchIndex>,
}

impl BranchManager {
    /// Create a registry containing only MAIN.
    pub fn new(created: Timestamp) -> Self {
        Self {
            index: RwLock::new(BranchIndex::new(created)),
        }
    }

    pub fn from_index(index: BranchIndex) -> Self {
        Self {
            index: RwLock::new(index),
        }
    }

    pub(crate) fn read_index(&self) -> RwLockReadGuard<'_, BranchIndex> {
        self.index.read()
    }

    pub(crate) fn write_index(&self) -> RwLockWriteGuard<'_, BranchIndex> {
        self.index.write()
    }

    pub fn get_branch(&self, path: &str) -> Result<RevisionBranch> {
        self.index.read().get(path).cloned()
    }

    pub fn create_branch(
        &self,
        parent_path: &str,
        name: &str,
        metadata: Metadata,
    ) -> Result<RevisionBranch> {
        self.index.write().create(parent_path, name, metadata)
    }

    pub fn delete(&self, path: &str) -> Result<Vec<String>> {
        self.index.write().delete(path)
    }

    pub fn children(&self, path: &str) -> Result<Vec<RevisionBranch>> {
        let index = self.index.read();
        index.get(path)?;
        Ok(index.children(path).cloned().collect())
    }

    pub fn descendants(&self, path: &str) -> Result<Vec<RevisionBranch>> {
        let index = self.index.read();
        index.get(path)?;
        Ok(index.descendants(path).cloned().collect())
    }

    pub fn list_branches(&self) -> Vec<RevisionBranch> {
        self.index.read().branches().cloned().collect()
    }

    pub fn branch_count(&self) -> usize {
        self.index.read().len()
    }

    /// Evaluate `query` over the serialized branch records, matching ids
    /// against branch paths.
    pub fn search(&self, query: &Query) -> Result<Hits<RevisionBranch>> {
        let index = self.index.read();
        let items = index
            .branches()
            .map(|b| -> Result<(String, serde_json::Value, RevisionBranch)> {
                Ok((b.path.clone(), serde_json::to_value(b)?, b.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(query.execute(items))
    }

    pub fn update_metadata(&self, path: &str, metadata: Metadata) -> Result<RevisionBranch> {
        self.index.write().update_metadata(path, metadata)
    }

    pub fn handle_commit(&self, path: &str, timestamp: Timestamp) -> Result<()> {
        self.index.write().handle_commit(path, timestamp)
    }

    pub fn branch_state(&self, path: &str) -> Result<BranchState> {
        self.index.read().state(path)
    }

    pub fn branch_state_between(&self, path: &str, other: &str) -> Result<BranchState> {
        self.index.read().state_between(path, other)
    }

    pub fn view(&self, reference: &BranchRef) -> Result<View> {
        self.index.read().view(reference)
    }

    pub fn segment_count(&self) -> usize {
        self.index.read().segments().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> BranchIndex {
        BranchIndex::new(Timestamp(1))
    }

    #[test]
    fn test_new_has_main_branch() {
        let index = index();
        let main = index.get(MAIN_PATH).unwrap();
        assert!(main.is_main());
        assert!(main.parent_path.is_empty());
        assert_eq!(main.base_timestamp, main.head_timestamp);
        assert_eq!(index.state(MAIN_PATH).unwrap(), BranchState::UpToDate);
    }

    #[test]
    fn test_create_branch_copies_parent_head() {
        let mut index = index();
        index.handle_commit(MAIN_PATH, Timestamp(10)).unwrap();

        let branch = index.create(MAIN_PATH, "a", Metadata::new()).unwrap();
        assert_eq!(branch.path, "MAIN/a");
        assert_eq!(branch.base_timestamp, Timestamp(10));
        assert_eq!(branch.head_timestamp, Timestamp(10));
        assert_eq!(index.state("MAIN/a").unwrap(), BranchState::UpToDate);

        // The parent continues in a fresh segment the child cannot see.
        let main = index.get(MAIN_PATH).unwrap();
        assert!(!branch.segments.contains(&main.current_segment));
    }

    #[test]
    fn test_create_branch_validation() {
        let mut index = index();
        index.create(MAIN_PATH, "a", Metadata::new()).unwrap();

        assert!(matches!(
            index.create(MAIN_PATH, "a", Metadata::new()),
            Err(StoreError::BadRequest(_))
        ));
        assert!(matches!(
            index.create("MAIN/missing", "b", Metadata::new()),
            Err(StoreError::NotFound { .. })
        ));

        index.delete("MAIN/a").unwrap();
        assert!(matches!(
            index.create("MAIN/a", "b", Metadata::new()),
            Err(StoreError::BadRequest(_))
        ));

        // A deleted branch can be re-created at the same path.
        let reopened = index.create(MAIN_PATH, "a", Metadata::new()).unwrap();
        assert!(!reopened.deleted);
    }

    #[test]
    fn test_state_transitions() {
        let mut index = index();
        index.create(MAIN_PATH, "a", Metadata::new()).unwrap();

        index.handle_commit("MAIN/a", Timestamp(5)).unwrap();
        assert_eq!(index.state("MAIN/a").unwrap(), BranchState::Forward);

        index.handle_commit(MAIN_PATH, Timestamp(6)).unwrap();
        assert_eq!(index.state("MAIN/a").unwrap(), BranchState::Diverged);
        assert_eq!(
            index.state_between(MAIN_PATH, "MAIN/a").unwrap(),
            BranchState::Diverged
        );

        index.create(MAIN_PATH, "b", Metadata::new()).unwrap();
        index.handle_commit(MAIN_PATH, Timestamp(7)).unwrap();
        assert_eq!(index.state("MAIN/b").unwrap(), BranchState::Behind);
        assert_eq!(
            index.state_between(MAIN_PATH, "MAIN/b").unwrap(),
            BranchState::Forward
        );
    }

    #[test]
    fn test_delete_cascades_to_descendants() {
        let mut index = index();
        index.create(MAIN_PATH, "a", Metadata::new()).unwrap();
        index.create("MAIN/a", "b", Metadata::new()).unwrap();
        index.create("MAIN/a/b", "c", Metadata::new()).unwrap();

        let affected = index.delete("MAIN/a").unwrap();
        assert_eq!(affected.len(), 3);
        assert!(index.get("MAIN/a/b/c").unwrap().deleted);
        assert!(!index.get(MAIN_PATH).unwrap().deleted);

        assert!(matches!(index.delete(MAIN_PATH), Err(StoreError::BadRequest(_))));
    }

    #[test]
    fn test_handle_commit_requires_later_timestamp() {
        let mut index = index();
        index.handle_commit(MAIN_PATH, Timestamp(5)).unwrap();
        assert!(matches!(
            index.handle_commit(MAIN_PATH, Timestamp(5)),
            Err(StoreError::BadRequest(_))
        ));
    }

    #[test]
    fn test_base_view_of_main_is_rejected() {
        let index = index();
        assert!(matches!(index.base_view(MAIN_PATH), Err(StoreError::BadRequest(_))));
    }

    #[test]
    fn test_children_and_descendants() {
        let mut index = index();
        index.create(MAIN_PATH, "a", Metadata::new()).unwrap();
        index.create(MAIN_PATH, "ab", Metadata::new()).unwrap();
        index.create("MAIN/a", "b", Metadata::new()).unwrap();

        let children: Vec<_> = index.children(MAIN_PATH).map(|b| b.path.clone()).collect();
        assert_eq!(children, vec!["MAIN/a", "MAIN/ab"]);

        // "MAIN/ab" shares a prefix with "MAIN/a" but is not below it.
        let below: Vec<_> = index.descendants("MAIN/a").map(|b| b.path.clone()).collect();
        assert_eq!(below, vec!["MAIN/a/b"]);
    }

    #[test]
    fn test_search_branches() {
        let manager = BranchManager::new(Timestamp(1));
        let mut metadata = Metadata::new();
        metadata.insert("owner".into(), serde_json::json!("ann"));
        manager.create_branch(MAIN_PATH, "a", metadata).unwrap();
        manager.create_branch(MAIN_PATH, "b", Metadata::new()).unwrap();

        let hits = manager
            .search(&Query::all().filter(crate::revisions::Expr::exact("metadata.owner", "ann")))
            .unwrap();
        assert_eq!(hits.total, 1);
        assert_eq!(hits.items[0].path, "MAIN/a");

        let hits = manager
            .search(&Query::all().filter(crate::revisions::Expr::exact("parent_path", MAIN_PATH)))
            .unwrap();
        assert_eq!(hits.total, 2);
    }
}
