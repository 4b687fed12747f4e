//! Merge and rebase execution against the store.

use super::{three_way, Merge, MergeKind, MergeRequest, MergeStatus};
use crate::branches::BranchState;
use crate::error::{Result, StoreError};
use crate::revisions::{Change, View};
use crate::staging::{derive_commit_id, resolve_changes, Commit, StagingArea};
use crate::store::RevisionStore;
use crate::types::{ObjectId, Timestamp};
use std::collections::BTreeSet;
use tracing::{info, warn};

enum Plan {
    NoOp,
    FastForward,
    MergeCommit(MergeKind),
    Rebase,
}

impl RevisionStore {
    pub(crate) fn execute_merge(&self, request: MergeRequest<'_>) -> Result<Merge> {
        let started = Timestamp::now();
        let mut kind = if request.squash {
            MergeKind::Squash
        } else {
            MergeKind::MergeCommit
        };
        let outcome = self.run_merge(&request, &mut kind);
        self.record_merge(&request, kind, started, outcome)
    }

    pub(crate) fn execute_rebase(&self, request: MergeRequest<'_>) -> Result<Merge> {
        let started = Timestamp::now();
        let mut kind = MergeKind::Rebase;
        let outcome = self.run_rebase(&request, &mut kind);
        self.record_merge(&request, kind, started, outcome)
    }

    fn record_merge(
        &self,
        request: &MergeRequest<'_>,
        kind: MergeKind,
        started: Timestamp,
        outcome: Result<Option<Commit>>,
    ) -> Result<Merge> {
        let error = outcome.as_ref().err().map(ToString::to_string);
        let (status, commit, conflicts) = match &outcome {
            Ok(commit) => (MergeStatus::Completed, commit.clone(), Vec::new()),
            Err(StoreError::Conflict(conflicts)) => {
                (MergeStatus::Conflicts, None, conflicts.clone())
            }
            Err(_) => (MergeStatus::Failed, None, Vec::new()),
        };

        let merge = self.merges.write().record(Merge {
            id: 0,
            source: request.source.clone(),
            target: request.target.clone(),
            kind,
            status,
            commit,
            conflicts,
            error,
            started,
            finished: Timestamp::now(),
        });

        match outcome {
            Ok(_) => {
                info!(
                    source = %merge.source,
                    target = %merge.target,
                    kind = ?merge.kind,
                    "merged"
                );
                self.subscriptions.broadcast_merge(&merge);
                if self.config().sync_on_commit {
                    self.sync()?;
                }
                Ok(merge)
            }
            Err(e) => {
                warn!(
                    source = %merge.source,
                    target = %merge.target,
                    status = ?merge.status,
                    error = %e,
                    "merge failed"
                );
                Err(e)
            }
        }
    }

    fn check_pair(&self, request: &MergeRequest<'_>) -> Result<()> {
        if request.source == request.target {
            return Err(StoreError::bad_request(format!(
                "cannot merge '{}' into itself",
                request.source
            )));
        }
        if !request.exclusions.is_empty() && !request.squash {
            return Err(StoreError::bad_request(
                "exclusions are only supported by squash merges",
            ));
        }
        Ok(())
    }

    fn run_merge(&self, request: &MergeRequest<'_>, kind: &mut MergeKind) -> Result<Option<Commit>> {
        self.check_pair(request)?;
        let (source, target) = (request.source.as_str(), request.target.as_str());
        let _guard = self.locks.lock_all(&[source, target], self.lock_timeout())?;

        match self.plan_merge(source, target, request.squash)? {
            Plan::NoOp => {
                *kind = MergeKind::NoOp;
                Ok(None)
            }
            Plan::FastForward => {
                *kind = MergeKind::FastForward;
                self.fast_forward(source, target)?;
                Ok(None)
            }
            Plan::MergeCommit(merge_kind) => {
                *kind = merge_kind;
                self.merge_commit(request)
            }
            Plan::Rebase => {
                *kind = MergeKind::Rebase;
                self.rebase_locked(request, kind)
            }
        }
    }

    fn run_rebase(&self, request: &MergeRequest<'_>, kind: &mut MergeKind) -> Result<Option<Commit>> {
        self.check_pair(request)?;
        let (source, target) = (request.source.as_str(), request.target.as_str());
        let _guard = self.locks.lock_all(&[source, target], self.lock_timeout())?;
        self.rebase_locked(request, kind)
    }

    fn plan_merge(&self, source: &str, target: &str, squash: bool) -> Result<Plan> {
        let index = self.branches.read_index();
        let source_branch = index.get(source)?;
        let target_branch = index.get(target)?;

        for branch in [source_branch, target_branch] {
            if branch.deleted {
                return Err(StoreError::BranchMerge(format!(
                    "branch '{}' is deleted",
                    branch.path
                )));
            }
        }
        if index.is_stale(source)? {
            return Err(StoreError::BranchMerge(format!(
                "source '{}' is stale and must be rebased first",
                source
            )));
        }

        let target_is_child = target_branch.parent_path == source;
        if index.is_stale(target)? {
            return if target_is_child {
                Ok(Plan::Rebase)
            } else {
                Err(StoreError::BranchMerge(format!(
                    "target '{}' is stale and must be rebased first",
                    target
                )))
            };
        }

        Ok(match index.state_between(source, target)? {
            BranchState::UpToDate | BranchState::Behind => Plan::NoOp,
            BranchState::Forward if squash => Plan::MergeCommit(MergeKind::Squash),
            BranchState::Forward => Plan::FastForward,
            BranchState::Diverged if squash => Plan::MergeCommit(MergeKind::Squash),
            BranchState::Diverged if target_is_child => Plan::Rebase,
            BranchState::Diverged => Plan::MergeCommit(MergeKind::MergeCommit),
            BranchState::Stale => {
                return Err(StoreError::BranchMerge(format!(
                    "'{}' and '{}' cannot be merged",
                    source, target
                )))
            }
        })
    }

    /// Make the source's own segments visible from the target.
    fn fast_forward(&self, source: &str, target: &str) -> Result<()> {
        let mut index = self.branches.write_index();
        let own = index.own_segments(source, target)?;
        let source_head = index.get(source)?.head_timestamp;
        index.cut(source)?;

        let mut branch = index.get(target)?.clone();
        branch.segments.extend(own.iter().copied());
        branch.head_timestamp = branch.head_timestamp.max(source_head);
        if branch.parent_path == source {
            branch.base_segments.extend(own.iter().copied());
            branch.base_timestamp = branch.base_timestamp.max(source_head);
        }
        index.replace(branch);
        Ok(())
    }

    /// Write the source's changes onto the target as one commit.
    fn merge_commit(&self, request: &MergeRequest<'_>) -> Result<Option<Commit>> {
        let (source, target) = (request.source.as_str(), request.target.as_str());
        let (source_view, target_view, common, own, floor) = {
            let index = self.branches.read_index();
            let source_head = index.get(source)?.head_timestamp;
            let target_head = index.get(target)?.head_timestamp;
            (
                index.head_view(source)?,
                index.head_view(target)?,
                index.common_view(source, target)?,
                index.own_segments(source, target)?,
                source_head.max(target_head),
            )
        };

        // Merged state relative to the target.
        let changes = self.three_way_changes(
            &own,
            &request.exclusions,
            &common,
            &source_view,
            &target_view,
            request,
            false,
        )?;

        let timestamp = self.timestamp_after(floor);
        let mut staging = StagingArea::new(self);
        stage(&mut staging, changes);

        let comment = if request.comment.is_empty() {
            format!("Merge {} into {}", source, target)
        } else {
            request.comment.clone()
        };
        let header = Commit {
            id: derive_commit_id(target, timestamp, &request.author),
            branch: target.to_string(),
            author: request.author.clone(),
            comment,
            timestamp,
            details: Vec::new(),
            merge_source: Some(source.to_string()),
        };
        let commit = self.commit_locked(staging, header, &[&source_view])?;

        {
            let mut index = self.branches.write_index();
            let mut branch = index.get(target)?.clone();
            branch.merge_sources.extend(own.iter().copied());
            index.replace(branch);
            index.cut(source)?;
        }

        if commit.details.is_empty() {
            return Ok(None);
        }
        self.finish_commit(&commit)?;
        Ok(Some(commit))
    }

    /// Replay the target's own changes on top of the source and move its
    /// base to the source head.
    fn rebase_locked(&self, request: &MergeRequest<'_>, kind: &mut MergeKind) -> Result<Option<Commit>> {
        let (source, target) = (request.source.as_str(), request.target.as_str());
        let plan = {
            let index = self.branches.read_index();
            let source_branch = index.get(source)?;
            let target_branch = index.get(target)?;

            for branch in [source_branch, target_branch] {
                if branch.deleted {
                    return Err(StoreError::BranchMerge(format!(
                        "branch '{}' is deleted",
                        branch.path
                    )));
                }
            }
            if target_branch.parent_path != source {
                return Err(StoreError::bad_request(format!(
                    "'{}' is not a direct child of '{}'",
                    target, source
                )));
            }
            if index.is_stale(source)? {
                return Err(StoreError::BranchMerge(format!(
                    "source '{}' is stale and must be rebased first",
                    source
                )));
            }

            if !index.is_stale(target)? && !index.has_content_for(source, target)? {
                None
            } else {
                Some((
                    index.head_view(source)?,
                    index.head_view(target)?,
                    index.common_view(source, target)?,
                    index.own_segments(target, source)?,
                    source_branch.head_timestamp,
                    target_branch.head_timestamp,
                ))
            }
        };
        let Some((source_view, target_view, common, target_own, source_head, target_head)) = plan
        else {
            *kind = MergeKind::NoOp;
            return Ok(None);
        };

        // Merged state relative to the source, which becomes the new base.
        let replay = self.three_way_changes(
            &target_own,
            &BTreeSet::new(),
            &common,
            &source_view,
            &target_view,
            request,
            true,
        )?;
        let timestamp = self.timestamp_after(source_head.max(target_head));
        let mut staging = StagingArea::new(self);
        stage(&mut staging, replay);
        staging.bind(target, timestamp, Some(source));
        self.run_pre_commit_hooks(&mut staging)?;
        let changes = staging.into_changes();

        let (captured, segment) = {
            let mut index = self.branches.write_index();
            let captured = index.get(source)?.segments().clone();
            index.cut(source)?;
            (captured, index.allocate_segment(target, source_head))
        };

        let mut segments = captured.clone();
        segments.insert(segment);
        let view = View::new(segments.clone(), source_head);
        let (effective, details) = {
            let arena = self.revisions.read();
            resolve_changes(&arena, &view, changes)
        };

        if !effective.is_empty() {
            self.revisions
                .write()
                .apply(segment, timestamp, &[&view], effective);
            self.clock.observe(timestamp);
        }

        let invalidated = {
            let mut index = self.branches.write_index();
            let mut branch = index.get(target)?.clone();
            index.freeze_segment(branch.current_segment);
            branch.base_segments = captured;
            branch.segments = segments;
            branch.current_segment = segment;
            branch.base_timestamp = source_head;
            branch.head_timestamp = if details.is_empty() {
                source_head
            } else {
                index.advance_segment(segment, timestamp);
                timestamp
            };
            index.replace(branch);
            let stale = index.descendants(target).filter(|b| !b.deleted).count();
            stale
        };
        info!(
            source,
            target,
            replayed = details.len(),
            invalidated,
            "rebased"
        );

        if details.is_empty() {
            return Ok(None);
        }
        let commit = Commit {
            id: derive_commit_id(target, timestamp, &request.author),
            branch: target.to_string(),
            author: request.author.clone(),
            comment: if request.comment.is_empty() {
                format!("Rebase {} onto {}", target, source)
            } else {
                request.comment.clone()
            },
            timestamp,
            details,
            merge_source: Some(source.to_string()),
        };
        self.finish_commit(&commit)?;
        Ok(Some(commit))
    }

    /// Three-way merge of every object written in `segments`.
    ///
    /// Returns the merged states that differ from the target's state, or
    /// from the source's state when `onto_source` is set.
    #[allow(clippy::too_many_arguments)]
    fn three_way_changes(
        &self,
        segments: &BTreeSet<crate::types::SegmentId>,
        exclusions: &BTreeSet<ObjectId>,
        common: &View,
        source_view: &View,
        target_view: &View,
        request: &MergeRequest<'_>,
        onto_source: bool,
    ) -> Result<Vec<Change>> {
        let arena = self.revisions.read();
        let mut changes = Vec::new();
        let mut conflicts = Vec::new();

        for object in arena.objects_in(segments) {
            if exclusions.contains(&object) {
                continue;
            }
            let source_doc = arena.get(source_view, &object);
            let target_doc = arena.get(target_view, &object);
            let current = if onto_source { source_doc } else { target_doc };

            match three_way(
                &object,
                arena.get(common, &object),
                source_doc,
                target_doc,
                request.processor.as_ref(),
            ) {
                Ok(merged) if merged.as_ref() != current => changes.push((object, merged)),
                Ok(_) => {}
                Err(mut found) => conflicts.append(&mut found),
            }
        }

        if conflicts.is_empty() {
            Ok(changes)
        } else {
            Err(StoreError::Conflict(conflicts))
        }
    }
}

fn stage(staging: &mut StagingArea<'_>, changes: Vec<Change>) {
    for (object, state) in changes {
        match state {
            Some(doc) => staging.stage_change(doc),
            None => staging.stage_remove(&object.doc_type, &object.id),
        }
    }
}
