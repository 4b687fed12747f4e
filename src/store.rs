//! The revision store facade tying all components together.

use crate::branches::{BranchManager, BranchRef, BranchState, Metadata, RevisionBranch};
use crate::compare::RevisionCompare;
use crate::error::{Result, StoreError};
use crate::history::{purge_segments, CommitLog, PurgeMode, PurgeReport};
use crate::locks::{PathLocks, Pins};
use crate::merge::{ConflictProcessor, Merge, MergeLog, MergeRequest};
use crate::persist::{self, Snapshot, SnapshotRef};
use crate::revisions::{Hits, Query, RevisionIndex, RevisionSearcher, RevisionWriter, View};
use crate::revisions::Change;
use crate::staging::{derive_commit_id, resolve_changes, Commit, CommitDetail, Hooks, StagingArea};
use crate::subscriptions::{
    SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager,
    DEFAULT_PAYLOAD_LIMIT,
};
use crate::types::{ObjectId, StoreStats, SystemClock, Timestamp, TimestampProvider};
use parking_lot::RwLock;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Directory holding the store. `None` keeps everything in memory.
    pub path: Option<PathBuf>,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// How long an operation waits for a branch lock.
    pub lock_timeout: Duration,

    /// Write a snapshot after every commit, merge and purge.
    pub sync_on_commit: bool,

    /// Commit details larger than this (JSON bytes) are left out of events.
    pub subscription_payload_limit: usize,
}

impl StoreConfig {
    /// Default configuration for a store in `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
            lock_timeout: Duration::from_secs(60),
            sync_on_commit: false,
            subscription_payload_limit: DEFAULT_PAYLOAD_LIMIT,
        }
    }
}

/// A branch-aware, revision-controlled document store.
///
/// - Branches form a tree rooted at `MAIN`; each sees the revisions of its
///   own segments as of its head timestamp.
/// - Writes go through [`RevisionStore::write`] or the staging pipeline
///   ([`RevisionStore::prepare_commit`]).
/// - Branches are combined with [`RevisionStore::merge`] and
///   [`RevisionStore::rebase`], compared with [`RevisionStore::compare`]
///   and cleaned up with [`RevisionStore::purge`].
pub struct RevisionStore {
    config: StoreConfig,

    /// Lock file for exclusive access, `None` in memory.
    _lock_file: Option<File>,

    pub(crate) clock: Arc<dyn TimestampProvider>,
    pub(crate) branches: BranchManager,
    pub(crate) revisions: RevisionIndex,
    pub(crate) commits: RwLock<CommitLog>,
    pub(crate) merges: RwLock<MergeLog>,
    pub(crate) hooks: Hooks,
    pub(crate) locks: PathLocks,
    pub(crate) pins: Pins,
    pub(crate) subscriptions: SubscriptionManager,
}

impl RevisionStore {
    /// A store without persistence, driven by the system clock.
    pub fn in_memory() -> Self {
        Self::in_memory_with_clock(Arc::new(SystemClock::new()))
    }

    pub fn in_memory_with_clock(clock: Arc<dyn TimestampProvider>) -> Self {
        Self::assemble(StoreConfig::default(), None, clock, None)
    }

    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Like [`RevisionStore::open_or_create`] with an explicit clock.
    pub fn with_clock(config: StoreConfig, clock: Arc<dyn TimestampProvider>) -> Result<Self> {
        match &config.path {
            None => Ok(Self::assemble(config, None, clock, None)),
            Some(dir) if dir.join(persist::MANIFEST_FILE).exists() => {
                Self::open_with(config, clock)
            }
            Some(_) if config.create_if_missing => Self::create_with(config, clock),
            Some(_) => Err(StoreError::NotInitialized),
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        Self::create_with(config, Arc::new(SystemClock::new()))
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::open_with(config, Arc::new(SystemClock::new()))
    }

    fn create_with(config: StoreConfig, clock: Arc<dyn TimestampProvider>) -> Result<Self> {
        let Some(dir) = config.path.clone() else {
            return Ok(Self::assemble(config, None, clock, None));
        };

        fs::create_dir_all(&dir)?;
        persist::write_manifest(&dir)?;
        let lock_file = persist::acquire_lock(&dir)?;

        let store = Self::assemble(config, Some(lock_file), clock, None);
        store.sync()?;
        info!(path = %dir.display(), "created store");
        Ok(store)
    }

    fn open_with(config: StoreConfig, clock: Arc<dyn TimestampProvider>) -> Result<Self> {
        let Some(dir) = config.path.clone() else {
            return Err(StoreError::NotInitialized);
        };

        persist::verify_manifest(&dir)?;
        let lock_file = persist::acquire_lock(&dir)?;
        let snapshot = Snapshot::read_from(&dir)?;

        let store = Self::assemble(config, Some(lock_file), clock, snapshot);
        let latest = store
            .branches
            .list_branches()
            .iter()
            .map(|b| b.head_timestamp)
            .max()
            .unwrap_or_default();
        store.clock.observe(latest);

        info!(
            path = %dir.display(),
            branches = store.branches.branch_count(),
            revisions = store.revisions.len(),
            "opened store"
        );
        Ok(store)
    }

    fn assemble(
        config: StoreConfig,
        lock_file: Option<File>,
        clock: Arc<dyn TimestampProvider>,
        snapshot: Option<Snapshot>,
    ) -> Self {
        let (branches, revisions, commits, merges) = match snapshot {
            Some(s) => (
                BranchManager::from_index(s.branches),
                RevisionIndex::from_arena(s.revisions),
                s.commits,
                s.merges,
            ),
            None => (
                BranchManager::new(clock.timestamp()),
                RevisionIndex::new(),
                CommitLog::new(),
                MergeLog::new(),
            ),
        };
        let subscriptions = SubscriptionManager::with_payload_limit(config.subscription_payload_limit);

        Self {
            config,
            _lock_file: lock_file,
            clock,
            branches,
            revisions,
            commits: RwLock::new(commits),
            merges: RwLock::new(merges),
            hooks: Hooks::new(),
            locks: PathLocks::new(),
            pins: Pins::new(),
            subscriptions,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.config.path.as_deref()
    }

    /// A fresh timestamp from the store clock.
    pub fn current_time(&self) -> Timestamp {
        self.clock.timestamp()
    }

    /// A clock timestamp strictly after `floor`.
    pub(crate) fn timestamp_after(&self, floor: Timestamp) -> Timestamp {
        self.clock.observe(floor);
        self.clock.timestamp()
    }

    pub(crate) fn lock_timeout(&self) -> Duration {
        self.config.lock_timeout
    }

    // --- Reads and writes ---

    /// Run `f` against a searcher over `reference` (`path`, `path^` or a
    /// revision range). Purge keeps what the searcher sees until `f` returns.
    pub fn read<T, F>(&self, reference: &str, f: F) -> Result<T>
    where
        F: FnOnce(&RevisionSearcher<'_>) -> Result<T>,
    {
        let reference = BranchRef::parse(reference)?;
        let (view, _pin) = {
            let index = self.branches.read_index();
            let view = index.view(&reference)?;
            let pin = self.pins.pin(view.clone());
            (view, pin)
        };

        let searcher = RevisionSearcher::new(&self.revisions, reference.to_string(), view);
        f(&searcher)
    }

    /// Apply the puts and removes `f` makes to the head of `path` at
    /// `timestamp`. Nothing is applied if `f` fails.
    ///
    /// Raw writes advance the head but do not produce a [`Commit`].
    pub fn write<T, F>(&self, path: &str, timestamp: Timestamp, f: F) -> Result<T>
    where
        F: FnOnce(&mut RevisionWriter<'_>) -> Result<T>,
    {
        let reference = BranchRef::parse(path)?;
        if !reference.is_head() {
            return Err(StoreError::bad_request(format!(
                "cannot write to '{}'",
                reference
            )));
        }

        let _guard = self.locks.lock(path, self.lock_timeout())?;
        let view = self.check_commit_target(path, timestamp)?;

        let searcher = RevisionSearcher::new(&self.revisions, path, view);
        let mut writer = RevisionWriter::new(searcher, timestamp);
        let value = f(&mut writer)?;

        let details = self.apply_changes(path, timestamp, writer.into_changes(), &[])?;
        debug!(branch = path, timestamp = %timestamp, changes = details.len(), "applied write");
        Ok(value)
    }

    /// Start collecting changes for a commit.
    pub fn prepare_commit(&self) -> StagingArea<'_> {
        StagingArea::new(self)
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// The head view of `path` if it accepts a commit at `timestamp`.
    fn check_commit_target(&self, path: &str, timestamp: Timestamp) -> Result<View> {
        let index = self.branches.read_index();
        let branch = index.get(path)?;
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
        index.head_view(path)
    }

    pub(crate) fn commit_staged(
        &self,
        staging: StagingArea<'_>,
        commit_id: &str,
        branch: &str,
        timestamp: Timestamp,
        author: &str,
        comment: &str,
    ) -> Result<Commit> {
        let reference = BranchRef::parse(branch)?;
        if !reference.is_head() {
            return Err(StoreError::bad_request(format!(
                "cannot commit to '{}'",
                reference
            )));
        }

        let _guard = self.locks.lock(branch, self.lock_timeout())?;
        self.check_commit_target(branch, timestamp)?;

        let id = if commit_id.is_empty() {
            derive_commit_id(branch, timestamp, author)
        } else {
            commit_id.to_string()
        };
        if self.commits.read().contains(&id) {
            return Err(StoreError::bad_request(format!(
                "commit '{}' already exists",
                id
            )));
        }

        let header = Commit {
            id,
            branch: branch.to_string(),
            author: author.to_string(),
            comment: comment.to_string(),
            timestamp,
            details: Vec::new(),
            merge_source: None,
        };
        let commit = self.commit_locked(staging, header, &[])?;
        if commit.details.is_empty() {
            // Logged without moving the head.
            debug!(commit = %commit.id, branch = %commit.branch, "empty commit");
            self.clock.observe(timestamp);
        }
        self.finish_commit(&commit)?;
        Ok(commit)
    }

    /// Pipeline steps shared by commits and merge commits: pre-commit hooks
    /// and the atomic apply. The caller holds the branch lock, has validated
    /// the target and finishes the commit.
    ///
    /// When every change turns out to be a no-op the branch is left untouched
    /// and the commit comes back without details.
    pub(crate) fn commit_locked(
        &self,
        mut staging: StagingArea<'_>,
        mut commit: Commit,
        supersede: &[&View],
    ) -> Result<Commit> {
        staging.bind(&commit.branch, commit.timestamp, commit.merge_source.as_deref());
        self.run_pre_commit_hooks(&mut staging)?;

        commit.details =
            self.apply_changes(&commit.branch, commit.timestamp, staging.into_changes(), supersede)?;
        Ok(commit)
    }

    pub(crate) fn run_pre_commit_hooks(&self, staging: &mut StagingArea<'_>) -> Result<()> {
        for hook in self.hooks.pre_commit_hooks() {
            hook.run(staging)?;
        }
        Ok(())
    }

    /// Resolve `changes` against the head of `path`, write the effective ones
    /// into its current segment and advance the head.
    fn apply_changes(
        &self,
        path: &str,
        timestamp: Timestamp,
        changes: Vec<Change>,
        supersede: &[&View],
    ) -> Result<Vec<CommitDetail>> {
        let (view, segment) = {
            let index = self.branches.read_index();
            (index.head_view(path)?, index.get(path)?.current_segment())
        };

        let (effective, details) = {
            let arena = self.revisions.read();
            resolve_changes(&arena, &view, changes)
        };
        if effective.is_empty() {
            return Ok(details);
        }

        let mut views = vec![&view];
        views.extend_from_slice(supersede);
        self.revisions
            .write()
            .apply(segment, timestamp, &views, effective);

        self.branches.handle_commit(path, timestamp)?;
        self.clock.observe(timestamp);
        Ok(details)
    }

    /// Log a durable commit, run post-commit hooks and notify subscribers.
    pub(crate) fn finish_commit(&self, commit: &Commit) -> Result<()> {
        self.commits.write().append(commit.clone());
        info!(
            commit = %commit.id,
            branch = %commit.branch,
            timestamp = %commit.timestamp,
            changes = commit.details.len(),
            "committed"
        );

        for hook in self.hooks.post_commit_hooks() {
            if let Err(e) = hook.run(commit) {
                warn!(commit = %commit.id, error = %e, "post-commit hook failed");
            }
        }

        self.subscriptions.broadcast_commit(commit);
        if self.config.sync_on_commit {
            self.sync()?;
        }
        Ok(())
    }

    // --- Compare, history, purge ---

    /// What `compare` changed relative to `base`. Both must be head or base
    /// references.
    pub fn compare(&self, base: &str, compare: &str) -> Result<RevisionCompare> {
        let base_ref = BranchRef::parse(base)?;
        let compare_ref = BranchRef::parse(compare)?;
        for reference in [&base_ref, &compare_ref] {
            if matches!(reference, BranchRef::Range { .. }) {
                return Err(StoreError::bad_request(format!(
                    "cannot compare revision range '{}'",
                    reference
                )));
            }
        }

        let (base_view, compare_view) = {
            let index = self.branches.read_index();
            (index.view(&base_ref)?, index.view(&compare_ref)?)
        };

        let arena = self.revisions.read();
        Ok(RevisionCompare::compute(
            &arena,
            base,
            &base_view,
            compare,
            &compare_view,
        ))
    }

    /// Commits touching `object`, most recent first.
    pub fn history(&self, object: &ObjectId) -> Vec<Commit> {
        self.commits.read().history(object)
    }

    pub fn get_commit(&self, id: &str) -> Result<Commit> {
        self.commits
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::commit_not_found(id))
    }

    /// Commits made on `branch`, most recent first.
    pub fn commits_on(&self, branch: &str) -> Vec<Commit> {
        self.commits.read().commits_on(branch)
    }

    /// Reclaim revisions in the branch's own segments that no branch view,
    /// shared history or in-flight read can see anymore.
    pub fn purge(&self, path: &str, mode: PurgeMode) -> Result<PurgeReport> {
        let _guard = self.locks.lock(path, self.lock_timeout())?;

        let report = {
            let index = self.branches.read_index();
            let scan = purge_segments(&index, path, mode)?;
            let mut keep = index.protected_views();
            keep.extend(self.pins.views());

            let removed = self.revisions.write().reclaim(&scan, &keep);
            PurgeReport {
                branch: path.to_string(),
                mode,
                segments_scanned: scan.len(),
                revisions_removed: removed,
            }
        };

        info!(
            branch = path,
            mode = ?mode,
            removed = report.revisions_removed,
            "purged"
        );
        self.subscriptions.broadcast_purge(&report);
        if self.config.sync_on_commit {
            self.sync()?;
        }
        Ok(report)
    }

    // --- Branches ---

    /// Create `parent/name` and return its path.
    pub fn create_branch(&self, parent: &str, name: &str, metadata: Metadata) -> Result<String> {
        let _guard = self.locks.lock(parent, self.lock_timeout())?;
        let branch = self.branches.create_branch(parent, name, metadata)?;

        info!(branch = %branch.path, base = %branch.base_timestamp, "created branch");
        self.subscriptions.broadcast_branch_created(&branch);
        Ok(branch.path)
    }

    pub fn get_branch(&self, path: &str) -> Result<RevisionBranch> {
        self.branches.get_branch(path)
    }

    /// Soft-delete the branch and its subtree.
    pub fn delete_branch(&self, path: &str) -> Result<()> {
        let _guard = self.locks.lock(path, self.lock_timeout())?;
        let affected = self.branches.delete(path)?;

        info!(branch = path, affected = affected.len(), "deleted branch");
        self.subscriptions.broadcast_branch_deleted(&affected);
        Ok(())
    }

    pub fn get_children(&self, path: &str) -> Result<Vec<RevisionBranch>> {
        self.branches.children(path)
    }

    pub fn descendants(&self, path: &str) -> Result<Vec<RevisionBranch>> {
        self.branches.descendants(path)
    }

    pub fn list_branches(&self) -> Vec<RevisionBranch> {
        self.branches.list_branches()
    }

    pub fn search_branches(&self, query: &Query) -> Result<Hits<RevisionBranch>> {
        self.branches.search(query)
    }

    pub fn update_metadata(&self, path: &str, metadata: Metadata) -> Result<RevisionBranch> {
        let _guard = self.locks.lock(path, self.lock_timeout())?;
        self.branches.update_metadata(path, metadata)
    }

    /// Lineage-aware state of `path` against its parent.
    pub fn branch_state(&self, path: &str) -> Result<BranchState> {
        self.branches.branch_state(path)
    }

    /// Pairwise state of `path` relative to `other`.
    pub fn branch_state_between(&self, path: &str, other: &str) -> Result<BranchState> {
        self.branches.branch_state_between(path, other)
    }

    /// Advance the head of `path` without writing anything.
    pub fn handle_commit(&self, path: &str, timestamp: Timestamp) -> Result<()> {
        let _guard = self.locks.lock(path, self.lock_timeout())?;
        self.branches.handle_commit(path, timestamp)?;
        self.clock.observe(timestamp);
        Ok(())
    }

    // --- Merge ---

    /// Merge `source` into `target`.
    pub fn merge(&self, source: &str, target: &str, comment: &str, squash: bool) -> Result<Merge> {
        self.prepare_merge(source, target)
            .squash(squash)
            .comment(comment)
            .merge()
    }

    pub fn prepare_merge(&self, source: &str, target: &str) -> MergeRequest<'_> {
        MergeRequest::new(self, source, target)
    }

    /// Replay `target`, a direct child of `source`, on top of `source`.
    pub fn rebase(
        &self,
        source: &str,
        target: &str,
        comment: &str,
        processor: impl ConflictProcessor + 'static,
    ) -> Result<Merge> {
        self.prepare_merge(source, target)
            .comment(comment)
            .conflict_processor(processor)
            .rebase()
    }

    /// Every merge attempt, most recent first.
    pub fn merges(&self) -> Vec<Merge> {
        self.merges.read().all().cloned().collect()
    }

    /// Merge attempts involving `path`, most recent first.
    pub fn merges_involving(&self, path: &str) -> Vec<Merge> {
        self.merges.read().involving(path).cloned().collect()
    }

    // --- Subscriptions ---

    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.subscriptions.subscribe(config)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id)
    }

    // --- Maintenance ---

    pub fn stats(&self) -> StoreStats {
        let (branch_count, segment_count) = {
            let index = self.branches.read_index();
            (index.len(), index.segments().len())
        };
        let (revision_count, tombstone_count) = {
            let arena = self.revisions.read();
            (arena.len(), arena.tombstone_count())
        };

        StoreStats {
            branch_count: branch_count as u64,
            segment_count: segment_count as u64,
            revision_count: revision_count as u64,
            tombstone_count: tombstone_count as u64,
            commit_count: self.commits.read().len() as u64,
            merge_count: self.merges.read().len() as u64,
        }
    }

    /// Write a snapshot of the whole store. No-op in memory.
    pub fn sync(&self) -> Result<()> {
        let Some(dir) = &self.config.path else {
            return Ok(());
        };

        let branches = self.branches.read_index();
        let revisions = self.revisions.read();
        let commits = self.commits.read();
        let merges = self.merges.read();
        SnapshotRef {
            branches: &branches,
            revisions: &revisions,
            commits: &commits,
            merges: &merges,
        }
        .write_to(dir)
    }
}

impl Drop for RevisionStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revisions::Document;
    use crate::types::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn store() -> RevisionStore {
        RevisionStore::in_memory_with_clock(Arc::new(ManualClock::new(1)))
    }

    fn concept(id: &str, term: &str) -> Document {
        Document::new("concept", id).with_field("term", term)
    }

    #[test]
    fn test_write_and_read() {
        let store = store();
        let ts = store.current_time();
        store
            .write("MAIN", ts, |w| {
                w.put(concept("1", "Heart"));
                Ok(())
            })
            .unwrap();

        let term = store
            .read("MAIN", |s| Ok(s.get("concept", "1").unwrap().get("term").cloned()))
            .unwrap();
        assert_eq!(term, Some(serde_json::json!("Heart")));
        assert_eq!(store.get_branch("MAIN").unwrap().head_timestamp, ts);
    }

    #[test]
    fn test_failed_write_applies_nothing() {
        let store = store();
        let ts = store.current_time();
        let result: Result<()> = store.write("MAIN", ts, |w| {
            w.put(concept("1", "Heart"));
            Err(StoreError::bad_request("abort"))
        });

        assert!(result.is_err());
        assert_eq!(store.stats().revision_count, 0);
        assert!(store.read("MAIN", |s| Ok(s.exists("concept", "1"))).map(|e| !e).unwrap());
    }

    #[test]
    fn test_write_to_base_ref_is_rejected() {
        let store = store();
        store.create_branch("MAIN", "a", Metadata::new()).unwrap();
        let ts = store.current_time();
        let result = store.write("MAIN/a^", ts, |_| Ok(()));
        assert!(matches!(result, Err(StoreError::BadRequest(_))));
    }

    #[test]
    fn test_commit_requires_later_timestamp() {
        let store = store();
        let ts = store.current_time();
        let mut staging = store.prepare_commit();
        staging.stage_new(concept("1", "Heart"));
        staging.commit("c1", "MAIN", ts, "ann", "first").unwrap();

        let mut staging = store.prepare_commit();
        staging.stage_new(concept("2", "Liver"));
        let result = staging.commit("c2", "MAIN", ts, "ann", "same time");
        assert!(matches!(result, Err(StoreError::BadRequest(_))));
    }

    #[test]
    fn test_duplicate_commit_id_is_rejected() {
        let store = store();
        let mut staging = store.prepare_commit();
        staging.stage_new(concept("1", "Heart"));
        staging
            .commit("c1", "MAIN", store.current_time(), "ann", "")
            .unwrap();

        let mut staging = store.prepare_commit();
        staging.stage_new(concept("2", "Liver"));
        let result = staging.commit("c1", "MAIN", store.current_time(), "ann", "");
        assert!(matches!(result, Err(StoreError::BadRequest(_))));
    }

    #[test]
    fn test_derived_commit_id() {
        let store = store();
        let ts = store.current_time();
        let mut staging = store.prepare_commit();
        staging.stage_new(concept("1", "Heart"));
        let commit = staging.commit("", "MAIN", ts, "ann", "").unwrap();

        assert_eq!(commit.id, derive_commit_id("MAIN", ts, "ann"));
        assert_eq!(store.get_commit(&commit.id).unwrap(), commit);
    }

    #[test]
    fn test_empty_commit_is_logged_without_moving_head() {
        let store = store();
        let head = store.get_branch("MAIN").unwrap().head_timestamp;
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        store.hooks().add_post_commit(move |_: &Commit| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let mut staging = store.prepare_commit();
        staging.stage_remove("concept", "missing");
        let commit = staging
            .commit("c1", "MAIN", store.current_time(), "ann", "")
            .unwrap();

        assert!(commit.details.is_empty());
        assert_eq!(store.get_commit("c1").unwrap(), commit);
        assert_eq!(store.stats().commit_count, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_branch("MAIN").unwrap().head_timestamp, head);
        assert!(store.current_time() > commit.timestamp);
    }

    #[test]
    fn test_stats() {
        let store = store();
        store.create_branch("MAIN", "a", Metadata::new()).unwrap();
        let mut staging = store.prepare_commit();
        staging.stage_new(concept("1", "Heart"));
        staging
            .commit("c1", "MAIN/a", store.current_time(), "ann", "")
            .unwrap();

        let stats = store.stats();
        assert_eq!(stats.branch_count, 2);
        assert_eq!(stats.segment_count, 3);
        assert_eq!(stats.revision_count, 1);
        assert_eq!(stats.commit_count, 1);
        assert_eq!(stats.merge_count, 0);
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::at(dir.path().join("store"));

        {
            let store = RevisionStore::open_or_create(config.clone()).unwrap();
            store.create_branch("MAIN", "a", Metadata::new()).unwrap();
            let mut staging = store.prepare_commit();
            staging.stage_new(concept("1", "Heart"));
            staging
                .commit("c1", "MAIN/a", store.current_time(), "ann", "")
                .unwrap();
            store.sync().unwrap();
        }

        let store = RevisionStore::open(config).unwrap();
        assert!(store.get_branch("MAIN/a").is_ok());
        assert!(store.get_commit("c1").is_ok());
        let exists = store.read("MAIN/a", |s| Ok(s.exists("concept", "1"))).unwrap();
        assert!(exists);

        // New timestamps land after everything that was persisted.
        let head = store.get_branch("MAIN/a").unwrap().head_timestamp;
        assert!(store.current_time() > head);
    }

    #[test]
    fn test_store_lock() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::at(dir.path().join("store"));

        let _store = RevisionStore::open_or_create(config.clone()).unwrap();
        assert!(matches!(
            RevisionStore::open(config),
            Err(StoreError::Locked)
        ));
    }

    #[test]
    fn test_open_missing_store_without_create() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            create_if_missing: false,
            ..StoreConfig::at(dir.path().join("missing"))
        };
        assert!(matches!(
            RevisionStore::open_or_create(config),
            Err(StoreError::NotInitialized)
        ));
    }
}
