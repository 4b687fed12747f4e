//! # Strata
//!
//! A branch-aware, revision-controlled document store. Branches form a tree
//! rooted at `MAIN`; every commit writes new revisions instead of
//! overwriting, so any branch can be read at its head or at its base.
//!
//! ## Core Concepts
//!
//! - **Documents**: JSON objects keyed by document type and id
//! - **Revisions**: Immutable document states tagged with a segment and time
//! - **Branches**: Cheap children of a parent, created at the parent's head
//! - **Commits**: Staged changes applied atomically, with pre/post hooks
//! - **Merges**: Fast-forward, squash, merge commit or rebase, with conflicts
//! - **Purge**: Reclaims revisions no branch head or base can see anymore
//!
//! ## Example
//!
//! ```ignore
//! use strata::{Document, Metadata, RevisionStore};
//!
//! let store = RevisionStore::in_memory();
//! let feature = store.create_branch("MAIN", "feature", Metadata::new())?;
//!
//! let mut staging = store.prepare_commit();
//! staging.stage_new(Document::new("concept", "1").with_field("term", "Heart"));
//! staging.commit("", &feature, store.current_time(), "ann", "Add heart")?;
//!
//! store.merge(&feature, "MAIN", "Promote feature", false)?;
//! let term = store.read("MAIN", |s| Ok(s.get("concept", "1")))?;
//! ```

pub mod branches;
pub mod compare;
pub mod error;
pub mod history;
pub mod locks;
pub mod merge;
mod persist;
pub mod revisions;
pub mod staging;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use branches::{
    to_revision_range, BranchIndex, BranchManager, BranchRef, BranchState, Metadata,
    RevisionBranch, MAIN_PATH,
};
pub use compare::RevisionCompare;
pub use error::{Result, StoreError};
pub use history::{CommitLog, PurgeMode, PurgeReport};
pub use merge::{
    three_way, ConflictProcessor, DefaultConflictProcessor, DeletionResolution, KeepSource,
    KeepTarget, Merge, MergeConflict, MergeKind, MergeLog, MergeRequest, MergeStatus, Side,
};
pub use revisions::{
    Document, Expr, Hits, PropertyDiff, Query, RevisionSearcher, RevisionWriter, Revisioned,
    SortOrder, View,
};
pub use staging::{
    derive_commit_id, ChangeKind, Commit, CommitDetail, Hook, HookId, Hooks, PostCommitHook,
    PreCommitHook, StagedChange, StagingArea,
};
pub use store::{RevisionStore, StoreConfig};
pub use subscriptions::{
    BranchSummary, CommitSummary, DropReason, MergeSummary, StoreEvent, SubscriptionConfig,
    SubscriptionFilter, SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
pub use types::*;
