//! Subscription types for store change notifications.

use crate::branches::RevisionBranch;
use crate::history::PurgeReport;
use crate::merge::{Merge, MergeKind, MergeStatus};
use crate::staging::{Commit, CommitDetail};
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before the subscriber is dropped.
    /// Default: 1000
    pub buffer_size: usize,

    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SubscriptionFilter::all(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Only events about these branch paths (None = every branch).
    pub branches: Option<Vec<String>>,

    /// Only commits touching these document types (None = all types).
    pub doc_types: Option<Vec<String>>,

    pub include_commits: bool,
    pub include_branch_events: bool,
    pub include_merges: bool,
    pub include_purges: bool,
}

impl SubscriptionFilter {
    pub fn commits() -> Self {
        Self {
            include_commits: true,
            ..Default::default()
        }
    }

    /// Commits on the given branches only.
    pub fn commits_on(branches: Vec<String>) -> Self {
        Self {
            branches: Some(branches),
            include_commits: true,
            ..Default::default()
        }
    }

    /// Commits touching documents of the given types.
    pub fn doc_types(types: Vec<String>) -> Self {
        Self {
            doc_types: Some(types),
            include_commits: true,
            ..Default::default()
        }
    }

    /// Branch creation and deletion.
    pub fn branches() -> Self {
        Self {
            include_branch_events: true,
            ..Default::default()
        }
    }

    pub fn merges() -> Self {
        Self {
            include_merges: true,
            ..Default::default()
        }
    }

    pub fn all() -> Self {
        Self {
            include_commits: true,
            include_branch_events: true,
            include_merges: true,
            include_purges: true,
            ..Default::default()
        }
    }

    pub(crate) fn matches_branch(&self, path: &str) -> bool {
        match &self.branches {
            Some(paths) => paths.iter().any(|p| p == path),
            None => true,
        }
    }

    pub(crate) fn matches_commit(&self, commit: &Commit) -> bool {
        if !self.include_commits || !self.matches_branch(&commit.branch) {
            return false;
        }
        match &self.doc_types {
            Some(types) => commit
                .details
                .iter()
                .any(|d| types.iter().any(|t| *t == d.object.doc_type)),
            None => true,
        }
    }
}

/// Events emitted to subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    BranchCreated { branch: BranchSummary },

    /// A branch and its subtree were deleted.
    BranchDeleted { paths: Vec<String> },

    Committed { commit: CommitSummary },

    /// A merge or rebase completed.
    Merged { merge: MergeSummary },

    Purged { report: PurgeReport },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Summary of a commit. Details are only included when their encoded size
/// stays within the configured payload limit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitSummary {
    pub id: String,
    pub branch: String,
    pub author: String,
    pub comment: String,
    pub timestamp: i64,
    pub change_count: usize,
    pub details: Option<Vec<CommitDetail>>,
}

impl CommitSummary {
    pub fn from_commit(commit: &Commit, payload_limit: usize) -> Self {
        let size = serde_json::to_vec(&commit.details)
            .map(|bytes| bytes.len())
            .unwrap_or(usize::MAX);
        let details = if size <= payload_limit {
            Some(commit.details.clone())
        } else {
            None
        };

        Self {
            id: commit.id.clone(),
            branch: commit.branch.clone(),
            author: commit.author.clone(),
            comment: commit.comment.clone(),
            timestamp: commit.timestamp.0,
            change_count: commit.details.len(),
            details,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BranchSummary {
    pub path: String,
    pub parent: String,
    pub base: i64,
    pub head: i64,
}

impl BranchSummary {
    pub fn from_branch(branch: &RevisionBranch) -> Self {
        Self {
            path: branch.path.clone(),
            parent: branch.parent_path.clone(),
            base: branch.base_timestamp.0,
            head: branch.head_timestamp.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeSummary {
    pub id: u64,
    pub source: String,
    pub target: String,
    pub kind: MergeKind,
    pub status: MergeStatus,
    pub commit: Option<String>,
}

impl MergeSummary {
    pub fn from_merge(merge: &Merge) -> Self {
        Self {
            id: merge.id,
            source: merge.source.clone(),
            target: merge.target.clone(),
            kind: merge.kind,
            status: merge.status,
            commit: merge.commit.as_ref().map(|c| c.id.clone()),
        }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to receive a subscription's events.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
