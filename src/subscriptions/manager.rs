//! Subscription manager for broadcasting store events.

use crate::branches::RevisionBranch;
use crate::history::PurgeReport;
use crate::merge::Merge;
use crate::staging::Commit;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use super::types::{
    BranchSummary, CommitSummary, DropReason, MergeSummary, StoreEvent, SubscriptionConfig,
    SubscriptionHandle, SubscriptionId,
};

/// Default limit for including commit details in events (bytes).
pub const DEFAULT_PAYLOAD_LIMIT: usize = 4096;

struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<StoreEvent>,
}

impl Subscription {
    /// Returns false if the buffer is full or the receiver is gone.
    fn try_send(&self, event: StoreEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Manages subscriptions and broadcasts events.
pub struct SubscriptionManager {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    next_id: AtomicU64,
    payload_limit: usize,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::with_payload_limit(DEFAULT_PAYLOAD_LIMIT)
    }

    pub fn with_payload_limit(payload_limit: usize) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            payload_limit,
        }
    }

    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size);

        self.subscriptions
            .write()
            .insert(id, Subscription { config, sender });

        SubscriptionHandle { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            // Best effort.
            let _ = sub.sender.try_send(StoreEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    // --- Broadcasting ---

    pub fn broadcast_commit(&self, commit: &Commit) {
        let event = StoreEvent::Committed {
            commit: CommitSummary::from_commit(commit, self.payload_limit),
        };
        self.broadcast(|sub| sub.config.filter.matches_commit(commit), event);
    }

    pub fn broadcast_branch_created(&self, branch: &RevisionBranch) {
        let event = StoreEvent::BranchCreated {
            branch: BranchSummary::from_branch(branch),
        };
        self.broadcast(
            |sub| {
                let filter = &sub.config.filter;
                filter.include_branch_events && filter.matches_branch(&branch.path)
            },
            event,
        );
    }

    pub fn broadcast_branch_deleted(&self, paths: &[String]) {
        let event = StoreEvent::BranchDeleted {
            paths: paths.to_vec(),
        };
        self.broadcast(
            |sub| {
                let filter = &sub.config.filter;
                filter.include_branch_events && paths.iter().any(|p| filter.matches_branch(p))
            },
            event,
        );
    }

    pub fn broadcast_merge(&self, merge: &Merge) {
        let event = StoreEvent::Merged {
            merge: MergeSummary::from_merge(merge),
        };
        self.broadcast(
            |sub| {
                let filter = &sub.config.filter;
                filter.include_merges
                    && (filter.matches_branch(&merge.source) || filter.matches_branch(&merge.target))
            },
            event,
        );
    }

    pub fn broadcast_purge(&self, report: &PurgeReport) {
        let event = StoreEvent::Purged {
            report: report.clone(),
        };
        self.broadcast(
            |sub| {
                let filter = &sub.config.filter;
                filter.include_purges && filter.matches_branch(&report.branch)
            },
            event,
        );
    }

    /// Send to every matching subscriber, dropping the ones that can't keep up.
    fn broadcast<F>(&self, filter: F, event: StoreEvent)
    where
        F: Fn(&Subscription) -> bool,
    {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if filter(sub) && !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    warn!(subscription = id.0, "dropping slow subscriber");
                    let _ = sub.sender.try_send(StoreEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
