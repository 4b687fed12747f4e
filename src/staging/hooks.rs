//! Pre- and post-commit hooks.

use super::area::StagingArea;
use super::commit::Commit;
use crate::error::Result;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Runs before a commit is applied. May stage further changes; an error
/// aborts the commit.
pub trait PreCommitHook: Send + Sync {
    fn run(&self, staging: &mut StagingArea<'_>) -> Result<()>;
}

/// Runs after a commit is durable. Errors are logged, never rolled back.
pub trait PostCommitHook: Send + Sync {
    fn run(&self, commit: &Commit) -> Result<()>;
}

impl<F> PreCommitHook for F
where
    F: Fn(&mut StagingArea<'_>) -> Result<()> + Send + Sync,
{
    fn run(&self, staging: &mut StagingArea<'_>) -> Result<()> {
        self(staging)
    }
}

impl<F> PostCommitHook for F
where
    F: Fn(&Commit) -> Result<()> + Send + Sync,
{
    fn run(&self, commit: &Commit) -> Result<()> {
        self(commit)
    }
}

#[derive(Clone)]
pub enum Hook {
    PreCommit(Arc<dyn PreCommitHook>),
    PostCommit(Arc<dyn PostCommitHook>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HookId(pub u64);

/// Ordered hook registry. Hooks run in registration order.
#[derive(Default)]
pub struct Hooks {
    hooks: RwLock<Vec<(HookId, Hook)>>,
    next_id: AtomicU64,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_hook(&self, hook: Hook) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.hooks.write().push((id, hook));
        id
    }

    pub fn add_pre_commit<F>(&self, hook: F) -> HookId
    where
        F: Fn(&mut StagingArea<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.add_hook(Hook::PreCommit(Arc::new(hook)))
    }

    pub fn add_post_commit<F>(&self, hook: F) -> HookId
    where
        F: Fn(&Commit) -> Result<()> + Send + Sync + 'static,
    {
        self.add_hook(Hook::PostCommit(Arc::new(hook)))
    }

    /// Returns false if no hook had that id.
    pub fn remove_hook(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() != before
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    pub(crate) fn pre_commit_hooks(&self) -> Vec<Arc<dyn PreCommitHook>> {
        self.hooks
            .read()
            .iter()
            .filter_map(|(_, hook)| match hook {
                Hook::PreCommit(h) => Some(Arc::clone(h)),
                Hook::PostCommit(_) => None,
            })
            .collect()
    }

    pub(crate) fn post_commit_hooks(&self) -> Vec<Arc<dyn PostCommitHook>> {
        self.hooks
            .read()
            .iter()
            .filter_map(|(_, hook)| match hook {
                Hook::PostCommit(h) => Some(Arc::clone(h)),
                Hook::PreCommit(_) => None,
            })
            .collect()
    }
}
