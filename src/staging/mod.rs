//! Staging and commit pipeline.
//!
//! Changes are collected in a [`StagingArea`] and committed in one step.
//! Registered [`Hooks`] run before the change is applied (and may veto it)
//! and after it became durable.

mod area;
mod commit;
mod hooks;

pub use area::{StagedChange, StagingArea};
pub use commit::{derive_commit_id, ChangeKind, Commit, CommitDetail};
pub use hooks::{Hook, HookId, Hooks, PostCommitHook, PreCommitHook};

pub(crate) use commit::resolve_changes;
