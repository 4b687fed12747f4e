//! Commit history and purge.

mod log;
mod purge;

pub use log::CommitLog;
pub use purge::{PurgeMode, PurgeReport};

pub(crate) use purge::purge_segments;
