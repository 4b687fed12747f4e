//! Segment-scoped purge of unreachable revisions.

use crate::branches::BranchIndex;
use crate::error::Result;
use crate::types::SegmentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which of a branch's own segments a purge scans.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PurgeMode {
    /// Every segment the branch ever wrote into.
    All,
    /// Only the segment the branch currently writes into.
    Latest,
    /// Every owned segment except the current one.
    History,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub branch: String,
    pub mode: PurgeMode,
    pub segments_scanned: usize,
    pub revisions_removed: usize,
}

/// Segments of `path` a purge in `mode` may reclaim revisions from.
pub(crate) fn purge_segments(
    index: &BranchIndex,
    path: &str,
    mode: PurgeMode,
) -> Result<BTreeSet<SegmentId>> {
    let current = index.get(path)?.current_segment();
    let owned = index.segments().owned_by(path).map(|s| s.id);

    Ok(match mode {
        PurgeMode::All => owned.collect(),
        PurgeMode::Latest => BTreeSet::from([current]),
        PurgeMode::History => owned.filter(|id| *id != current).collect(),
    })
}
