//! Branch model.
//!
//! Branches form a tree rooted at MAIN. Each branch records the segments it
//! can see from its head and from its base; comparing those sets is what
//! classifies two branches as up to date, forward, behind, diverged or stale.

mod branch;
mod manager;
mod segments;

pub use branch::{
    to_revision_range, BranchRef, BranchState, Metadata, RevisionBranch, BASE_REF_CHAR,
    MAIN_PATH, MAX_NAME_LENGTH, REV_RANGE, SEPARATOR,
};
pub use manager::{BranchIndex, BranchManager};
pub use segments::{Segment, SegmentLog};
