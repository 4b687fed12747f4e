//! Branch records, branch references and branch state classification.

use crate::error::{Result, StoreError};
use crate::types::{SegmentId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Path of the root branch.
pub const MAIN_PATH: &str = "MAIN";

/// Separator between branch names in a path.
pub const SEPARATOR: char = '/';

/// Suffix turning a path into a reference to the branch's base point.
pub const BASE_REF_CHAR: char = '^';

/// Separator of the two paths in a revision range token. Cannot appear in
/// branch names.
pub const REV_RANGE: &str = "...";

/// Maximum length of a single branch name.
pub const MAX_NAME_LENGTH: usize = 50;

/// Free-form branch metadata. Null values are rejected.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A named line of revision history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RevisionBranch {
    pub path: String,
    /// Empty for MAIN.
    pub parent_path: String,
    pub name: String,
    /// Point in the parent's history this branch starts from.
    pub base_timestamp: Timestamp,
    /// Timestamp of the branch's most recent commit, or its base.
    pub head_timestamp: Timestamp,
    pub deleted: bool,
    pub metadata: Metadata,

    /// Segments visible from the head.
    pub(crate) segments: BTreeSet<SegmentId>,
    /// Segments visible from the base.
    pub(crate) base_segments: BTreeSet<SegmentId>,
    /// The segment commits to this branch are written into.
    pub(crate) current_segment: SegmentId,
    /// Segments whose content was squash-merged into this branch.
    pub(crate) merge_sources: BTreeSet<SegmentId>,
}

impl RevisionBranch {
    pub fn is_main(&self) -> bool {
        self.path == MAIN_PATH
    }

    pub fn base_timestamp(&self) -> Timestamp {
        self.base_timestamp
    }

    pub fn head_timestamp(&self) -> Timestamp {
        self.head_timestamp
    }

    pub fn segments(&self) -> &BTreeSet<SegmentId> {
        &self.segments
    }

    pub fn base_segments(&self) -> &BTreeSet<SegmentId> {
        &self.base_segments
    }

    pub fn current_segment(&self) -> SegmentId {
        self.current_segment
    }

    pub fn merge_sources(&self) -> &BTreeSet<SegmentId> {
        &self.merge_sources
    }

    /// Path of a direct child with the given name.
    pub fn child_path(&self, name: &str) -> String {
        format!("{}{}{}", self.path, SEPARATOR, name)
    }

    /// Reference to this branch's base point.
    pub fn base_ref(&self) -> String {
        format!("{}{}", self.path, BASE_REF_CHAR)
    }
}

/// Relationship of a branch to another branch (usually its parent).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchState {
    UpToDate,
    Forward,
    Behind,
    Diverged,
    /// The branch's base no longer lies on its parent's lineage.
    Stale,
}

impl BranchState {
    /// Classify from `(base, head)` pairs, where `head > base` means the side
    /// has commits the other one lacks.
    pub fn classify(branch: (Timestamp, Timestamp), other: (Timestamp, Timestamp)) -> Self {
        let branch_ahead = branch.1 > branch.0;
        let other_ahead = other.1 > other.0;
        match (branch_ahead, other_ahead) {
            (false, false) => BranchState::UpToDate,
            (true, false) => BranchState::Forward,
            (false, true) => BranchState::Behind,
            (true, true) => BranchState::Diverged,
        }
    }

    /// The same relationship seen from the other side.
    pub fn reverse(self) -> Self {
        match self {
            BranchState::Forward => BranchState::Behind,
            BranchState::Behind => BranchState::Forward,
            other => other,
        }
    }
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BranchState::UpToDate => "UP_TO_DATE",
            BranchState::Forward => "FORWARD",
            BranchState::Behind => "BEHIND",
            BranchState::Diverged => "DIVERGED",
            BranchState::Stale => "STALE",
        };
        f.write_str(name)
    }
}

/// A parsed branch reference: a head path, a base ref or a revision range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BranchRef {
    Head(String),
    Base(String),
    Range { base: String, compare: String },
}

impl BranchRef {
    pub fn parse(reference: &str) -> Result<Self> {
        if reference.is_empty() {
            return Err(StoreError::bad_request("branch reference may not be empty"));
        }

        if let Some((base, compare)) = reference.split_once(REV_RANGE) {
            if base.is_empty() || compare.is_empty() {
                return Err(StoreError::bad_request(format!(
                    "invalid revision range '{}'",
                    reference
                )));
            }
            validate_path(base)?;
            validate_path(compare)?;
            return Ok(BranchRef::Range {
                base: base.to_string(),
                compare: compare.to_string(),
            });
        }

        match reference.strip_suffix(BASE_REF_CHAR) {
            Some("") => Err(StoreError::bad_request("base reference without a path")),
            Some(path) => {
                validate_path(path)?;
                Ok(BranchRef::Base(path.to_string()))
            }
            None => {
                validate_path(reference)?;
                Ok(BranchRef::Head(reference.to_string()))
            }
        }
    }

    /// The branch path the reference is anchored to.
    pub fn path(&self) -> &str {
        match self {
            BranchRef::Head(path) | BranchRef::Base(path) => path,
            BranchRef::Range { compare, .. } => compare,
        }
    }

    pub fn is_head(&self) -> bool {
        matches!(self, BranchRef::Head(_))
    }
}

impl fmt::Display for BranchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchRef::Head(path) => f.write_str(path),
            BranchRef::Base(path) => write!(f, "{}{}", path, BASE_REF_CHAR),
            BranchRef::Range { base, compare } => write!(f, "{}{}{}", base, REV_RANGE, compare),
        }
    }
}

/// Build a range token reading what `compare` changed since it diverged
/// from `base`.
pub fn to_revision_range(base: &str, compare: &str) -> Result<String> {
    if base.is_empty() || compare.is_empty() {
        return Err(StoreError::bad_request(
            "both ends of a revision range must be specified",
        ));
    }
    Ok(format!("{}{}{}", base, REV_RANGE, compare))
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StoreError::bad_request("branch name may not be empty"));
    }
    if name.contains(SEPARATOR) {
        return Err(StoreError::bad_request(format!(
            "branch name '{}' may not contain '{}'",
            name, SEPARATOR
        )));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(StoreError::bad_request(format!(
            "branch name '{}' is longer than {} characters",
            name, MAX_NAME_LENGTH
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(StoreError::bad_request(format!(
            "branch name '{}' contains disallowed character '{}'",
            name, c
        )));
    }
    Ok(())
}

/// Every segment of `path` must be a valid branch name.
fn validate_path(path: &str) -> Result<()> {
    if path.split(SEPARATOR).any(|segment| validate_name(segment).is_err()) {
        return Err(StoreError::bad_request(format!(
            "malformed branch path '{}'",
            path
        )));
    }
    Ok(())
}

pub(crate) fn validate_metadata(metadata: &Metadata) -> Result<()> {
    match metadata.iter().find(|(_, value)| value.is_null()) {
        Some((key, _)) => Err(StoreError::bad_request(format!(
            "metadata value for '{}' may not be null",
            key
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let t = |b: i64, h: i64| (Timestamp(b), Timestamp(h));

        assert_eq!(BranchState::classify(t(5, 5), t(5, 5)), BranchState::UpToDate);
        assert_eq!(BranchState::classify(t(5, 7), t(5, 5)), BranchState::Forward);
        assert_eq!(BranchState::classify(t(5, 5), t(6, 8)), BranchState::Behind);
        assert_eq!(BranchState::classify(t(5, 7), t(6, 8)), BranchState::Diverged);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("feature-1_a").is_ok());
        assert!(validate_name(&"a".repeat(MAX_NAME_LENGTH)).is_ok());

        for bad in ["", "a/b", "a.b", "a b", "ä"] {
            assert!(
                matches!(validate_name(bad), Err(StoreError::BadRequest(_))),
                "{:?} should be rejected",
                bad
            );
        }
        assert!(validate_name(&"a".repeat(MAX_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_metadata_rejects_nulls() {
        let mut metadata = Metadata::new();
        metadata.insert("owner".into(), serde_json::json!("ann"));
        assert!(validate_metadata(&metadata).is_ok());

        metadata.insert("reviewer".into(), serde_json::Value::Null);
        assert!(matches!(
            validate_metadata(&metadata),
            Err(StoreError::BadRequest(_))
        ));
    }

    #[test]
    fn test_parse_references() {
        assert_eq!(BranchRef::parse("MAIN/a").unwrap(), BranchRef::Head("MAIN/a".into()));
        assert_eq!(BranchRef::parse("MAIN/a^").unwrap(), BranchRef::Base("MAIN/a".into()));

        let range = to_revision_range("MAIN", "MAIN/a").unwrap();
        assert_eq!(
            BranchRef::parse(&range).unwrap(),
            BranchRef::Range {
                base: "MAIN".into(),
                compare: "MAIN/a".into()
            }
        );
        assert_eq!(BranchRef::parse(&range).unwrap().to_string(), range);

        assert!(BranchRef::parse("").is_err());
        assert!(BranchRef::parse("^").is_err());
        assert!(BranchRef::parse("MAIN...").is_err());
    }

    #[test]
    fn test_parse_rejects_malformed_paths() {
        for reference in ["MAIN/a^^", "MAIN//a", "MAIN/a/", "MAIN/a b", "MAIN^...MAIN/a"] {
            assert!(
                matches!(BranchRef::parse(reference), Err(StoreError::BadRequest(_))),
                "reference {:?} should be rejected",
                reference
            );
        }
    }

    #[test]
    fn test_revision_range_requires_both_ends() {
        assert!(matches!(to_revision_range("", "MAIN"), Err(StoreError::BadRequest(_))));
        assert!(matches!(to_revision_range("MAIN", ""), Err(StoreError::BadRequest(_))));
    }
}
