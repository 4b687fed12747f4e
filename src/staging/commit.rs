//! Commit records.

use crate::revisions::{Change, Document, PropertyDiff, RevisionArena, View};
use crate::types::{ObjectId, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// One logical change inside a commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommitDetail {
    pub kind: ChangeKind,
    pub object: ObjectId,
    pub container: Option<ObjectId>,
    /// Property-level differences, only filled for `Changed`.
    pub properties: Vec<PropertyDiff>,
}

/// Durable record of one successful commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    pub branch: String,
    pub author: String,
    pub comment: String,
    pub timestamp: Timestamp,
    pub details: Vec<CommitDetail>,
    /// Branch whose content was merged by this commit.
    pub merge_source: Option<String>,
}

impl Commit {
    /// True if any detail concerns `object`, directly or as container.
    pub fn touches(&self, object: &ObjectId) -> bool {
        self.details.iter().any(|d| concerns(d, object))
    }

    pub fn details_for<'a>(&'a self, object: &'a ObjectId) -> impl Iterator<Item = &'a CommitDetail> + 'a {
        self.details.iter().filter(move |d| concerns(d, object))
    }

    /// Copy of the commit keeping only the details about `object`.
    pub fn filtered_to(&self, object: &ObjectId) -> Commit {
        Commit {
            details: self.details_for(object).cloned().collect(),
            ..self.clone()
        }
    }

    pub fn details_of(&self, kind: ChangeKind) -> impl Iterator<Item = &CommitDetail> {
        self.details.iter().filter(move |d| d.kind == kind)
    }
}

fn concerns(detail: &CommitDetail, object: &ObjectId) -> bool {
    &detail.object == object || detail.container.as_ref() == Some(object)
}

/// Commit id derived from where, when and by whom a commit was made.
pub fn derive_commit_id(branch: &str, timestamp: Timestamp, author: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(branch.as_bytes());
    hasher.update([0u8]);
    hasher.update(timestamp.0.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(author.as_bytes());
    hex::encode(hasher.finalize())
}

/// Resolve raw changes against what `view` sees: no-op changes are dropped
/// and the rest are described as commit details.
pub(crate) fn resolve_changes(
    arena: &RevisionArena,
    view: &View,
    changes: impl IntoIterator<Item = Change>,
) -> (Vec<Change>, Vec<CommitDetail>) {
    let mut effective = Vec::new();
    let mut details = Vec::new();

    for (object, content) in changes {
        let current: Option<&Document> = arena.get(view, &object);
        let detail = match (current, &content) {
            (None, None) => {
                debug!(object = %object, "skipping removal of invisible object");
                continue;
            }
            (None, Some(doc)) => CommitDetail {
                kind: ChangeKind::Added,
                object: object.clone(),
                container: doc.container.clone(),
                properties: Vec::new(),
            },
            (Some(old), Some(new)) => {
                let properties = old.diff(new);
                if properties.is_empty() {
                    debug!(object = %object, "skipping unchanged object");
                    continue;
                }
                CommitDetail {
                    kind: ChangeKind::Changed,
                    object: object.clone(),
                    container: new.container.clone(),
                    properties,
                }
            }
            (Some(old), None) => CommitDetail {
                kind: ChangeKind::Removed,
                object: object.clone(),
                container: old.container.clone(),
                properties: Vec::new(),
            },
        };
        details.push(detail);
        effective.push((object, content));
    }

    (effective, details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SegmentId;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn view(as_of: i64) -> View {
        View::new(BTreeSet::from([SegmentId(0)]), Timestamp(as_of))
    }

    #[test]
    fn test_derived_ids_are_stable_and_distinct() {
        let a = derive_commit_id("MAIN", Timestamp(1), "ann");
        assert_eq!(a, derive_commit_id("MAIN", Timestamp(1), "ann"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, derive_commit_id("MAIN", Timestamp(2), "ann"));
        assert_ne!(a, derive_commit_id("MAIN/a", Timestamp(1), "ann"));
    }

    #[test]
    fn test_resolve_classifies_changes() {
        let mut arena = RevisionArena::new();
        let existing = Document::new("concept", "1").with_field("term", "Heart");
        let untouched = Document::new("concept", "2").with_field("term", "Liver");
        arena.apply(
            SegmentId(0),
            Timestamp(1),
            &[&view(0)],
            vec![
                (existing.object_id(), Some(existing.clone())),
                (untouched.object_id(), Some(untouched.clone())),
            ],
        );

        let changes = vec![
            (existing.object_id(), Some(existing.clone().with_field("term", "Cardiac"))),
            (untouched.object_id(), Some(untouched.clone())),
            (ObjectId::new("concept", "3"), Some(Document::new("concept", "3"))),
            (ObjectId::new("concept", "4"), None),
        ];
        let (effective, details) = resolve_changes(&arena, &view(1), changes);

        assert_eq!(effective.len(), 2);
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].kind, ChangeKind::Changed);
        assert_eq!(details[0].properties[0].old, Some(json!("Heart")));
        assert_eq!(details[1].kind, ChangeKind::Added);
    }

    #[test]
    fn test_filtered_to_keeps_container_details() {
        let concept = ObjectId::new("concept", "1");
        let commit = Commit {
            id: "c1".into(),
            branch: "MAIN".into(),
            author: "ann".into(),
            comment: "".into(),
            timestamp: Timestamp(1),
            details: vec![
                CommitDetail {
                    kind: ChangeKind::Added,
                    object: concept.clone(),
                    container: None,
                    properties: vec![],
                },
                CommitDetail {
                    kind: ChangeKind::Added,
                    object: ObjectId::new("description", "d1"),
                    container: Some(concept.clone()),
                    properties: vec![],
                },
                CommitDetail {
                    kind: ChangeKind::Added,
                    object: ObjectId::new("concept", "2"),
                    container: None,
                    properties: vec![],
                },
            ],
            merge_source: None,
        };

        assert!(commit.touches(&concept));
        assert_eq!(commit.filtered_to(&concept).details.len(), 2);
        assert_eq!(commit.details_of(ChangeKind::Added).count(), 3);
    }
}
