//! Merge conflicts, conflict processors and the three-way document merge.

use crate::revisions::{Document, PropertyDiff, CONTAINER_PROPERTY};
use crate::types::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Which side of a merge a change came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Source,
    Target,
}

/// A change that could not be merged automatically.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MergeConflict {
    AddedInSourceAndTarget {
        object: ObjectId,
    },
    ChangedInSourceDeletedInTarget {
        object: ObjectId,
    },
    ChangedInTargetDeletedInSource {
        object: ObjectId,
    },
    ChangedInSourceAndTarget {
        object: ObjectId,
        property: String,
        source: Option<Value>,
        target: Option<Value>,
    },
}

impl MergeConflict {
    pub fn object(&self) -> &ObjectId {
        match self {
            MergeConflict::AddedInSourceAndTarget { object }
            | MergeConflict::ChangedInSourceDeletedInTarget { object }
            | MergeConflict::ChangedInTargetDeletedInSource { object }
            | MergeConflict::ChangedInSourceAndTarget { object, .. } => object,
        }
    }
}

impl fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeConflict::AddedInSourceAndTarget { object } => {
                write!(f, "{} was added on both sides with different content", object)
            }
            MergeConflict::ChangedInSourceDeletedInTarget { object } => {
                write!(f, "{} was changed in source and deleted in target", object)
            }
            MergeConflict::ChangedInTargetDeletedInSource { object } => {
                write!(f, "{} was changed in target and deleted in source", object)
            }
            MergeConflict::ChangedInSourceAndTarget {
                object, property, ..
            } => write!(f, "{}.{} was changed differently on both sides", object, property),
        }
    }
}

/// How a change on one side and a deletion on the other are reconciled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletionResolution {
    KeepChange,
    KeepDeletion,
}

/// Decides conflicting changes during merge and rebase.
///
/// Every method returning `None` leaves the conflict unresolved, which
/// aborts the merge.
pub trait ConflictProcessor: Send + Sync {
    /// A property changed to different values on both sides. Return the
    /// diff to apply instead.
    fn handle_changed_in_source_and_target(
        &self,
        _object: &ObjectId,
        _source: &PropertyDiff,
        _target: &PropertyDiff,
    ) -> Option<PropertyDiff> {
        None
    }

    /// The object changed on `changed_in` and was deleted on the other side.
    fn handle_changed_and_deleted(
        &self,
        _object: &ObjectId,
        _changed_in: Side,
    ) -> Option<DeletionResolution> {
        None
    }
}

/// Reports every conflict.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConflictProcessor;

impl ConflictProcessor for DefaultConflictProcessor {}

/// Resolves every conflict in favor of the source branch.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeepSource;

impl ConflictProcessor for KeepSource {
    fn handle_changed_in_source_and_target(
        &self,
        _object: &ObjectId,
        source: &PropertyDiff,
        _target: &PropertyDiff,
    ) -> Option<PropertyDiff> {
        Some(source.clone())
    }

    fn handle_changed_and_deleted(
        &self,
        _object: &ObjectId,
        changed_in: Side,
    ) -> Option<DeletionResolution> {
        Some(match changed_in {
            Side::Source => DeletionResolution::KeepChange,
            Side::Target => DeletionResolution::KeepDeletion,
        })
    }
}

/// Resolves every conflict in favor of the target branch.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeepTarget;

impl ConflictProcessor for KeepTarget {
    fn handle_changed_in_source_and_target(
        &self,
        _object: &ObjectId,
        _source: &PropertyDiff,
        target: &PropertyDiff,
    ) -> Option<PropertyDiff> {
        Some(target.clone())
    }

    fn handle_changed_and_deleted(
        &self,
        _object: &ObjectId,
        changed_in: Side,
    ) -> Option<DeletionResolution> {
        Some(match changed_in {
            Side::Target => DeletionResolution::KeepChange,
            Side::Source => DeletionResolution::KeepDeletion,
        })
    }
}

/// Closures decide property conflicts; changed-and-deleted stays a conflict.
impl<F> ConflictProcessor for F
where
    F: Fn(&ObjectId, &PropertyDiff, &PropertyDiff) -> Option<PropertyDiff> + Send + Sync,
{
    fn handle_changed_in_source_and_target(
        &self,
        object: &ObjectId,
        source: &PropertyDiff,
        target: &PropertyDiff,
    ) -> Option<PropertyDiff> {
        self(object, source, target)
    }
}

/// Merge the source and target states of one object against their common
/// ancestor state. Returns the merged state (`None` = deleted).
pub fn three_way(
    object: &ObjectId,
    base: Option<&Document>,
    source: Option<&Document>,
    target: Option<&Document>,
    processor: &dyn ConflictProcessor,
) -> Result<Option<Document>, Vec<MergeConflict>> {
    if source == target || source == base {
        return Ok(target.cloned());
    }
    if target == base {
        return Ok(source.cloned());
    }

    match (base, source, target) {
        (None, _, _) => Err(vec![MergeConflict::AddedInSourceAndTarget {
            object: object.clone(),
        }]),
        (Some(_), None, Some(changed)) => {
            match processor.handle_changed_and_deleted(object, Side::Target) {
                Some(DeletionResolution::KeepChange) => Ok(Some(changed.clone())),
                Some(DeletionResolution::KeepDeletion) => Ok(None),
                None => Err(vec![MergeConflict::ChangedInTargetDeletedInSource {
                    object: object.clone(),
                }]),
            }
        }
        (Some(_), Some(changed), None) => {
            match processor.handle_changed_and_deleted(object, Side::Source) {
                Some(DeletionResolution::KeepChange) => Ok(Some(changed.clone())),
                Some(DeletionResolution::KeepDeletion) => Ok(None),
                None => Err(vec![MergeConflict::ChangedInSourceDeletedInTarget {
                    object: object.clone(),
                }]),
            }
        }
        (Some(base), Some(source), Some(target)) => {
            merge_properties(object, base, source, target, processor).map(Some)
        }
        // Both deleted, already covered by `source == target`.
        (Some(_), None, None) => Ok(None),
    }
}

fn merge_properties(
    object: &ObjectId,
    base: &Document,
    source: &Document,
    target: &Document,
    processor: &dyn ConflictProcessor,
) -> Result<Document, Vec<MergeConflict>> {
    let target_diffs = base.diff(target);
    let mut merged = target.clone();
    let mut conflicts = Vec::new();

    for source_diff in base.diff(source) {
        let chosen = match target_diffs
            .iter()
            .find(|d| d.property == source_diff.property)
        {
            None => source_diff,
            Some(target_diff) if target_diff.new == source_diff.new => continue,
            Some(target_diff) => {
                match processor.handle_changed_in_source_and_target(
                    object,
                    &source_diff,
                    target_diff,
                ) {
                    Some(resolved) => resolved,
                    None => {
                        conflicts.push(MergeConflict::ChangedInSourceAndTarget {
                            object: object.clone(),
                            property: source_diff.property.clone(),
                            source: source_diff.new.clone(),
                            target: target_diff.new.clone(),
                        });
                        continue;
                    }
                }
            }
        };
        apply_diff(&mut merged, &chosen, source);
    }

    if conflicts.is_empty() {
        Ok(merged)
    } else {
        Err(conflicts)
    }
}

/// Apply `diff` to `doc`. Container moves are taken from `source` when the
/// diff points at its container, otherwise `doc` keeps its own.
fn apply_diff(doc: &mut Document, diff: &PropertyDiff, source: &Document) {
    if diff.property == CONTAINER_PROPERTY {
        let source_container = source
            .container
            .as_ref()
            .map(|c| Value::String(c.to_string()));
        if diff.new == source_container {
            doc.container = source.container.clone();
        }
        return;
    }

    match &diff.new {
        Some(value) => {
            doc.fields.insert(diff.property.clone(), value.clone());
        }
        None => {
            doc.fields.remove(&diff.property);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn concept(term: &str) -> Document {
        Document::new("concept", "1")
            .with_field("term", term)
            .with_field("active", true)
    }

    fn oid() -> ObjectId {
        ObjectId::new("concept", "1")
    }

    #[test]
    fn test_one_sided_changes_win() {
        let base = concept("Heart");
        let changed = concept("Cardiac");

        let merged = three_way(&oid(), Some(&base), Some(&changed), Some(&base), &DefaultConflictProcessor);
        assert_eq!(merged, Ok(Some(changed.clone())));

        let merged = three_way(&oid(), Some(&base), Some(&base), Some(&changed), &DefaultConflictProcessor);
        assert_eq!(merged, Ok(Some(changed)));

        let merged = three_way(&oid(), Some(&base), None, Some(&base), &DefaultConflictProcessor);
        assert_eq!(merged, Ok(None));
    }

    #[test]
    fn test_disjoint_property_changes_merge() {
        let base = concept("Heart");
        let source = concept("Cardiac");
        let target = concept("Heart").with_field("active", false);

        let merged = three_way(&oid(), Some(&base), Some(&source), Some(&target), &DefaultConflictProcessor)
            .unwrap()
            .unwrap();
        assert_eq!(merged.get("term"), Some(&json!("Cardiac")));
        assert_eq!(merged.get("active"), Some(&json!(false)));
    }

    #[test]
    fn test_conflicting_property_changes() {
        let base = concept("Heart");
        let source = concept("Cardiac");
        let target = concept("Heart structure");

        let conflicts = three_way(&oid(), Some(&base), Some(&source), Some(&target), &DefaultConflictProcessor)
            .unwrap_err();
        assert_eq!(
            conflicts,
            vec![MergeConflict::ChangedInSourceAndTarget {
                object: oid(),
                property: "term".into(),
                source: Some(json!("Cardiac")),
                target: Some(json!("Heart structure")),
            }]
        );

        let merged = three_way(&oid(), Some(&base), Some(&source), Some(&target), &KeepSource)
            .unwrap()
            .unwrap();
        assert_eq!(merged.get("term"), Some(&json!("Cardiac")));

        let merged = three_way(&oid(), Some(&base), Some(&source), Some(&target), &KeepTarget)
            .unwrap()
            .unwrap();
        assert_eq!(merged.get("term"), Some(&json!("Heart structure")));
    }

    #[test]
    fn test_closure_processor() {
        let base = concept("Heart");
        let source = concept("Cardiac");
        let target = concept("Heart structure");
        let joined = |_: &ObjectId, s: &PropertyDiff, t: &PropertyDiff| {
            Some(PropertyDiff {
                property: s.property.clone(),
                old: s.old.clone(),
                new: Some(json!(format!(
                    "{} / {}",
                    s.new.as_ref()?.as_str()?,
                    t.new.as_ref()?.as_str()?
                ))),
            })
        };

        let merged = three_way(&oid(), Some(&base), Some(&source), Some(&target), &joined)
            .unwrap()
            .unwrap();
        assert_eq!(merged.get("term"), Some(&json!("Cardiac / Heart structure")));
    }

    #[test]
    fn test_added_on_both_sides() {
        let conflicts = three_way(
            &oid(),
            None,
            Some(&concept("Heart")),
            Some(&concept("Liver")),
            &DefaultConflictProcessor,
        )
        .unwrap_err();
        assert_eq!(conflicts, vec![MergeConflict::AddedInSourceAndTarget { object: oid() }]);

        // Identical additions agree.
        let same = three_way(&oid(), None, Some(&concept("Heart")), Some(&concept("Heart")), &DefaultConflictProcessor);
        assert_eq!(same, Ok(Some(concept("Heart"))));
    }

    #[test]
    fn test_changed_and_deleted() {
        let base = concept("Heart");
        let changed = concept("Cardiac");

        let conflicts = three_way(&oid(), Some(&base), Some(&changed), None, &DefaultConflictProcessor)
            .unwrap_err();
        assert_eq!(
            conflicts,
            vec![MergeConflict::ChangedInSourceDeletedInTarget { object: oid() }]
        );

        let kept = three_way(&oid(), Some(&base), Some(&changed), None, &KeepSource);
        assert_eq!(kept, Ok(Some(changed.clone())));

        let deleted = three_way(&oid(), Some(&base), Some(&changed), None, &KeepTarget);
        assert_eq!(deleted, Ok(None));

        let conflicts = three_way(&oid(), Some(&base), None, Some(&changed), &DefaultConflictProcessor)
            .unwrap_err();
        assert_eq!(
            conflicts,
            vec![MergeConflict::ChangedInTargetDeletedInSource { object: oid() }]
        );
    }

    #[test]
    fn test_container_moves_merge() {
        let base = concept("Heart");
        let source = concept("Heart").with_container(ObjectId::new("module", "core"));
        let target = concept("Cardiac");

        let merged = three_way(&oid(), Some(&base), Some(&source), Some(&target), &DefaultConflictProcessor)
            .unwrap()
            .unwrap();
        assert_eq!(merged.container, Some(ObjectId::new("module", "core")));
        assert_eq!(merged.get("term"), Some(&json!("Cardiac")));
    }
}
