//! Directional comparison of two branch points.

use crate::revisions::{RevisionArena, View};
use crate::staging::{ChangeKind, CommitDetail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What `compare` has that `base` does not, grouped by document type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RevisionCompare {
    pub base: String,
    pub compare: String,
    pub new: BTreeMap<String, BTreeSet<String>>,
    pub changed: BTreeMap<String, BTreeSet<String>>,
    pub deleted: BTreeMap<String, BTreeSet<String>>,
    /// Per-object details, property diffs filled for changed objects.
    pub details: Vec<CommitDetail>,
}

impl RevisionCompare {
    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    pub fn total_new(&self) -> usize {
        self.new.values().map(BTreeSet::len).sum()
    }

    pub fn total_changed(&self) -> usize {
        self.changed.values().map(BTreeSet::len).sum()
    }

    pub fn total_deleted(&self) -> usize {
        self.deleted.values().map(BTreeSet::len).sum()
    }

    /// Compare `compare_view` against `base_view`. Only objects written in
    /// segments the base cannot see are candidates; a candidate whose content
    /// is the same in both views cancels out.
    pub(crate) fn compute(
        arena: &RevisionArena,
        base: &str,
        base_view: &View,
        compare: &str,
        compare_view: &View,
    ) -> Self {
        let mut result = RevisionCompare {
            base: base.to_string(),
            compare: compare.to_string(),
            ..Default::default()
        };

        let candidates: BTreeSet<_> = compare_view
            .segments()
            .difference(base_view.segments())
            .copied()
            .collect();

        for object in arena.objects_in(&candidates) {
            let before = arena.get(base_view, &object);
            let after = arena.get(compare_view, &object);

            let detail = match (before, after) {
                (None, None) => continue,
                (None, Some(doc)) => CommitDetail {
                    kind: ChangeKind::Added,
                    object: object.clone(),
                    container: doc.container.clone(),
                    properties: Vec::new(),
                },
                (Some(doc), None) => CommitDetail {
                    kind: ChangeKind::Removed,
                    object: object.clone(),
                    container: doc.container.clone(),
                    properties: Vec::new(),
                },
                (Some(old), Some(new)) => {
                    let properties = old.diff(new);
                    if properties.is_empty() {
                        continue;
                    }
                    CommitDetail {
                        kind: ChangeKind::Changed,
                        object: object.clone(),
                        container: new.container.clone(),
                        properties,
                    }
                }
            };

            let group = match detail.kind {
                ChangeKind::Added => &mut result.new,
                ChangeKind::Changed => &mut result.changed,
                ChangeKind::Removed => &mut result.deleted,
            };
            group
                .entry(object.doc_type.clone())
                .or_default()
                .insert(object.id.clone());
            result.details.push(detail);
        }

        result
    }
}
