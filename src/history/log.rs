//! Commit log with per-object and per-branch indexes.

use crate::staging::Commit;
use crate::types::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Every commit ever made, in append order.
///
/// Only `commits` is persisted; the lookup indexes are rebuilt on load.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CommitLog {
    commits: Vec<Commit>,
    #[serde(skip)]
    by_id: HashMap<String, usize>,
    #[serde(skip)]
    by_object: HashMap<ObjectId, Vec<usize>>,
    #[serde(skip)]
    by_branch: HashMap<String, Vec<usize>>,
}

impl CommitLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuild_indexes(&mut self) {
        self.by_id.clear();
        self.by_object.clear();
        self.by_branch.clear();
        for position in 0..self.commits.len() {
            self.index_commit(position);
        }
    }

    fn index_commit(&mut self, position: usize) {
        let commit = &self.commits[position];
        self.by_id.insert(commit.id.clone(), position);
        self.by_branch
            .entry(commit.branch.clone())
            .or_default()
            .push(position);

        let mut touched: Vec<&ObjectId> = Vec::new();
        for detail in &commit.details {
            touched.push(&detail.object);
            if let Some(container) = &detail.container {
                touched.push(container);
            }
        }
        touched.sort();
        touched.dedup();
        for object in touched {
            self.by_object
                .entry(object.clone())
                .or_default()
                .push(position);
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Append a commit. The caller guarantees the id is unused.
    pub fn append(&mut self, commit: Commit) {
        self.commits.push(commit);
        self.index_commit(self.commits.len() - 1);
    }

    pub fn get(&self, id: &str) -> Option<&Commit> {
        self.by_id.get(id).map(|&position| &self.commits[position])
    }

    /// Commits touching `object`, most recent first, each narrowed to the
    /// details about the object or its contents.
    pub fn history(&self, object: &ObjectId) -> Vec<Commit> {
        let positions = self.by_object.get(object).map(Vec::as_slice).unwrap_or(&[]);
        let mut commits: Vec<(usize, &Commit)> =
            positions.iter().map(|&p| (p, &self.commits[p])).collect();
        sort_newest_first(&mut commits);
        commits
            .into_iter()
            .map(|(_, commit)| commit.filtered_to(object))
            .collect()
    }

    /// Commits made on `branch`, most recent first.
    pub fn commits_on(&self, branch: &str) -> Vec<Commit> {
        let positions = self.by_branch.get(branch).map(Vec::as_slice).unwrap_or(&[]);
        let mut commits: Vec<(usize, &Commit)> =
            positions.iter().map(|&p| (p, &self.commits[p])).collect();
        sort_newest_first(&mut commits);
        commits.into_iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Commit> {
        self.commits.iter()
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

fn sort_newest_first(commits: &mut [(usize, &Commit)]) {
    commits.sort_by(|(pa, a), (pb, b)| b.timestamp.cmp(&a.timestamp).then(pb.cmp(pa)));
}
