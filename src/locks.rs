//! Per-branch lock table and read pins.

use crate::error::{Result, StoreError};
use crate::revisions::View;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Serializes operations per branch path.
///
/// Multi-path acquisition is all-or-nothing, so two operations that need
/// overlapping sets of branches can never deadlock on each other.
#[derive(Default)]
pub struct PathLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, path: &str, timeout: Duration) -> Result<PathGuard<'_>> {
        self.lock_all(&[path], timeout)
    }

    /// Lock every path in `paths`, waiting at most `timeout` for all of them
    /// to be free at once.
    pub fn lock_all(&self, paths: &[&str], timeout: Duration) -> Result<PathGuard<'_>> {
        let paths: Vec<String> = paths
            .iter()
            .map(|p| p.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let deadline = Instant::now() + timeout;

        let mut held = self.held.lock();
        while paths.iter().any(|p| held.contains(p)) {
            if self.released.wait_until(&mut held, deadline).timed_out()
                && paths.iter().any(|p| held.contains(p))
            {
                return Err(StoreError::Timeout(format!(
                    "lock on {} not acquired within {:?}",
                    paths.join(", "),
                    timeout
                )));
            }
        }
        for path in &paths {
            held.insert(path.clone());
        }

        Ok(PathGuard { locks: self, paths })
    }

    pub fn is_locked(&self, path: &str) -> bool {
        self.held.lock().contains(path)
    }
}

/// Releases its paths on drop.
pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    paths: Vec<String>,
}

impl PathGuard<'_> {
    pub fn paths(&self) -> &[String] {
        &self.paths
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock();
        for path in &self.paths {
            held.remove(path);
        }
        self.locks.released.notify_all();
    }
}

/// Views held by in-flight reads. Purge keeps everything a pinned view sees.
#[derive(Default)]
pub struct Pins {
    views: Mutex<HashMap<u64, View>>,
    next_id: AtomicU64,
}

impl Pins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin(&self, view: View) -> PinGuard<'_> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.views.lock().insert(id, view);
        PinGuard { pins: self, id }
    }

    pub fn views(&self) -> Vec<View> {
        self.views.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.views.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.lock().is_empty()
    }
}

pub struct PinGuard<'a> {
    pins: &'a Pins,
    id: u64,
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        self.pins.views.lock().remove(&self.id);
    }
}
