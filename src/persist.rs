//! On-disk snapshots of the whole store.
//!
//! A store directory holds a `MANIFEST` (magic + format version), an
//! exclusive `LOCK` file and `snapshot.bin`:
//!
//! ```text
//! magic (4) | version (1) | payload length (8, LE) | crc32 (4, LE) | payload
//! ```
//!
//! The payload is the MessagePack encoding of branches, revisions, commits
//! and merges. Snapshots are written to a temporary file and renamed into
//! place, so a crash never leaves a half-written snapshot behind.

use crate::branches::BranchIndex;
use crate::error::{Result, StoreError};
use crate::history::CommitLog;
use crate::merge::MergeLog;
use crate::revisions::RevisionArena;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

const STORE_MAGIC: &[u8; 4] = b"STR\0";
const STORE_VERSION: u8 = 1;

const SNAPSHOT_MAGIC: &[u8; 4] = b"SNP\0";
const SNAPSHOT_VERSION: u8 = 1;

pub(crate) const MANIFEST_FILE: &str = "MANIFEST";
pub(crate) const LOCK_FILE: &str = "LOCK";
pub(crate) const SNAPSHOT_FILE: &str = "snapshot.bin";

/// Borrowed view of the store state, encoded without cloning.
#[derive(Serialize)]
pub(crate) struct SnapshotRef<'a> {
    pub branches: &'a BranchIndex,
    pub revisions: &'a RevisionArena,
    pub commits: &'a CommitLog,
    pub merges: &'a MergeLog,
}

/// Decoded store state with derived indexes rebuilt.
#[derive(Deserialize)]
pub(crate) struct Snapshot {
    pub branches: BranchIndex,
    pub revisions: RevisionArena,
    pub commits: CommitLog,
    pub merges: MergeLog,
}

impl SnapshotRef<'_> {
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let payload = rmp_serde::to_vec(self)?;
        let checksum = crc32fast::hash(&payload);

        let tmp_path = dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(SNAPSHOT_MAGIC)?;
            file.write_all(&[SNAPSHOT_VERSION])?;
            file.write_all(&(payload.len() as u64).to_le_bytes())?;
            file.write_all(&checksum.to_le_bytes())?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, dir.join(SNAPSHOT_FILE))?;
        Ok(())
    }
}

impl Snapshot {
    /// Read the snapshot in `dir`, `None` if none was written yet.
    pub fn read_from(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(SNAPSHOT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid snapshot magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != SNAPSHOT_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported snapshot version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let expected = u32::from_le_bytes(checksum_bytes);

        let mut payload = vec![0u8; len];
        file.read_exact(&mut payload)?;
        let got = crc32fast::hash(&payload);
        if got != expected {
            return Err(StoreError::ChecksumMismatch { expected, got });
        }

        let mut snapshot: Snapshot = rmp_serde::from_slice(&payload)?;
        snapshot.revisions.rebuild_indexes();
        snapshot.commits.rebuild_indexes();
        Ok(Some(snapshot))
    }
}

pub(crate) fn write_manifest(dir: &Path) -> Result<()> {
    let mut file = File::create(dir.join(MANIFEST_FILE))?;
    file.write_all(STORE_MAGIC)?;
    file.write_all(&[STORE_VERSION])?;
    file.sync_all()?;
    Ok(())
}

pub(crate) fn verify_manifest(dir: &Path) -> Result<()> {
    let mut file = File::open(dir.join(MANIFEST_FILE))?;

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if &magic != STORE_MAGIC {
        return Err(StoreError::InvalidFormat("Invalid store magic".into()));
    }

    let mut version = [0u8; 1];
    file.read_exact(&mut version)?;
    if version[0] != STORE_VERSION {
        return Err(StoreError::InvalidFormat(format!(
            "Unsupported store version: {}",
            version[0]
        )));
    }
    Ok(())
}

/// Take the exclusive lock guarding a store directory.
pub(crate) fn acquire_lock(dir: &Path) -> Result<File> {
    let lock_file = File::create(dir.join(LOCK_FILE))?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| StoreError::Locked)?;
    Ok(lock_file)
}
