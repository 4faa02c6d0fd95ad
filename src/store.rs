//! Permission store (C1): concurrent `FileId -> PermMask` table.
//!
//! `get` is the hot path, called once per intercepted syscall; it takes a
//! reader lock and never allocates. `set`/`remove`/`clear` are cold,
//! administrative-only paths that take the single writer lock.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::perm::{FileId, PermMask, INVALID_PERM};

/// A balanced ordered mapping from [`FileId`] to [`PermMask`], guarded by a
/// readers-writer lock. `BTreeMap` gives us the "balanced ordered map"
/// structure the reference design calls for directly, with `FileId`'s
/// `Ord` impl already lexicographic on `(fsid, ino)`.
#[derive(Debug, Default)]
pub struct PermStore {
    entries: RwLock<BTreeMap<FileId, PermMask>>,
}

impl PermStore {
    /// Create an empty store.
    pub fn new() -> Self {
        PermStore {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert or replace the mask for `(fsid, ino)`.
    ///
    /// Fails with [`Error::InvalidKey`] if either component is the sentinel
    /// "unknown" value; the store is left unmodified in that case.
    pub fn set(&self, fsid: u64, ino: u64, perm: PermMask) -> Result<()> {
        let key = FileId::new(fsid, ino);
        if key.is_sentinel() {
            return Err(Error::InvalidKey);
        }
        self.entries.write().insert(key, perm);
        Ok(())
    }

    /// Resolve `path` to a [`FileId`] via `host`, then [`set`](Self::set).
    pub fn set_path(&self, host: &dyn crate::host::HostFs, path: &str, perm: PermMask) -> Result<()> {
        let id = host.file_id(path.as_ref());
        if id.is_sentinel() {
            return Err(Error::PathResolution);
        }
        self.set(id.fsid, id.ino, perm)
    }

    /// Look up the mask for `(fsid, ino)`. Returns [`INVALID_PERM`] if absent.
    /// Never blocks a concurrent writer for longer than a map lookup, and
    /// never allocates.
    pub fn get(&self, fsid: u64, ino: u64) -> PermMask {
        let key = FileId::new(fsid, ino);
        self.entries
            .read()
            .get(&key)
            .copied()
            .unwrap_or(INVALID_PERM)
    }

    /// Remove the entry for `(fsid, ino)`, if present. No-op otherwise.
    pub fn remove(&self, fsid: u64, ino: u64) {
        let key = FileId::new(fsid, ino);
        self.entries.write().remove(&key);
    }

    /// Empty the store. Used when file protection is disabled.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of entries currently stored. For status reporting only.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
