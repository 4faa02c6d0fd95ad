//! Identifiers and permission bits for the access-control core.

use std::fmt;

use bitflags::bitflags;

/// Sentinel filesystem id meaning "unknown".
pub const BAD_FSID: u64 = 0;
/// Sentinel inode number meaning "unknown".
pub const BAD_INO: u64 = 0;

/// A (filesystem-id, inode-number) pair uniquely identifying a filesystem
/// object on this host.
///
/// Ordering is lexicographic on `(fsid, ino)`, matching the balanced ordered
/// map the permission store is specified against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serializable", derive(serde::Serialize, serde::Deserialize))]
pub struct FileId {
    /// Identifies the mounted filesystem.
    pub fsid: u64,
    /// Identifies the inode within that filesystem.
    pub ino: u64,
}

impl FileId {
    /// Build a `FileId`, without checking for sentinel values.
    pub const fn new(fsid: u64, ino: u64) -> Self {
        FileId { fsid, ino }
    }

    /// Returns true if either component is the "unknown" sentinel, making
    /// this id ineligible to be stored.
    pub const fn is_sentinel(self) -> bool {
        self.fsid == BAD_FSID || self.ino == BAD_INO
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.fsid, self.ino)
    }
}

bitflags! {
    /// Per-entry policy bits. Deny bits block the corresponding operation
    /// outright; audit bits only request a NOTIFY event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PermMask: i32 {
        /// Deny read-only opens.
        const READ_DENY = 1 << 0;
        /// Deny write-only opens, and writes to a directory's children.
        const WRITE_DENY = 1 << 1;
        /// Deny read-write opens.
        const RDWR_DENY = 1 << 2;
        /// Deny unlink/rmdir against this entry.
        const UNLINK_DENY = 1 << 3;
        /// Deny rename source or destination against this entry.
        const RENAME_DENY = 1 << 4;
        /// Emit an audit event on read-only opens.
        const READ_AUDIT = 1 << 5;
        /// Emit an audit event on write-only opens.
        const WRITE_AUDIT = 1 << 6;
        /// Emit an audit event on read-write opens.
        const RDWR_AUDIT = 1 << 7;
        /// Emit an audit event on unlink/rmdir.
        const UNLINK_AUDIT = 1 << 8;
        /// Emit an audit event on rename.
        const RENAME_AUDIT = 1 << 9;
    }
}

impl fmt::Display for PermMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.bits())
    }
}

/// Sentinel mask meaning "no entry present". A fresh lookup against an
/// absent key returns this value rather than an `Option`, matching the
/// reference store's `get`.
pub const INVALID_PERM: PermMask = PermMask::empty();

/// The class of operation a hook is checking, used to select which deny/audit
/// bit pair applies. Mirrors the operation classes in the decision procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    /// open(O_RDONLY)
    Read,
    /// open(O_WRONLY)
    Write,
    /// open(O_RDWR)
    ReadWrite,
    /// unlink, unlinkat, rmdir
    Unlink,
    /// rename{,at,at2}
    Rename,
}

impl OpClass {
    /// The (deny, audit) bit pair this operation class checks.
    pub const fn bits(self) -> (PermMask, PermMask) {
        match self {
            OpClass::Read => (PermMask::READ_DENY, PermMask::READ_AUDIT),
            OpClass::Write => (PermMask::WRITE_DENY, PermMask::WRITE_AUDIT),
            OpClass::ReadWrite => (PermMask::RDWR_DENY, PermMask::RDWR_AUDIT),
            OpClass::Unlink => (PermMask::UNLINK_DENY, PermMask::UNLINK_AUDIT),
            OpClass::Rename => (PermMask::RENAME_DENY, PermMask::RENAME_AUDIT),
        }
    }
}
