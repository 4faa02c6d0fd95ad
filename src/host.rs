//! Host services the enforcement core depends on but does not implement
//! itself: path resolution, file identity, and process privilege checks.
//!
//! These are exactly the external collaborators named as out of scope for
//! the core — syscall-table discovery and patching, canonicalization
//! against the live filesystem, and bootstrap. Dispatch and the control
//! plane depend on the traits here, not on any concrete OS, so tests can
//! substitute fixtures.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::perm::FileId;

/// Filesystem-facing services: path canonicalization and file identity.
pub trait HostFs: Send + Sync {
    /// Combine a directory handle's path with a (possibly relative)
    /// user-supplied path, returning an absolute path. `dir` is already an
    /// absolute directory path — resolving a raw dirfd to a path is the
    /// caller's job (typically `/proc/self/fd/<fd>` on Linux).
    fn resolve_absolute(&self, dir: &str, user_path: &str) -> Result<String>;

    /// Follow symlinks to the real path. On failure, the caller should
    /// proceed with the original path rather than propagate an error.
    fn resolve_real(&self, path: &str) -> Result<String>;

    /// Produce a [`FileId`] for `path`. Returns a sentinel id (never an
    /// error) if the path cannot be stat'd, matching the reference
    /// contract: callers treat "unknown" as data, not failure.
    fn file_id(&self, path: &str) -> FileId;

    /// The lexical parent directory of `path`. Purely syntactic — does not
    /// touch the filesystem.
    fn parent_of(&self, path: &str) -> String;

    /// Read a process's argv from user memory, joined with the protocol's
    /// 0x1F unit-separator convention and truncated to at most `max_len`
    /// bytes. `argv` stands in for the raw user-memory pointer a real
    /// kernel hook would `copy_from_user` through; callers that already
    /// hold decoded argument strings (as every implementation in this
    /// crate does) pass them straight through.
    fn read_user_argv(&self, argv: &[String], max_len: usize) -> String {
        join_and_truncate_argv(argv, max_len)
    }
}

/// Join `argv` with 0x1F separators, truncating the result to `max_len`
/// bytes at a UTF-8 character boundary.
pub(crate) fn join_and_truncate_argv(argv: &[String], max_len: usize) -> String {
    let mut out = String::new();
    for (i, arg) in argv.iter().enumerate() {
        if i > 0 {
            out.push('\u{1f}');
        }
        out.push_str(arg);
    }
    truncate_to_byte_len(&out, max_len)
}

fn truncate_to_byte_len(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Process-privilege services gating the control plane.
pub trait AdminCheck: Send + Sync {
    /// True if `pid` is the daemon's own process or a descendant of it,
    /// exempt from enforcement to avoid self-deadlock.
    fn is_trusted_admin(&self, pid: u32) -> bool;

    /// True if the peer identified by `uid` holds the host's administrator
    /// capability, gating handshake acceptance.
    fn has_capability(&self, uid: u32) -> bool;
}

/// `HostFs` backed by the real filesystem via `std::fs`/`nix`.
#[derive(Debug, Default)]
pub struct LinuxHostFs;

impl HostFs for LinuxHostFs {
    fn resolve_absolute(&self, dir: &str, user_path: &str) -> Result<String> {
        let user = Path::new(user_path);
        let combined = if user.is_absolute() {
            user.to_path_buf()
        } else {
            Path::new(dir).join(user)
        };
        Ok(lexically_normalize(&combined).to_string_lossy().into_owned())
    }

    fn resolve_real(&self, path: &str) -> Result<String> {
        fs::canonicalize(path)
            .map(|p| p.to_string_lossy().into_owned())
            .map_err(|_| Error::PathResolution)
    }

    fn file_id(&self, path: &str) -> FileId {
        match fs::symlink_metadata(path) {
            Ok(meta) => FileId::new(meta.dev(), meta.ino()),
            Err(_) => FileId::new(crate::perm::BAD_FSID, crate::perm::BAD_INO),
        }
    }

    fn parent_of(&self, path: &str) -> String {
        Path::new(path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Collapse `.`/`..` components lexically, without touching the filesystem.
fn lexically_normalize(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `AdminCheck` backed by `/proc` pid/ppid chains.
#[derive(Debug)]
pub struct LinuxAdminCheck {
    daemon_pid: u32,
}

impl LinuxAdminCheck {
    /// Build an `AdminCheck` rooted at the daemon's own pid.
    pub fn new(daemon_pid: u32) -> Self {
        LinuxAdminCheck { daemon_pid }
    }

    fn parent_pid(pid: u32) -> Option<u32> {
        let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        // Fields after the executable name (in parens, which may itself
        // contain spaces/parens) are space separated; ppid is field 4.
        let after_comm = stat.rsplit_once(')')?.1;
        after_comm.split_whitespace().nth(1)?.parse().ok()
    }
}

impl AdminCheck for LinuxAdminCheck {
    fn is_trusted_admin(&self, pid: u32) -> bool {
        let mut cur = pid;
        for _ in 0..64 {
            if cur == self.daemon_pid {
                return true;
            }
            match Self::parent_pid(cur) {
                Some(0) | None => return false,
                Some(parent) => cur = parent,
            }
        }
        false
    }

    fn has_capability(&self, uid: u32) -> bool {
        uid == 0
    }
}
