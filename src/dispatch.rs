//! Enforcement dispatch (C4): pure decision logic for intercepted file
//! operations.
//!
//! This module only decides; it does not resolve paths, touch the
//! permission store, or send events — [`Engine`](crate::engine::Engine)
//! does that, so the decision procedure itself stays trivially testable.

use crate::perm::{OpClass, PermMask};

/// Outcome of a single hook invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Let the syscall proceed.
    Allow,
    /// Fail the syscall with "operation not permitted".
    Deny,
}

/// The path identity and permission bit a NOTIFY event should report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNotify {
    /// The path the matched entry concerns.
    pub path: String,
    /// The single bit (deny or audit) that matched.
    pub perm: PermMask,
}

/// The result of running the decision procedure: a verdict plus at most one
/// NOTIFY to emit, matching the "exactly-one-notify" invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookResult {
    /// Allow or deny.
    pub decision: Decision,
    /// The event to emit, if any.
    pub notify: Option<FileNotify>,
}

impl HookResult {
    fn allow() -> Self {
        HookResult {
            decision: Decision::Allow,
            notify: None,
        }
    }

    fn allow_with_notify(path: String, perm: PermMask) -> Self {
        HookResult {
            decision: Decision::Allow,
            notify: Some(FileNotify { path, perm }),
        }
    }

    fn deny(path: String, perm: PermMask) -> Self {
        HookResult {
            decision: Decision::Deny,
            notify: Some(FileNotify { path, perm }),
        }
    }
}

/// One point in a decision sequence: the operation class to check, the
/// permission mask currently installed at `path`, and `path` itself (for
/// the eventual NOTIFY).
#[derive(Debug, Clone)]
pub struct CheckPoint {
    /// Which deny/audit bit pair this checkpoint consults.
    pub class: OpClass,
    /// The mask installed at `path` (or [`crate::perm::INVALID_PERM`]).
    pub perm: PermMask,
    /// The path identity this checkpoint covers, carried into any NOTIFY.
    pub path: String,
}

impl CheckPoint {
    /// Convenience constructor.
    pub fn new(class: OpClass, perm: PermMask, path: impl Into<String>) -> Self {
        CheckPoint {
            class,
            perm,
            path: path.into(),
        }
    }
}

/// Evaluate `checkpoints` in order. The first checkpoint whose deny bit is
/// set short-circuits with `Deny`. If none deny, the first checkpoint whose
/// audit bit is set (if any) yields `Allow` with that NOTIFY; otherwise
/// plain `Allow`.
///
/// This single routine is the decision procedure for every file operation
/// class: a plain open checks one checkpoint, unlink checks two (entry,
/// then parent), rename checks four (source, source's parent, destination,
/// destination's parent) in that explicit order.
pub fn decide_sequence(checkpoints: &[CheckPoint]) -> HookResult {
    let mut first_audit: Option<(String, PermMask)> = None;
    for cp in checkpoints {
        let (deny_bit, audit_bit) = cp.class.bits();
        if cp.perm.contains(deny_bit) {
            return HookResult::deny(cp.path.clone(), deny_bit);
        }
        if first_audit.is_none() && cp.perm.contains(audit_bit) {
            first_audit = Some((cp.path.clone(), audit_bit));
        }
    }
    match first_audit {
        Some((path, perm)) => HookResult::allow_with_notify(path, perm),
        None => HookResult::allow(),
    }
}

/// Which access mode an `open`/`openat` call requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `O_RDONLY`
    ReadOnly,
    /// `O_WRONLY`
    WriteOnly,
    /// `O_RDWR`
    ReadWrite,
}

impl OpenMode {
    /// The operation class this mode checks against.
    pub const fn op_class(self) -> OpClass {
        match self {
            OpenMode::ReadOnly => OpClass::Read,
            OpenMode::WriteOnly => OpClass::Write,
            OpenMode::ReadWrite => OpClass::ReadWrite,
        }
    }
}

/// Decide a plain `open`/`openat` against an existing target.
pub fn decide_open(mode: OpenMode, perm: PermMask, path: impl Into<String>) -> HookResult {
    decide_sequence(&[CheckPoint::new(mode.op_class(), perm, path)])
}

/// Decide `open(O_CREAT, ...)` on a path that does not yet exist: the normal
/// read/write check on the (absent) target, then a WRITE check against the
/// parent directory.
pub fn decide_open_creat(
    mode: OpenMode,
    target_perm: PermMask,
    target_path: impl Into<String>,
    parent_perm: PermMask,
    parent_path: impl Into<String>,
) -> HookResult {
    decide_sequence(&[
        CheckPoint::new(mode.op_class(), target_perm, target_path),
        CheckPoint::new(OpClass::Write, parent_perm, parent_path),
    ])
}

/// Decide `unlink`/`unlinkat`/`rmdir`: UNLINK semantics on the entry, then
/// a WRITE check against the parent.
pub fn decide_unlink(
    entry_perm: PermMask,
    entry_path: impl Into<String>,
    parent_perm: PermMask,
    parent_path: impl Into<String>,
) -> HookResult {
    decide_sequence(&[
        CheckPoint::new(OpClass::Unlink, entry_perm, entry_path),
        CheckPoint::new(OpClass::Write, parent_perm, parent_path),
    ])
}

/// Decide `mkdir`/`mknod`/`link` (new name)/`symlink` (new name): a single
/// WRITE check against the parent directory the new name is created under.
pub fn decide_create_under_parent(
    parent_perm: PermMask,
    parent_path: impl Into<String>,
) -> HookResult {
    decide_sequence(&[CheckPoint::new(OpClass::Write, parent_perm, parent_path)])
}

/// Decide `rename`/`renameat`/`renameat2`: a RENAME check on the source,
/// WRITE on the source's parent, a RENAME check on the destination, WRITE
/// on the destination's parent — in that explicit order, first denial wins.
#[allow(clippy::too_many_arguments)]
pub fn decide_rename(
    src_perm: PermMask,
    src_path: impl Into<String>,
    src_parent_perm: PermMask,
    src_parent_path: impl Into<String>,
    dst_perm: PermMask,
    dst_path: impl Into<String>,
    dst_parent_perm: PermMask,
    dst_parent_path: impl Into<String>,
) -> HookResult {
    decide_sequence(&[
        CheckPoint::new(OpClass::Rename, src_perm, src_path),
        CheckPoint::new(OpClass::Write, src_parent_perm, src_parent_path),
        CheckPoint::new(OpClass::Rename, dst_perm, dst_path),
        CheckPoint::new(OpClass::Write, dst_parent_perm, dst_parent_path),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perm::INVALID_PERM;

    #[test]
    fn read_deny_denies_and_reports_its_bit() {
        let result = decide_open(OpenMode::ReadOnly, PermMask::READ_DENY, "/secret");
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(
            result.notify,
            Some(FileNotify {
                path: "/secret".into(),
                perm: PermMask::READ_DENY
            })
        );
    }

    #[test]
    fn write_audit_only_allows_and_notifies() {
        let result = decide_open(OpenMode::WriteOnly, PermMask::WRITE_AUDIT, "/f");
        assert_eq!(result.decision, Decision::Allow);
        assert_eq!(
            result.notify,
            Some(FileNotify {
                path: "/f".into(),
                perm: PermMask::WRITE_AUDIT
            })
        );
    }

    #[test]
    fn no_policy_allows_silently() {
        let result = decide_open(OpenMode::ReadOnly, INVALID_PERM, "/f");
        assert_eq!(result.decision, Decision::Allow);
        assert_eq!(result.notify, None);
    }

    #[test]
    fn deny_takes_precedence_over_audit_bits_on_same_entry() {
        let result = decide_open(
            OpenMode::ReadOnly,
            PermMask::READ_DENY | PermMask::READ_AUDIT,
            "/f",
        );
        assert_eq!(result.decision, Decision::Deny);
    }

    #[test]
    fn create_denied_by_parent() {
        let result = decide_open_creat(
            OpenMode::WriteOnly,
            INVALID_PERM,
            "/dir/foo",
            PermMask::WRITE_DENY,
            "/dir",
        );
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.notify.unwrap().path, "/dir");
    }

    #[test]
    fn rename_denied_by_destination_parent() {
        let result = decide_rename(
            INVALID_PERM,
            "/src",
            INVALID_PERM,
            "/",
            INVALID_PERM,
            "/dst",
            PermMask::WRITE_DENY,
            "/dst-parent",
        );
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.notify.unwrap().path, "/dst-parent");
    }

    #[test]
    fn rename_source_denial_short_circuits_before_destination_checks() {
        let result = decide_rename(
            PermMask::RENAME_DENY,
            "/src",
            INVALID_PERM,
            "/",
            PermMask::RENAME_DENY, // would also deny, but must not be reached
            "/dst",
            INVALID_PERM,
            "/",
        );
        assert_eq!(result.notify.unwrap().path, "/src");
    }

    #[test]
    fn unlink_allows_and_cleans_up_with_audit_notify() {
        let result = decide_unlink(PermMask::UNLINK_AUDIT, "/f", INVALID_PERM, "/");
        assert_eq!(result.decision, Decision::Allow);
        assert_eq!(result.notify.unwrap().perm, PermMask::UNLINK_AUDIT);
    }

    #[test]
    fn create_under_parent_allows_with_no_policy() {
        let result = decide_create_under_parent(INVALID_PERM, "/dir");
        assert_eq!(result.decision, Decision::Allow);
        assert_eq!(result.notify, None);
    }
}
