//! The engine: wires the permission store, ticket table, protocol codec and
//! control plane together and exposes the enforcement hooks a syscall
//! interception point would call.
//!
//! This is the "single engine object" the re-architecture calls for: no
//! global mutable state, every dependency passed in at construction.

use std::sync::Arc;

use log::debug;

use crate::dispatch::{self, Decision, HookResult, OpenMode};
use crate::host::{AdminCheck, HostFs};
use crate::perm::PermMask;
use crate::store::PermStore;
use crate::ticket::{Outcome, TicketTable, EXECVE_TIMEOUT};
use crate::transport::KernelChannel;
use crate::control::Session;

/// Owns C1 (store), C2 (tickets) and C5 (session/control plane), and
/// exposes the per-syscall hook entry points of C4.
pub struct Engine {
    store: Arc<PermStore>,
    tickets: Arc<TicketTable>,
    host: Arc<dyn HostFs>,
    admin: Arc<dyn AdminCheck>,
    session: Session,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.store)
            .field("tickets", &self.tickets)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine from its dependencies. `host` and `admin` are the
    /// external collaborators named in the external-interfaces section;
    /// `channel` is the kernel<->daemon transport the control plane sends
    /// and receives framed messages over.
    pub fn new(
        host: Arc<dyn HostFs>,
        admin: Arc<dyn AdminCheck>,
        channel: Arc<dyn KernelChannel>,
    ) -> Self {
        let store = Arc::new(PermStore::new());
        let tickets = Arc::new(TicketTable::new());
        let session = Session::new(
            Arc::clone(&store),
            Arc::clone(&tickets),
            Arc::clone(&admin),
            channel,
        );
        Engine {
            store,
            tickets,
            host,
            admin,
            session,
        }
    }

    /// The control plane this engine's hooks report through.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The permission store, for the operator surface's `status` command.
    pub fn store(&self) -> &PermStore {
        &self.store
    }

    fn bypassed(&self, caller_pid: u32) -> bool {
        !self.session.is_active() || self.admin.is_trusted_admin(caller_pid)
    }

    fn apply(&self, result: HookResult) -> Decision {
        if let Some(notify) = result.notify {
            self.session.notify_file(&notify.path, notify.perm);
        }
        result.decision
    }

    /// `open`/`openat` on a path that already exists.
    pub fn check_open(
        &self,
        caller_pid: u32,
        dir: &str,
        user_path: &str,
        mode: OpenMode,
    ) -> Decision {
        if self.bypassed(caller_pid) {
            return Decision::Allow;
        }
        let Some(real_path) = self.resolve(dir, user_path) else {
            return Decision::Allow;
        };
        let id = self.host.file_id(&real_path);
        let perm = self.store.get(id.fsid, id.ino);
        self.apply(dispatch::decide_open(mode, perm, real_path))
    }

    /// `open(O_CREAT, ...)` on a path that does not yet exist.
    pub fn check_open_creat(
        &self,
        caller_pid: u32,
        dir: &str,
        user_path: &str,
        mode: OpenMode,
    ) -> Decision {
        if self.bypassed(caller_pid) {
            return Decision::Allow;
        }
        let Some(real_path) = self.resolve(dir, user_path) else {
            return Decision::Allow;
        };
        let target_id = self.host.file_id(&real_path);
        let target_perm = self.store.get(target_id.fsid, target_id.ino);
        let parent_path = self.host.parent_of(&real_path);
        let parent_id = self.host.file_id(&parent_path);
        let parent_perm = self.store.get(parent_id.fsid, parent_id.ino);
        self.apply(dispatch::decide_open_creat(
            mode,
            target_perm,
            real_path,
            parent_perm,
            parent_path,
        ))
    }

    /// `unlink`/`unlinkat`/`rmdir`.
    pub fn check_unlink(&self, caller_pid: u32, dir: &str, user_path: &str) -> Decision {
        if self.bypassed(caller_pid) {
            return Decision::Allow;
        }
        let Some(real_path) = self.resolve(dir, user_path) else {
            return Decision::Allow;
        };
        let id = self.host.file_id(&real_path);
        let perm = self.store.get(id.fsid, id.ino);
        let parent_path = self.host.parent_of(&real_path);
        let parent_id = self.host.file_id(&parent_path);
        let parent_perm = self.store.get(parent_id.fsid, parent_id.ino);
        let result = dispatch::decide_unlink(perm, real_path, parent_perm, parent_path);
        let decision = self.apply(result);
        // The only write path into C1 from enforcement: clean up before the
        // inode can be reused by a later, unrelated file.
        if decision == Decision::Allow && !id.is_sentinel() {
            self.store.remove(id.fsid, id.ino);
        }
        decision
    }

    /// `mkdir`, `mknod`, `link` (new name) or `symlink` (new name).
    pub fn check_create_under_parent(&self, caller_pid: u32, dir: &str, user_path: &str) -> Decision {
        if self.bypassed(caller_pid) {
            return Decision::Allow;
        }
        let Some(real_path) = self.resolve(dir, user_path) else {
            return Decision::Allow;
        };
        let parent_path = self.host.parent_of(&real_path);
        let parent_id = self.host.file_id(&parent_path);
        let parent_perm = self.store.get(parent_id.fsid, parent_id.ino);
        self.apply(dispatch::decide_create_under_parent(parent_perm, parent_path))
    }

    /// `rename`/`renameat`/`renameat2`.
    pub fn check_rename(
        &self,
        caller_pid: u32,
        src_dir: &str,
        src_user_path: &str,
        dst_dir: &str,
        dst_user_path: &str,
    ) -> Decision {
        if self.bypassed(caller_pid) {
            return Decision::Allow;
        }
        let (Some(src), Some(dst)) = (
            self.resolve(src_dir, src_user_path),
            self.resolve(dst_dir, dst_user_path),
        ) else {
            return Decision::Allow;
        };
        let src_id = self.host.file_id(&src);
        let src_perm = self.store.get(src_id.fsid, src_id.ino);
        let src_parent = self.host.parent_of(&src);
        let src_parent_id = self.host.file_id(&src_parent);
        let src_parent_perm = self.store.get(src_parent_id.fsid, src_parent_id.ino);

        let dst_id = self.host.file_id(&dst);
        let dst_perm = self.store.get(dst_id.fsid, dst_id.ino);
        let dst_parent = self.host.parent_of(&dst);
        let dst_parent_id = self.host.file_id(&dst_parent);
        let dst_parent_perm = self.store.get(dst_parent_id.fsid, dst_parent_id.ino);

        self.apply(dispatch::decide_rename(
            src_perm,
            src,
            src_parent_perm,
            src_parent,
            dst_perm,
            dst,
            dst_parent_perm,
            dst_parent,
        ))
    }

    /// `execve`/`execveat`: allocate a ticket, notify the daemon, and block
    /// up to [`EXECVE_TIMEOUT`] for a verdict. Fails open on timeout,
    /// `Invalid`, or an unknown ticket.
    pub fn check_execve(&self, caller_pid: u32, program_path: &str, argv: &[String]) -> Decision {
        if self.bypassed(caller_pid) {
            return Decision::Allow;
        }
        let argv_joined = self.host.read_user_argv(argv, MAX_ARG_STRLEN);
        let joined = join_program_and_argv(program_path, &argv_joined);
        let id = self.tickets.allocate();
        self.session.notify_process(id, &joined);
        match self.tickets.wait(id, EXECVE_TIMEOUT) {
            Outcome::Deny => Decision::Deny,
            Outcome::Allow | Outcome::Invalid => {
                debug!("execve ticket {id} resolved to allow/fail-open");
                Decision::Allow
            }
        }
    }

    fn resolve(&self, dir: &str, user_path: &str) -> Option<String> {
        let absolute = self.host.resolve_absolute(dir, user_path).ok()?;
        // Following symlinks is best-effort: on failure, proceed with the
        // original path rather than reject the operation.
        Some(
            self.host
                .resolve_real(&absolute)
                .unwrap_or(absolute),
        )
    }
}

/// Upper bound on the joined-argv string read from user memory, matching
/// the real kernel's own `MAX_ARG_STRLEN` (`PAGE_SIZE * 32`).
pub const MAX_ARG_STRLEN: usize = 4096 * 32;

/// Join a program path with its already-joined argv string, byte-exactly
/// matching the wire format `PROCESS NOTIFY` expects in its `NAME`
/// attribute: `program + 0x1F + joined-argv`.
fn join_program_and_argv(program_path: &str, argv_joined: &str) -> String {
    let mut out = String::from(program_path);
    out.push('\u{1f}');
    out.push_str(argv_joined);
    out
}

/// `PermMask` value a fresh `Engine` reports for an id that was never set —
/// re-exported here for callers that only import `engine`.
pub use crate::perm::INVALID_PERM;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{AdminCheck, HostFs};
    use crate::perm::{BAD_FSID, BAD_INO, FileId};
    use crate::transport::MemoryChannel;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeHost {
        ids: Mutex<HashMap<String, FileId>>,
    }

    impl FakeHost {
        fn new() -> Self {
            FakeHost {
                ids: Mutex::new(HashMap::new()),
            }
        }
        fn register(&self, path: &str, fsid: u64, ino: u64) {
            self.ids
                .lock()
                .unwrap()
                .insert(path.to_string(), FileId::new(fsid, ino));
        }
    }

    impl HostFs for FakeHost {
        fn resolve_absolute(&self, _dir: &str, user_path: &str) -> crate::error::Result<String> {
            Ok(user_path.to_string())
        }
        fn resolve_real(&self, path: &str) -> crate::error::Result<String> {
            Ok(path.to_string())
        }
        fn file_id(&self, path: &str) -> FileId {
            self.ids
                .lock()
                .unwrap()
                .get(path)
                .copied()
                .unwrap_or(FileId::new(BAD_FSID, BAD_INO))
        }
        fn parent_of(&self, path: &str) -> String {
            path.rsplit_once('/')
                .map(|(p, _)| if p.is_empty() { "/".to_string() } else { p.to_string() })
                .unwrap_or_default()
        }
    }

    struct NeverAdmin;
    impl AdminCheck for NeverAdmin {
        fn is_trusted_admin(&self, _pid: u32) -> bool {
            false
        }
        fn has_capability(&self, _uid: u32) -> bool {
            true
        }
    }

    fn engine_with_active_session(host: Arc<FakeHost>) -> Engine {
        let channel = Arc::new(MemoryChannel::new());
        let engine = Engine::new(host, Arc::new(NeverAdmin), channel);
        engine
            .session
            .handle_inbound(
                &crate::proto::ProtocolMessage::new(crate::proto::Command::Handshake)
                    .with_attr(crate::proto::AttrValue::SyscallTableHeader(1)),
                1234,
                0,
                &crate::host::LinuxHostFs,
            );
        engine
    }

    #[test]
    fn no_session_means_every_hook_allows() {
        let host = Arc::new(FakeHost::new());
        let channel = Arc::new(MemoryChannel::new());
        let engine = Engine::new(host, Arc::new(NeverAdmin), channel.clone());
        assert_eq!(
            engine.check_open(1, "/", "/etc/shadow", OpenMode::ReadOnly),
            Decision::Allow
        );
        assert!(channel.drain_outbound().is_empty());
    }

    #[test]
    fn read_deny_scenario() {
        let host = Arc::new(FakeHost::new());
        host.register("/data/secret", 10, 42);
        let engine = engine_with_active_session(Arc::clone(&host));
        engine.store.set(10, 42, PermMask::READ_DENY).unwrap();
        let decision = engine.check_open(999, "/", "/data/secret", OpenMode::ReadOnly);
        assert_eq!(decision, Decision::Deny);
    }

    #[test]
    fn unlink_cleans_store_after_allow() {
        let host = Arc::new(FakeHost::new());
        host.register("/data/f", 10, 42);
        host.register("/data", 10, 1);
        let engine = engine_with_active_session(Arc::clone(&host));
        engine.store.set(10, 42, PermMask::UNLINK_AUDIT).unwrap();
        let decision = engine.check_unlink(999, "/", "/data/f");
        assert_eq!(decision, Decision::Allow);
        assert_eq!(engine.store.get(10, 42), crate::perm::INVALID_PERM);
    }

    #[test]
    fn execve_times_out_to_allow() {
        let host = Arc::new(FakeHost::new());
        let engine = engine_with_active_session(host);
        let decision = engine.check_execve(999, "/bin/true", &[]);
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn execve_notify_joins_program_and_argv_through_the_host_service() {
        let channel = Arc::new(MemoryChannel::new());
        let engine = Engine::new(
            Arc::new(FakeHost::new()),
            Arc::new(NeverAdmin),
            channel.clone(),
        );
        engine.session.handle_inbound(
            &crate::proto::ProtocolMessage::new(crate::proto::Command::Handshake)
                .with_attr(crate::proto::AttrValue::SyscallTableHeader(1)),
            1234,
            0,
            &crate::host::LinuxHostFs,
        );
        channel.drain_outbound();

        engine.check_execve(999, "/bin/sh", &["-c".to_string(), "true".to_string()]);

        let outbound = channel.drain_outbound();
        assert_eq!(outbound.len(), 1);
        let notify = crate::proto::decode(&outbound[0]).unwrap();
        assert_eq!(notify.name(), Some("/bin/sh\u{1f}-c\u{1f}true"));
    }

    #[test]
    fn join_program_and_argv_matches_the_wire_convention() {
        assert_eq!(
            join_program_and_argv("/bin/sh", "-c\u{1f}true"),
            "/bin/sh\u{1f}-c\u{1f}true"
        );
    }
}
