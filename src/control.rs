//! Control plane (C5): owns the kernel<->daemon message channel, performs
//! the handshake capability check, dispatches decoded inbound commands to
//! the permission store and ticket table, and emits outbound NOTIFY events.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use log::{info, warn};

use crate::host::{AdminCheck, HostFs};
use crate::perm::PermMask;
use crate::proto::{self, AttrValue, Command, OpType, ProtocolMessage};
use crate::store::PermStore;
use crate::ticket::{TicketTable, Verdict};
use crate::transport::KernelChannel;

/// `PERM` value an inbound PROCESS verdict reply uses to mean "allow".
pub const EXECVE_VERDICT_ALLOW: i32 = 1;
/// `PERM` value an inbound PROCESS verdict reply uses to mean "deny".
pub const EXECVE_VERDICT_DENY: i32 = 0;

/// The single active administrative session. Portid 0 means "no session";
/// enforcement hooks become no-ops in that state.
#[derive(Debug)]
pub struct Session {
    portid: AtomicU32,
    file_enabled: AtomicBool,
    process_enabled: AtomicBool,
    store: Arc<PermStore>,
    tickets: Arc<TicketTable>,
    admin: Arc<dyn AdminCheck>,
    channel: Arc<dyn KernelChannel>,
}

impl Session {
    /// Build a control plane with no active session.
    pub fn new(
        store: Arc<PermStore>,
        tickets: Arc<TicketTable>,
        admin: Arc<dyn AdminCheck>,
        channel: Arc<dyn KernelChannel>,
    ) -> Self {
        Session {
            portid: AtomicU32::new(0),
            file_enabled: AtomicBool::new(false),
            process_enabled: AtomicBool::new(false),
            store,
            tickets,
            admin,
            channel,
        }
    }

    /// The active peer's port id, or 0 if no session is active.
    pub fn portid(&self) -> u32 {
        self.portid.load(Ordering::SeqCst)
    }

    /// True while a session is active. Hooks consult this before touching
    /// the permission store at all.
    pub fn is_active(&self) -> bool {
        self.portid() != 0
    }

    /// True if file-protection hooks are (notionally) installed.
    pub fn file_enabled(&self) -> bool {
        self.file_enabled.load(Ordering::SeqCst)
    }

    /// True if execve-protection hooks are (notionally) installed.
    pub fn process_enabled(&self) -> bool {
        self.process_enabled.load(Ordering::SeqCst)
    }

    /// Handle one decoded inbound message, returning a reply to send back
    /// (handshake replies only — FILE/PROCESS dispatch is fire-and-forget).
    ///
    /// `peer_portid`/`peer_uid` are supplied by the transport layer out of
    /// band (the sender's address and credentials), not carried in the
    /// message payload.
    pub fn handle_inbound(
        &self,
        msg: &ProtocolMessage,
        peer_portid: u32,
        peer_uid: u32,
        host: &dyn HostFs,
    ) -> Option<ProtocolMessage> {
        match msg.command {
            Command::Handshake => Some(self.handle_handshake(msg, peer_portid, peer_uid)),
            Command::File => {
                self.handle_file(msg, host);
                None
            }
            Command::Process => {
                self.handle_process(msg);
                None
            }
        }
    }

    fn handle_handshake(
        &self,
        msg: &ProtocolMessage,
        peer_portid: u32,
        peer_uid: u32,
    ) -> ProtocolMessage {
        if msg.syscall_table_header().is_none() {
            // A HANDSHAKE reply looped back to us, or a malformed request;
            // either way this is not something we act on.
            return ProtocolMessage::new(Command::Handshake).with_attr(AttrValue::StatusCode(-1));
        }
        if self.admin.has_capability(peer_uid) {
            self.portid.store(peer_portid, Ordering::SeqCst);
            info!("handshake accepted from portid {peer_portid}");
            ProtocolMessage::new(Command::Handshake).with_attr(AttrValue::StatusCode(0))
        } else {
            warn!("handshake rejected: peer uid {peer_uid} lacks the administrator capability");
            ProtocolMessage::new(Command::Handshake).with_attr(AttrValue::StatusCode(-1))
        }
    }

    fn handle_file(&self, msg: &ProtocolMessage, host: &dyn HostFs) {
        let Some(op) = msg.op_type().and_then(|b| OpType::try_from(b).ok()) else {
            warn!("FILE message with unrecognized OP_TYPE, dropped");
            return;
        };
        match op {
            OpType::Enable => {
                self.store.clear();
                self.file_enabled.store(true, Ordering::SeqCst);
            }
            OpType::Disable => {
                self.file_enabled.store(false, Ordering::SeqCst);
                self.store.clear();
            }
            OpType::Set => {
                let (Some(name), Some(perm)) = (msg.name(), msg.perm()) else {
                    warn!("FILE SET missing NAME or PERM, dropped");
                    return;
                };
                if let Err(e) = self
                    .store
                    .set_path(host, name, PermMask::from_bits_truncate(perm))
                {
                    warn!("FILE SET for {name:?} failed: {e}");
                }
            }
            OpType::Notify => {
                warn!("inbound FILE NOTIFY is invalid, dropped");
            }
        }
    }

    fn handle_process(&self, msg: &ProtocolMessage) {
        let Some(op) = msg.op_type().and_then(|b| OpType::try_from(b).ok()) else {
            warn!("PROCESS message with unrecognized OP_TYPE, dropped");
            return;
        };
        match op {
            OpType::Enable => self.process_enabled.store(true, Ordering::SeqCst),
            OpType::Disable => self.process_enabled.store(false, Ordering::SeqCst),
            OpType::Notify => {
                let (Some(id), Some(perm)) = (msg.execve_id(), msg.perm()) else {
                    warn!("PROCESS verdict missing EXECVE_ID or PERM, dropped");
                    return;
                };
                let verdict = if perm == EXECVE_VERDICT_ALLOW {
                    Verdict::Allow
                } else {
                    Verdict::Deny
                };
                self.tickets.resolve(id as u32, verdict);
            }
            OpType::Set => warn!("PROCESS SET is not a recognized operation, dropped"),
        }
    }

    /// Emit a FILE NOTIFY for the active session. Fire-and-forget: failures
    /// are logged and otherwise ignored.
    pub fn notify_file(&self, path: &str, perm: PermMask) {
        if !self.is_active() {
            return;
        }
        let msg = ProtocolMessage::new(Command::File)
            .with_attr(AttrValue::OpType(OpType::Notify.into()))
            .with_attr(AttrValue::Name(path.to_string()))
            .with_attr(AttrValue::Perm(perm.bits()));
        self.send(&msg);
    }

    /// Emit a PROCESS NOTIFY (an execve decision request) for the active
    /// session.
    pub fn notify_process(&self, execve_id: u32, program_and_argv: &str) {
        if !self.is_active() {
            return;
        }
        let msg = ProtocolMessage::new(Command::Process)
            .with_attr(AttrValue::OpType(OpType::Notify.into()))
            .with_attr(AttrValue::ExecveId(execve_id as i32))
            .with_attr(AttrValue::Name(program_and_argv.to_string()));
        self.send(&msg);
    }

    /// Emit a zero-payload HANDSHAKE-family keepalive (C6) for the active
    /// session, so each side can notice the other has gone away. A no-op
    /// without an active session — there is no portid to keep alive.
    pub fn notify_heartbeat(&self) {
        if !self.is_active() {
            return;
        }
        let msg =
            ProtocolMessage::new(Command::Handshake).with_attr(AttrValue::SyscallTableHeader(0));
        self.send(&msg);
    }

    fn send(&self, msg: &ProtocolMessage) {
        let wire = proto::encode(msg);
        if let Err(e) = self.channel.send(&wire) {
            warn!("failed to send {:?}: {e}", msg.command);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LinuxHostFs;
    use crate::transport::MemoryChannel;

    fn session_with(admin_allows: bool) -> (Session, Arc<MemoryChannel>) {
        struct Fixed(bool);
        impl AdminCheck for Fixed {
            fn is_trusted_admin(&self, _pid: u32) -> bool {
                false
            }
            fn has_capability(&self, _uid: u32) -> bool {
                self.0
            }
        }
        let chan = Arc::new(MemoryChannel::new());
        let session = Session::new(
            Arc::new(PermStore::new()),
            Arc::new(TicketTable::new()),
            Arc::new(Fixed(admin_allows)),
            chan.clone(),
        );
        (session, chan)
    }

    #[test]
    fn handshake_from_admin_activates_session() {
        let (session, _chan) = session_with(true);
        let req = ProtocolMessage::new(Command::Handshake)
            .with_attr(AttrValue::SyscallTableHeader(42));
        let reply = session
            .handle_inbound(&req, 77, 0, &LinuxHostFs)
            .unwrap();
        assert_eq!(reply.status_code(), Some(0));
        assert_eq!(session.portid(), 77);
        assert!(session.is_active());
    }

    #[test]
    fn handshake_without_capability_leaves_portid_unchanged() {
        let (session, _chan) = session_with(false);
        let req = ProtocolMessage::new(Command::Handshake)
            .with_attr(AttrValue::SyscallTableHeader(42));
        let reply = session
            .handle_inbound(&req, 77, 1000, &LinuxHostFs)
            .unwrap();
        assert_ne!(reply.status_code(), Some(0));
        assert_eq!(session.portid(), 0);
        assert!(!session.is_active());
    }

    #[test]
    fn process_notify_resolves_the_matching_ticket() {
        let (session, _chan) = session_with(true);
        let id = session.tickets.allocate();
        let msg = ProtocolMessage::new(Command::Process)
            .with_attr(AttrValue::OpType(OpType::Notify.into()))
            .with_attr(AttrValue::ExecveId(id as i32))
            .with_attr(AttrValue::Perm(EXECVE_VERDICT_DENY));
        session.handle_inbound(&msg, 0, 0, &LinuxHostFs);
        assert_eq!(
            session.tickets.wait(id, crate::ticket::EXECVE_TIMEOUT),
            crate::ticket::Outcome::Deny
        );
    }

    #[test]
    fn notify_file_is_a_noop_without_an_active_session() {
        let (session, chan) = session_with(true);
        session.notify_file("/etc/passwd", PermMask::READ_DENY);
        assert!(chan.drain_outbound().is_empty());
    }

    #[test]
    fn file_disable_clears_the_store() {
        let (session, _chan) = session_with(true);
        session.store.set(10, 42, PermMask::READ_DENY).unwrap();
        let msg = ProtocolMessage::new(Command::File)
            .with_attr(AttrValue::OpType(OpType::Disable.into()));
        session.handle_inbound(&msg, 0, 0, &LinuxHostFs);
        assert!(session.store.is_empty());
        assert!(!session.file_enabled());
    }

    #[test]
    fn notify_heartbeat_sends_a_zero_payload_handshake() {
        let (session, chan) = session_with(true);
        let req = ProtocolMessage::new(Command::Handshake)
            .with_attr(AttrValue::SyscallTableHeader(42));
        session.handle_inbound(&req, 77, 0, &LinuxHostFs);
        chan.drain_outbound(); // discard the handshake reply

        session.notify_heartbeat();

        let outbound = chan.drain_outbound();
        assert_eq!(outbound.len(), 1);
        let sent = proto::decode(&outbound[0]).unwrap();
        assert_eq!(sent.command, Command::Handshake);
        assert_eq!(sent.syscall_table_header(), Some(0));
    }

    #[test]
    fn notify_heartbeat_is_a_noop_without_an_active_session() {
        let (session, chan) = session_with(true);
        session.notify_heartbeat();
        assert!(chan.drain_outbound().is_empty());
    }
}
