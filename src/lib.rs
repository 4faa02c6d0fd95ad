//! `hackernel`: a host-based access-control engine.
//!
//! A privileged kernel-resident enforcement layer intercepts filesystem and
//! execve-family syscalls and consults this crate's policy tables to decide
//! whether each operation is allowed, denied, or audited. This crate is the
//! engine the kernel side and the `hackerneld` daemon both build on:
//!
//! - [`perm`] and [`store`] — the permission store (C1): a concurrent
//!   `(fsid, ino) -> PermMask` table.
//! - [`ticket`] — the execve ticket table (C2): a ticketed rendezvous
//!   between a blocking execve hook and the daemon's asynchronous verdict.
//! - [`proto`] — the protocol codec (C3): framed kernel<->daemon messages.
//! - [`dispatch`] and [`engine`] — enforcement dispatch (C4): per-syscall
//!   hooks that canonicalize, look up, decide, and report.
//! - [`control`] — the control plane (C5): handshake, inbound command
//!   dispatch, outbound NOTIFY events.
//! - [`transport`] — the kernel<->daemon wire transport.
//! - [`host`] — external collaborators (path resolution, file identity,
//!   privilege checks) behind traits, so the core stays testable without a
//!   real kernel.
//! - [`config`], [`cli`], [`operator`] — the daemon-side ambient stack:
//!   configuration, command-line parsing, and the local operator socket.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod cli;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod host;
pub mod operator;
pub mod perm;
pub mod proto;
pub mod store;
pub mod ticket;
pub mod transport;

pub use crate::control::Session;
pub use crate::dispatch::{Decision, FileNotify, HookResult, OpenMode};
pub use crate::engine::Engine;
pub use crate::error::{DecodeError, DecodeErrorKind, Error, Result};
pub use crate::host::{AdminCheck, HostFs, LinuxAdminCheck, LinuxHostFs};
pub use crate::perm::{FileId, OpClass, PermMask, BAD_FSID, BAD_INO, INVALID_PERM};
pub use crate::store::PermStore;
pub use crate::ticket::{Outcome, TicketTable, Verdict, EXECVE_TIMEOUT};
pub use crate::transport::{KernelChannel, MemoryChannel, NetlinkChannel, FAMILY_NAME};
