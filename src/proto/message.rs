//! Framed control messages exchanged between the kernel enforcement layer
//! and the user-space daemon.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::attr::AttrValue;

/// The only family-version this codec speaks.
pub const FAMILY_VERSION: u8 = 1;

/// Top-level command a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Command {
    /// Session establishment.
    Handshake = 1,
    /// File-protection enable/disable/install/notify.
    File = 2,
    /// Process (execve) protection toggle, request and verdict.
    Process = 3,
}

/// The `OP_TYPE` attribute's enumerated values, shared by FILE and PROCESS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum OpType {
    /// Turn the corresponding hook family on, resetting its store.
    Enable = 1,
    /// Turn the corresponding hook family off, clearing its store.
    Disable = 2,
    /// Install a (path, perm-mask) entry. FILE only.
    Set = 3,
    /// An event: FILE audit/deny report outbound, or (PROCESS) an execve
    /// decision request outbound / verdict reply inbound.
    Notify = 4,
}

/// A decoded control message: a command plus its typed attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    /// Wire family version; always [`FAMILY_VERSION`] for messages this
    /// codec produces.
    pub family_version: u8,
    /// The command family.
    pub command: Command,
    /// Attributes present on this message, in encounter order.
    pub attrs: Vec<AttrValue>,
}

impl ProtocolMessage {
    /// Build a message with no attributes yet.
    pub fn new(command: Command) -> Self {
        ProtocolMessage {
            family_version: FAMILY_VERSION,
            command,
            attrs: Vec::new(),
        }
    }

    /// Append an attribute, builder-style.
    pub fn with_attr(mut self, attr: AttrValue) -> Self {
        self.attrs.push(attr);
        self
    }

    /// First `STATUS_CODE` attribute, if any.
    pub fn status_code(&self) -> Option<i32> {
        self.attrs.iter().find_map(|a| match a {
            AttrValue::StatusCode(v) => Some(*v),
            _ => None,
        })
    }

    /// First `OP_TYPE` attribute, if any.
    pub fn op_type(&self) -> Option<u8> {
        self.attrs.iter().find_map(|a| match a {
            AttrValue::OpType(v) => Some(*v),
            _ => None,
        })
    }

    /// First `NAME` attribute, if any.
    pub fn name(&self) -> Option<&str> {
        self.attrs.iter().find_map(|a| match a {
            AttrValue::Name(v) => Some(v.as_str()),
            _ => None,
        })
    }

    /// First `PERM` attribute, if any.
    pub fn perm(&self) -> Option<i32> {
        self.attrs.iter().find_map(|a| match a {
            AttrValue::Perm(v) => Some(*v),
            _ => None,
        })
    }

    /// First `EXECVE_ID` attribute, if any.
    pub fn execve_id(&self) -> Option<i32> {
        self.attrs.iter().find_map(|a| match a {
            AttrValue::ExecveId(v) => Some(*v),
            _ => None,
        })
    }

    /// First `SYSCALL_TABLE_HEADER` attribute, if any.
    pub fn syscall_table_header(&self) -> Option<u64> {
        self.attrs.iter().find_map(|a| match a {
            AttrValue::SyscallTableHeader(v) => Some(*v),
            _ => None,
        })
    }
}
