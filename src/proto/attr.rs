//! Typed attributes carried by a [`ProtocolMessage`](super::ProtocolMessage).

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Wire id of an attribute TLV entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum AttrId {
    /// i32, handshake reply / SET reply status.
    StatusCode = 1,
    /// u8, FILE/PROCESS operation selector.
    OpType = 2,
    /// UTF-8 string, a path (FILE) or program+argv (PROCESS).
    Name = 3,
    /// i32, a permission mask or (for PROCESS) an execve verdict code.
    Perm = 4,
    /// i32, execve ticket id.
    ExecveId = 5,
    /// u64, handshake request payload.
    SyscallTableHeader = 6,
}

/// A decoded, typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    /// `STATUS_CODE`
    StatusCode(i32),
    /// `OP_TYPE`
    OpType(u8),
    /// `NAME`
    Name(String),
    /// `PERM`
    Perm(i32),
    /// `EXECVE_ID`
    ExecveId(i32),
    /// `SYSCALL_TABLE_HEADER`
    SyscallTableHeader(u64),
}

impl AttrValue {
    /// The wire id this value encodes as.
    pub fn id(&self) -> AttrId {
        match self {
            AttrValue::StatusCode(_) => AttrId::StatusCode,
            AttrValue::OpType(_) => AttrId::OpType,
            AttrValue::Name(_) => AttrId::Name,
            AttrValue::Perm(_) => AttrId::Perm,
            AttrValue::ExecveId(_) => AttrId::ExecveId,
            AttrValue::SyscallTableHeader(_) => AttrId::SyscallTableHeader,
        }
    }
}
