//! Error types shared across the permission store, protocol codec and
//! enforcement dispatch.

use std::error;
use std::fmt;
use std::io;

/// Errors that can escape the public API of this crate.
///
/// Every variant here corresponds to one of the error kinds enforcement
/// dispatch must recover from locally: nothing below this type is allowed to
/// propagate into a syscall path as anything other than a denial or a
/// pass-through allow.
#[derive(Debug)]
pub enum Error {
    /// A (fsid, ino) key used a sentinel value.
    InvalidKey,
    /// A path could not be resolved to an absolute, canonical form.
    PathResolution,
    /// A resource (memory, channel capacity) was unavailable.
    Resource(String),
    /// A wire message failed to decode.
    Decode(DecodeError),
    /// No administrative session is active.
    SessionAbsent,
    /// A bounded wait elapsed without a result.
    Timeout,
    /// Host I/O failure (filesystem, socket).
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidKey => write!(f, "invalid (fsid, ino) key"),
            Error::PathResolution => write!(f, "path could not be resolved"),
            Error::Resource(msg) => write!(f, "resource unavailable: {msg}"),
            Error::Decode(e) => write!(f, "decode error: {e}"),
            Error::SessionAbsent => write!(f, "no administrative session is active"),
            Error::Timeout => write!(f, "operation timed out"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

/// Reason a protocol message failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// The command id is not one of HANDSHAKE/FILE/PROCESS.
    UnknownCmd,
    /// A required attribute for this command was not present.
    MissingAttr,
    /// An attribute was present but carried the wrong wire type.
    TypeMismatch,
    /// The buffer ended before a length-prefixed field completed.
    Truncated,
}

/// Error decoding a [`ProtocolMessage`](crate::proto::ProtocolMessage) from wire bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeError {
    /// What went wrong.
    pub kind: DecodeErrorKind,
}

impl DecodeError {
    pub(crate) fn new(kind: DecodeErrorKind) -> Self {
        DecodeError { kind }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DecodeErrorKind::UnknownCmd => write!(f, "unknown command"),
            DecodeErrorKind::MissingAttr => write!(f, "missing required attribute"),
            DecodeErrorKind::TypeMismatch => write!(f, "attribute type mismatch"),
            DecodeErrorKind::Truncated => write!(f, "truncated message"),
        }
    }
}

impl error::Error for DecodeError {}

/// Convenience alias for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;
