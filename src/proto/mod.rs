//! Protocol codec (C3): framed kernel<->daemon control messages.

mod argument;
mod attr;
mod codec;
mod message;

pub use attr::{AttrId, AttrValue};
pub use codec::{decode, encode};
pub use message::{Command, OpType, ProtocolMessage, FAMILY_VERSION};
