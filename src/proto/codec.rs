//! Encode and decode [`ProtocolMessage`]s to/from the wire format.
//!
//! Wire shape (all integers little-endian, every field byte-aligned so the
//! decoder never needs to assume anything about the buffer's alignment):
//!
//! ```text
//! message  := family_version:u8 command:u8 attr_count:u16 attr*
//! attr     := id:u8 len:u16 value[len]
//! ```
//!
//! `len` is the byte length of `value`; fixed-size attributes (`i32`, `u8`,
//! `u64`) are stored as their little-endian bytes, `NAME` as raw UTF-8 bytes
//! (not zero-terminated, since argv joins embed no NUL but may be long).

use super::argument::ArgumentIterator;
use super::attr::{AttrId, AttrValue};
use super::message::{Command, ProtocolMessage, FAMILY_VERSION};
use crate::error::{DecodeError, DecodeErrorKind};

/// Encode `msg` to its wire representation.
pub fn encode(msg: &ProtocolMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + msg.attrs.len() * 8);
    out.push(msg.family_version);
    out.push(msg.command.into());
    out.extend_from_slice(&(msg.attrs.len() as u16).to_le_bytes());
    for attr in &msg.attrs {
        encode_attr(&mut out, attr);
    }
    out
}

fn encode_attr(out: &mut Vec<u8>, attr: &AttrValue) {
    let id: u8 = attr.id().into();
    let value = attr_value_bytes(attr);
    out.push(id);
    out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    out.extend_from_slice(&value);
}

fn attr_value_bytes(attr: &AttrValue) -> Vec<u8> {
    match attr {
        AttrValue::StatusCode(v) => v.to_le_bytes().to_vec(),
        AttrValue::OpType(v) => vec![*v],
        AttrValue::Name(v) => v.as_bytes().to_vec(),
        AttrValue::Perm(v) => v.to_le_bytes().to_vec(),
        AttrValue::ExecveId(v) => v.to_le_bytes().to_vec(),
        AttrValue::SyscallTableHeader(v) => v.to_le_bytes().to_vec(),
    }
}

/// Decode a [`ProtocolMessage`] from `data`, validating the attribute schema
/// for the decoded command.
pub fn decode(data: &[u8]) -> Result<ProtocolMessage, DecodeError> {
    let mut it = ArgumentIterator::new(data);
    let family_version: &u8 = it
        .fetch()
        .ok_or(DecodeError::new(DecodeErrorKind::Truncated))?;
    let command_byte: &u8 = it
        .fetch()
        .ok_or(DecodeError::new(DecodeErrorKind::Truncated))?;
    let command = Command::try_from(*command_byte)
        .map_err(|_| DecodeError::new(DecodeErrorKind::UnknownCmd))?;
    let count_bytes: &[u8] = it
        .fetch_slice(2)
        .ok_or(DecodeError::new(DecodeErrorKind::Truncated))?;
    let attr_count = u16::from_le_bytes([count_bytes[0], count_bytes[1]]);

    let mut attrs = Vec::with_capacity(attr_count as usize);
    for _ in 0..attr_count {
        attrs.push(decode_attr(&mut it)?);
    }

    let msg = ProtocolMessage {
        family_version: *family_version,
        command,
        attrs,
    };
    validate_schema(&msg)?;
    Ok(msg)
}

fn decode_attr(it: &mut ArgumentIterator<'_>) -> Result<AttrValue, DecodeError> {
    let id_byte: &u8 = it
        .fetch()
        .ok_or(DecodeError::new(DecodeErrorKind::Truncated))?;
    let id = AttrId::try_from(*id_byte).map_err(|_| DecodeError::new(DecodeErrorKind::TypeMismatch))?;
    let len_bytes: &[u8] = it
        .fetch_slice(2)
        .ok_or(DecodeError::new(DecodeErrorKind::Truncated))?;
    let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let value: &[u8] = it
        .fetch_slice(len)
        .ok_or(DecodeError::new(DecodeErrorKind::Truncated))?;

    let type_mismatch = || DecodeError::new(DecodeErrorKind::TypeMismatch);
    match id {
        AttrId::StatusCode => Ok(AttrValue::StatusCode(i32::from_le_bytes(
            value.try_into().map_err(|_| type_mismatch())?,
        ))),
        AttrId::OpType => {
            if value.len() != 1 {
                return Err(type_mismatch());
            }
            Ok(AttrValue::OpType(value[0]))
        }
        AttrId::Name => {
            let s = std::str::from_utf8(value).map_err(|_| type_mismatch())?;
            Ok(AttrValue::Name(s.to_string()))
        }
        AttrId::Perm => Ok(AttrValue::Perm(i32::from_le_bytes(
            value.try_into().map_err(|_| type_mismatch())?,
        ))),
        AttrId::ExecveId => Ok(AttrValue::ExecveId(i32::from_le_bytes(
            value.try_into().map_err(|_| type_mismatch())?,
        ))),
        AttrId::SyscallTableHeader => Ok(AttrValue::SyscallTableHeader(u64::from_le_bytes(
            value.try_into().map_err(|_| type_mismatch())?,
        ))),
    }
}

/// Validate that the decoded attribute set matches the command's schema.
/// An attribute outside the command's required/optional set, same as a
/// missing required attribute, is a decode error: the codec rejects
/// anything it cannot account for rather than silently ignoring it.
fn validate_schema(msg: &ProtocolMessage) -> Result<(), DecodeError> {
    let missing = || DecodeError::new(DecodeErrorKind::MissingAttr);
    let unexpected = || DecodeError::new(DecodeErrorKind::TypeMismatch);

    let has = |id: AttrId| msg.attrs.iter().any(|a| a.id() == id);
    let allowed = |allowed_ids: &[AttrId]| {
        msg.attrs
            .iter()
            .all(|a| allowed_ids.contains(&a.id()))
    };

    match msg.command {
        Command::Handshake => {
            let is_request = has(AttrId::SyscallTableHeader);
            let is_reply = has(AttrId::StatusCode);
            match (is_request, is_reply) {
                (true, false) => {
                    if !allowed(&[AttrId::SyscallTableHeader]) {
                        return Err(unexpected());
                    }
                }
                (false, true) => {
                    if !allowed(&[AttrId::StatusCode]) {
                        return Err(unexpected());
                    }
                }
                (false, false) => return Err(missing()),
                (true, true) => return Err(unexpected()),
            }
        }
        Command::File => {
            if !has(AttrId::OpType) {
                return Err(missing());
            }
            if !allowed(&[AttrId::OpType, AttrId::Name, AttrId::Perm]) {
                return Err(unexpected());
            }
        }
        Command::Process => {
            if !has(AttrId::OpType) || !has(AttrId::ExecveId) {
                return Err(missing());
            }
            if !allowed(&[AttrId::OpType, AttrId::ExecveId, AttrId::Name, AttrId::Perm]) {
                return Err(unexpected());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::message::OpType;

    #[test]
    fn file_set_round_trips() {
        let msg = ProtocolMessage::new(Command::File)
            .with_attr(AttrValue::OpType(OpType::Set.into()))
            .with_attr(AttrValue::Name("/etc/passwd".to_string()))
            .with_attr(AttrValue::Perm(0x1));
        let wire = encode(&msg);
        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn handshake_request_round_trips() {
        let msg = ProtocolMessage::new(Command::Handshake)
            .with_attr(AttrValue::SyscallTableHeader(0xdead_beef));
        let wire = encode(&msg);
        assert_eq!(decode(&wire).unwrap(), msg);
    }

    #[test]
    fn handshake_reply_round_trips() {
        let msg = ProtocolMessage::new(Command::Handshake).with_attr(AttrValue::StatusCode(0));
        let wire = encode(&msg);
        assert_eq!(decode(&wire).unwrap(), msg);
    }

    #[test]
    fn process_notify_round_trips() {
        let msg = ProtocolMessage::new(Command::Process)
            .with_attr(AttrValue::OpType(OpType::Notify.into()))
            .with_attr(AttrValue::ExecveId(7))
            .with_attr(AttrValue::Name("/bin/sh\u{1f}-c\u{1f}true".to_string()));
        let wire = encode(&msg);
        assert_eq!(decode(&wire).unwrap(), msg);
    }

    #[test]
    fn unknown_command_is_rejected() {
        let wire = vec![FAMILY_VERSION, 0xff, 0, 0];
        assert_eq!(
            decode(&wire).unwrap_err().kind,
            DecodeErrorKind::UnknownCmd
        );
    }

    #[test]
    fn missing_required_attribute_is_rejected() {
        let wire = vec![FAMILY_VERSION, Command::File.into(), 0, 0];
        assert_eq!(
            decode(&wire).unwrap_err().kind,
            DecodeErrorKind::MissingAttr
        );
    }

    #[test]
    fn file_with_execve_id_is_rejected() {
        let msg = ProtocolMessage::new(Command::File)
            .with_attr(AttrValue::OpType(OpType::Notify.into()))
            .with_attr(AttrValue::ExecveId(3));
        let wire = encode(&msg);
        assert_eq!(decode(&wire).unwrap_err().kind, DecodeErrorKind::TypeMismatch);
    }

    #[test]
    fn truncated_message_is_rejected() {
        let wire = vec![FAMILY_VERSION];
        assert_eq!(decode(&wire).unwrap_err().kind, DecodeErrorKind::Truncated);
    }

    #[test]
    fn handshake_with_both_request_and_reply_attrs_is_rejected() {
        let msg = ProtocolMessage::new(Command::Handshake)
            .with_attr(AttrValue::SyscallTableHeader(1))
            .with_attr(AttrValue::StatusCode(0));
        let wire = encode(&msg);
        assert_eq!(decode(&wire).unwrap_err().kind, DecodeErrorKind::TypeMismatch);
    }
}
