//! Kernel<->daemon transport (§6 "binary framed transport"): a Linux
//! generic-netlink family socket, opened and framed with raw `libc`/`nix`
//! calls rather than a netlink-packet crate — the same hand-written-FFI
//! spirit as talking to `/dev/fuse` directly, just over a socket instead of
//! a character device.

use std::io;
use std::mem;
use std::os::fd::RawFd;

use crate::error::{Error, Result};

/// Abstraction over the raw kernel channel, so dispatch and control-plane
/// tests can substitute an in-memory duplex pair instead of a real socket.
pub trait KernelChannel: Send + Sync {
    /// Send one framed message. Fire-and-forget: callers log failures and
    /// continue rather than treating them as fatal.
    fn send(&self, bytes: &[u8]) -> Result<()>;

    /// Block for the next inbound framed message.
    fn recv(&self) -> Result<Vec<u8>>;

    /// Unblock a thread currently parked in [`recv`](Self::recv), as part of
    /// an orderly shutdown. The default is a no-op; channels with a blocking
    /// `recv` on a real file descriptor should override this.
    fn shutdown(&self) {}

    /// Like [`recv`](Self::recv), but also reports the sending portid, as
    /// carried in the transport's own addressing rather than the message
    /// payload. The default reports portid 0 (used by test doubles, where
    /// no real addressing exists).
    fn recv_with_portid(&self) -> Result<(Vec<u8>, u32)> {
        Ok((self.recv()?, 0))
    }
}

/// The generic-netlink family this daemon registers as, matching the
/// original kernel module's family name.
pub const FAMILY_NAME: &str = "HACKERNEL";

const GENL_ID_CTRL: u16 = 0x10;
const CTRL_CMD_GETFAMILY: u8 = 3;
const CTRL_ATTR_FAMILY_ID: u16 = 1;
const CTRL_ATTR_FAMILY_NAME: u16 = 2;
const NLA_ALIGNTO: usize = 4;
const NLMSG_HDRLEN: usize = 16;
const GENL_HDRLEN: usize = 4;

fn nla_align(len: usize) -> usize {
    (len + NLA_ALIGNTO - 1) & !(NLA_ALIGNTO - 1)
}

/// Append a netlink attribute (type, value) to `out`, padded to 4 bytes.
fn push_attr(out: &mut Vec<u8>, attr_type: u16, value: &[u8]) {
    let attr_len = 4 + value.len();
    out.extend_from_slice(&(attr_len as u16).to_le_bytes());
    out.extend_from_slice(&attr_type.to_le_bytes());
    out.extend_from_slice(value);
    let padded = nla_align(attr_len);
    out.resize(out.len() + (padded - attr_len), 0);
}

/// Walk a buffer of back-to-back netlink attributes, calling `f` with
/// `(attr_type, value)` for each.
fn for_each_attr(mut buf: &[u8], mut f: impl FnMut(u16, &[u8])) {
    while buf.len() >= 4 {
        let attr_len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        let attr_type = u16::from_le_bytes([buf[2], buf[3]]);
        if attr_len < 4 || attr_len > buf.len() {
            break;
        }
        f(attr_type, &buf[4..attr_len]);
        let padded = nla_align(attr_len);
        if padded > buf.len() {
            break;
        }
        buf = &buf[padded..];
    }
}

fn push_nlmsghdr(out: &mut Vec<u8>, len: u32, msg_type: u16, flags: u16, seq: u32, pid: u32) {
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&msg_type.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(&pid.to_le_bytes());
}

fn io_err(e: io::Error) -> Error {
    Error::Io(e)
}

/// A generic-netlink socket bound to the [`FAMILY_NAME`] family.
pub struct NetlinkChannel {
    fd: RawFd,
    family_id: u16,
}

impl NetlinkChannel {
    /// Open a netlink socket and resolve the family id for [`FAMILY_NAME`]
    /// via `CTRL_CMD_GETFAMILY`.
    pub fn open() -> Result<Self> {
        // SAFETY: standard raw-socket creation; `fd` is checked before use.
        let fd = unsafe { libc::socket(libc::AF_NETLINK, libc::SOCK_RAW, libc::NETLINK_GENERIC) };
        if fd < 0 {
            return Err(io_err(io::Error::last_os_error()));
        }
        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as u16;
        // SAFETY: `addr` is a validly initialized sockaddr_nl of the right size.
        let rc = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as u32,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(io_err(err));
        }
        let mut channel = NetlinkChannel { fd, family_id: 0 };
        channel.family_id = channel.resolve_family_id()?;
        Ok(channel)
    }

    fn resolve_family_id(&self) -> Result<u16> {
        let mut attrs = Vec::new();
        let mut name = FAMILY_NAME.as_bytes().to_vec();
        name.push(0);
        push_attr(&mut attrs, CTRL_ATTR_FAMILY_NAME, &name);

        let mut payload = Vec::new();
        payload.push(CTRL_CMD_GETFAMILY);
        payload.push(1); // genl version
        payload.extend_from_slice(&[0u8, 0]); // reserved
        payload.extend_from_slice(&attrs);

        let total_len = (NLMSG_HDRLEN + payload.len()) as u32;
        let mut frame = Vec::with_capacity(total_len as usize);
        push_nlmsghdr(
            &mut frame,
            total_len,
            GENL_ID_CTRL,
            libc::NLM_F_REQUEST as u16,
            1,
            0,
        );
        frame.extend_from_slice(&payload);

        self.send_raw(&frame)?;
        let reply = self.recv_raw()?;
        if reply.len() < NLMSG_HDRLEN + GENL_HDRLEN {
            return Err(Error::PathResolution);
        }
        let body = &reply[NLMSG_HDRLEN + GENL_HDRLEN..];
        let mut found = None;
        for_each_attr(body, |attr_type, value| {
            if attr_type == CTRL_ATTR_FAMILY_ID && value.len() >= 2 {
                found = Some(u16::from_le_bytes([value[0], value[1]]));
            }
        });
        found.ok_or(Error::PathResolution)
    }

    fn send_raw(&self, frame: &[u8]) -> Result<()> {
        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as u16;
        // SAFETY: `frame` outlives the call; `addr` is a valid sockaddr_nl.
        let rc = unsafe {
            libc::sendto(
                self.fd,
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as u32,
            )
        };
        if rc < 0 {
            return Err(io_err(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn recv_raw(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; 64 * 1024];
        // SAFETY: `buf` is a valid writable buffer of `buf.len()` bytes.
        let rc = unsafe {
            libc::recv(
                self.fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if rc < 0 {
            return Err(io_err(io::Error::last_os_error()));
        }
        buf.truncate(rc as usize);
        Ok(buf)
    }
}

impl KernelChannel for NetlinkChannel {
    fn send(&self, bytes: &[u8]) -> Result<()> {
        let total_len = (NLMSG_HDRLEN + bytes.len()) as u32;
        let mut frame = Vec::with_capacity(total_len as usize);
        push_nlmsghdr(&mut frame, total_len, self.family_id, 0, 0, 0);
        frame.extend_from_slice(bytes);
        self.send_raw(&frame)
    }

    fn recv(&self) -> Result<Vec<u8>> {
        let frame = self.recv_raw()?;
        if frame.len() < NLMSG_HDRLEN {
            return Err(Error::Decode(crate::error::DecodeError::new(
                crate::error::DecodeErrorKind::Truncated,
            )));
        }
        Ok(frame[NLMSG_HDRLEN..].to_vec())
    }

    fn shutdown(&self) {
        // SAFETY: `self.fd` is a valid, open socket for the lifetime of
        // `self`; `shutdown(2)` on an already-closed or errored fd is a
        // harmless no-op failure we don't need to report.
        unsafe {
            libc::shutdown(self.fd, libc::SHUT_RDWR);
        }
    }

    fn recv_with_portid(&self) -> Result<(Vec<u8>, u32)> {
        let frame = self.recv_raw()?;
        if frame.len() < NLMSG_HDRLEN {
            return Err(Error::Decode(crate::error::DecodeError::new(
                crate::error::DecodeErrorKind::Truncated,
            )));
        }
        let pid = u32::from_le_bytes([frame[12], frame[13], frame[14], frame[15]]);
        Ok((frame[NLMSG_HDRLEN..].to_vec(), pid))
    }
}

impl Drop for NetlinkChannel {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

// `libc::sockaddr_nl` does not implement `Debug`; this impl only reports
// what is useful for logs.
impl std::fmt::Debug for NetlinkChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetlinkChannel")
            .field("fd", &self.fd)
            .field("family_id", &self.family_id)
            .finish()
    }
}

/// An in-process duplex channel for tests: writes to one end are readable
/// from the other.
#[derive(Debug)]
pub struct MemoryChannel {
    outbound: parking_lot::Mutex<std::collections::VecDeque<Vec<u8>>>,
    inbound: parking_lot::Mutex<std::collections::VecDeque<Vec<u8>>>,
}

impl MemoryChannel {
    /// Create a channel with no queued messages in either direction.
    pub fn new() -> Self {
        MemoryChannel {
            outbound: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            inbound: parking_lot::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    /// Queue a message as if it arrived from the kernel side, for `recv` to
    /// return.
    pub fn push_inbound(&self, bytes: Vec<u8>) {
        self.inbound.lock().push_back(bytes);
    }

    /// Drain everything sent via [`KernelChannel::send`] so far.
    pub fn drain_outbound(&self) -> Vec<Vec<u8>> {
        self.outbound.lock().drain(..).collect()
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelChannel for MemoryChannel {
    fn send(&self, bytes: &[u8]) -> Result<()> {
        self.outbound.lock().push_back(bytes.to_vec());
        Ok(())
    }

    fn recv(&self) -> Result<Vec<u8>> {
        self.inbound
            .lock()
            .pop_front()
            .ok_or(Error::Resource("no inbound message queued".to_string()))
    }
}
