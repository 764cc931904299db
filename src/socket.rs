//! Raw IPv4/IGMP socket management (spec §4.B).
//!
//! Opens raw `IPPROTO_IGMP` sockets, joins multicast groups, and decodes the
//! ancillary control message (`IP_PKTINFO`) every receiver needs to recover
//! the inbound interface index and destination address. `socket2` builds
//! and configures the socket; `libc` supplies `recvmsg`/cmsg access that
//! `socket2` does not expose, mirroring the teacher's own reliance on
//! `libc` for the platform layer behind its raw-socket device.

#![allow(unsafe_code)]

use std::io;
use std::mem::MaybeUninit;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::unix::AsyncFd;

use crate::error::OsError;
use crate::model::Side;

/// Raw protocol number for IGMP (spec §6: "Protocol = 2").
const IPPROTO_IGMP: i32 = 2;

/// A resolved network interface: index plus its first IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub index: u32,
    pub ipv4: Ipv4Addr,
}

/// Resolve `name` to its ifindex and first IPv4 address.
pub fn resolve_interface(name: &str) -> Result<InterfaceInfo, OsError> {
    let cname = std::ffi::CString::new(name).map_err(|_| OsError::ResolveInterface {
        iface: name.to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "interface name contains NUL"),
    })?;

    let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if index == 0 {
        return Err(OsError::ResolveInterface {
            iface: name.to_string(),
            source: io::Error::last_os_error(),
        });
    }

    let ipv4 = first_ipv4_of(name).ok_or_else(|| OsError::ResolveInterface {
        iface: name.to_string(),
        source: io::Error::new(io::ErrorKind::NotFound, "no IPv4 address on interface"),
    })?;

    Ok(InterfaceInfo { index, ipv4 })
}

fn first_ipv4_of(name: &str) -> Option<Ipv4Addr> {
    let mut addrs: *mut libc::ifaddrs = std::ptr::null_mut();
    let found = unsafe {
        if libc::getifaddrs(&mut addrs) != 0 {
            return None;
        }
        let mut cursor = addrs;
        let mut result = None;
        while !cursor.is_null() {
            let entry = &*cursor;
            if !entry.ifa_name.is_null() {
                let ifa_name = std::ffi::CStr::from_ptr(entry.ifa_name).to_string_lossy();
                if ifa_name == name && !entry.ifa_addr.is_null() {
                    let sa = &*(entry.ifa_addr as *const libc::sockaddr);
                    if sa.sa_family as i32 == libc::AF_INET {
                        let sin = &*(entry.ifa_addr as *const libc::sockaddr_in);
                        let ip = u32::from_be(sin.sin_addr.s_addr);
                        result = Some(Ipv4Addr::from(ip));
                        break;
                    }
                }
            }
            cursor = entry.ifa_next;
        }
        result
    };
    unsafe { libc::freeifaddrs(addrs) };
    found
}

/// A received datagram plus the ancillary metadata the receive loop filters
/// on (spec §4.D steps 4-7): the control-message interface index and
/// destination address, and the raw source address.
#[derive(Debug, Clone)]
pub struct RecvMeta {
    pub payload: Vec<u8>,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub ifindex: u32,
}

/// Owns a raw IPv4 socket used either to receive on a bound multicast
/// group / unicast address, or to send.
pub struct RawIgmpSocket {
    fd: AsyncFd<Socket>,
}

impl RawIgmpSocket {
    /// Open a raw IPv4 IGMP socket, not yet bound to anything.
    fn open(side: &'static str) -> Result<Socket, OsError> {
        let socket = Socket::new(
            Domain::IPV4,
            Type::RAW,
            Some(Protocol::from(IPPROTO_IGMP)),
        )
        .map_err(|source| OsError::OpenSocket { side, source })?;
        socket
            .set_nonblocking(true)
            .map_err(|source| OsError::OpenSocket { side, source })?;
        Ok(socket)
    }

    /// `open_multicast` (spec §4.B): bind to `0.0.0.0`, enable Src/Dst/
    /// Interface control messages (`IP_PKTINFO`), and join `group` on
    /// `iface`.
    pub fn open_multicast(side: Side, iface: InterfaceInfo, group: Ipv4Addr) -> Result<Self, OsError> {
        let label = side.as_str();
        let socket = Self::open(label)?;
        let addr = std::net::SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        socket
            .bind(&addr.into())
            .map_err(|source| OsError::OpenSocket { side: label, source })?;

        enable_pktinfo(&socket, label)?;
        join_multicast(&socket, group, iface.index, label)?;

        Ok(RawIgmpSocket {
            fd: AsyncFd::new(socket).map_err(|source| OsError::OpenSocket { side: label, source })?,
        })
    }

    /// `open_unicast` (spec §4.B): bind to the interface's own IPv4.
    pub fn open_unicast(side: Side, iface: InterfaceInfo) -> Result<Self, OsError> {
        let label = side.as_str();
        let socket = Self::open(label)?;
        let addr = std::net::SocketAddrV4::new(iface.ipv4, 0);
        socket
            .bind(&addr.into())
            .map_err(|source| OsError::OpenSocket { side: label, source })?;
        enable_pktinfo(&socket, label)?;

        Ok(RawIgmpSocket {
            fd: AsyncFd::new(socket).map_err(|source| OsError::OpenSocket { side: label, source })?,
        })
    }

    /// `open_raw_send` (spec §4.B): unbound sender configured with
    /// multicast egress interface, TTL=1, and configurable loopback.
    pub fn open_raw_send(side: Side, iface: InterfaceInfo, loopback: bool) -> Result<Self, OsError> {
        let label = side.as_str();
        let socket = Self::open(label)?;
        // The codec builds the full IPv4 header (Router Alert, TTL=1,
        // DSCP=CS6) by hand; without IP_HDRINCL the kernel would prepend
        // its own header and treat ours as IGMP payload.
        socket
            .set_header_included_v4(true)
            .map_err(|source| OsError::SetSockOpt { side: label, source })?;
        let addr = std::net::SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        socket
            .bind(&addr.into())
            .map_err(|source| OsError::OpenSocket { side: label, source })?;
        socket
            .set_multicast_if_v4(&iface.ipv4)
            .map_err(|source| OsError::SetSockOpt { side: label, source })?;
        socket
            .set_multicast_ttl_v4(1)
            .map_err(|source| OsError::SetSockOpt { side: label, source })?;
        socket
            .set_multicast_loop_v4(loopback)
            .map_err(|source| OsError::SetSockOpt { side: label, source })?;

        Ok(RawIgmpSocket {
            fd: AsyncFd::new(socket).map_err(|source| OsError::OpenSocket { side: label, source })?,
        })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }

    /// Receive one datagram with ancillary metadata into `buf` (spec §4.C:
    /// callers acquire `buf` from the packet pool and own it again via
    /// `RecvMeta::payload` once this returns). On a spurious wakeup the
    /// buffer passed to that attempt is lost; a fresh one is allocated for
    /// the retry, matching the pool's own "allocate when empty" fallback.
    pub async fn recv(&self, mut buf: Vec<u8>) -> io::Result<RecvMeta> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| recvmsg_with_pktinfo(inner.get_ref().as_raw_fd(), buf)) {
                Ok(result) => return result,
                Err(_would_block) => {
                    buf = vec![0u8; crate::pool::MAX_PACKET_BYTES];
                    continue;
                }
            }
        }
    }

    /// Send a raw datagram (already containing the IPv4 header) to `dst`.
    pub async fn send(&self, bytes: &[u8], dst: Ipv4Addr) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.writable().await?;
            let addr = socket2::SockAddr::from(std::net::SocketAddrV4::new(dst, 0));
            match guard.try_io(|inner| inner.get_ref().send_to(bytes, &addr)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

fn enable_pktinfo(socket: &Socket, side: &'static str) -> Result<(), OsError> {
    let fd = socket.as_raw_fd();
    let on: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_PKTINFO,
            &on as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(OsError::SetSockOpt {
            side,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn join_multicast(socket: &Socket, group: Ipv4Addr, ifindex: u32, side: &'static str) -> Result<(), OsError> {
    let mreqn = libc::ip_mreqn {
        imr_multiaddr: libc::in_addr {
            s_addr: u32::from(group).to_be(),
        },
        imr_address: libc::in_addr { s_addr: 0 },
        imr_ifindex: ifindex as i32,
    };
    let fd = socket.as_raw_fd();
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_ADD_MEMBERSHIP,
            &mreqn as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::ip_mreqn>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(OsError::JoinMulticast {
            side,
            group,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// `recvmsg(2)` with an `IP_PKTINFO` ancillary buffer, decoded into
/// [`RecvMeta`]. Returns `WouldBlock` so the `AsyncFd` readiness loop
/// retries. `payload` is filled in place and truncated to the datagram's
/// actual length; its spare capacity survives for the pool to reuse.
fn recvmsg_with_pktinfo(fd: RawFd, mut payload: Vec<u8>) -> io::Result<RecvMeta> {
    let mut src_addr: MaybeUninit<libc::sockaddr_in> = MaybeUninit::zeroed();
    let mut cmsg_buf = [0u8; 64];

    let mut iov = libc::iovec {
        iov_base: payload.as_mut_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_name = src_addr.as_mut_ptr() as *mut libc::c_void;
    msg.msg_namelen = std::mem::size_of::<libc::sockaddr_in>() as u32;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_buf.len() as _;

    let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    payload.truncate(n as usize);

    let src_addr = unsafe { src_addr.assume_init() };
    let src = Ipv4Addr::from(u32::from_be(src_addr.sin_addr.s_addr));

    let mut dst = Ipv4Addr::UNSPECIFIED;
    let mut ifindex = 0u32;

    unsafe {
        let mut cmsg: *mut libc::cmsghdr = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            let hdr = &*cmsg;
            if hdr.cmsg_level == libc::IPPROTO_IP && hdr.cmsg_type == libc::IP_PKTINFO {
                let info = &*(libc::CMSG_DATA(cmsg) as *const libc::in_pktinfo);
                dst = Ipv4Addr::from(u32::from_be(info.ipi_addr.s_addr));
                ifindex = info.ipi_ifindex as u32;
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok(RecvMeta {
        payload,
        src,
        dst,
        ifindex,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_loopback_has_ifindex() {
        // `lo` is present in essentially every network namespace; this is
        // the one socket-layer test that doesn't require CAP_NET_RAW.
        let info = resolve_interface("lo");
        assert!(info.is_ok());
    }
}
