//! File descriptor helpers
//!
//! Thin safe wrappers around the syscalls the sink performs on client
//! descriptors. The sink never opens or closes descriptors; every fd here
//! is owned by the host.

use std::io;
use std::os::unix::io::RawFd;

fn last_error<T>() -> io::Result<T> {
    Err(io::Error::last_os_error())
}

/// Put the descriptor in non-blocking mode, preserving its other flags
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a host-supplied fd; no memory is passed
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return last_error();
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return last_error();
    }
    Ok(())
}

/// Whether the descriptor was opened write-only (no point polling it for
/// reads)
pub(crate) fn is_write_only(fd: RawFd) -> bool {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    flags >= 0 && (flags & libc::O_ACCMODE) == libc::O_WRONLY
}

/// Whether the descriptor refers to a socket (selects send(2) over write(2))
pub(crate) fn is_socket(fd: RawFd) -> bool {
    let mut statbuf = std::mem::MaybeUninit::<libc::stat>::uninit();
    // SAFETY: fstat fills the stat buffer on success
    let res = unsafe { libc::fstat(fd, statbuf.as_mut_ptr()) };
    if res != 0 {
        return false;
    }
    let statbuf = unsafe { statbuf.assume_init() };
    (statbuf.st_mode & libc::S_IFMT) == libc::S_IFSOCK
}

/// Bytes available for reading on the descriptor (FIONREAD)
pub(crate) fn available_bytes(fd: RawFd) -> io::Result<usize> {
    let mut avail: libc::c_int = 0;
    // SAFETY: FIONREAD writes an int through the pointer
    if unsafe { libc::ioctl(fd, libc::FIONREAD as _, &mut avail) } < 0 {
        return last_error();
    }
    if avail < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "FIONREAD reported a negative count",
        ));
    }
    Ok(avail as usize)
}

/// Read into `buf`, discarding the result at the caller's leisure
pub(crate) fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: the pointer/len pair comes from a live slice
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        return last_error();
    }
    Ok(n as usize)
}

/// Non-blocking write of as much of `buf` as the descriptor accepts
///
/// Sockets use send(2) with MSG_NOSIGNAL so a dead peer surfaces as EPIPE
/// instead of killing the process; everything else uses write(2).
pub(crate) fn send(fd: RawFd, buf: &[u8], is_socket: bool) -> io::Result<usize> {
    // SAFETY: the pointer/len pair comes from a live slice
    let n = if is_socket {
        unsafe {
            libc::send(
                fd,
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                libc::MSG_NOSIGNAL,
            )
        }
    } else {
        unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) }
    };
    if n < 0 {
        return last_error();
    }
    Ok(n as usize)
}

/// Cheap liveness probe used by the bad-fd scan after EBADF from poll
pub(crate) fn probe(fd: RawFd) -> io::Result<()> {
    if unsafe { libc::fcntl(fd, libc::F_GETFL) } < 0 {
        return last_error();
    }
    Ok(())
}

/// Apply the configured DSCP value to a socket descriptor
///
/// The 6 DSCP bits are shifted into the upper part of the ToS byte. IPv6
/// sockets carrying a v4-mapped address get IPv4 treatment.
pub(crate) fn setup_dscp(fd: RawFd, qos_dscp: i32) -> io::Result<()> {
    if qos_dscp < 0 {
        return Ok(());
    }

    let mut storage = std::mem::MaybeUninit::<libc::sockaddr_storage>::uninit();
    let mut slen = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    // SAFETY: getsockname fills at most slen bytes of the storage
    if unsafe { libc::getsockname(fd, storage.as_mut_ptr() as *mut libc::sockaddr, &mut slen) } < 0
    {
        return last_error();
    }
    let storage = unsafe { storage.assume_init() };

    let mut family = storage.ss_family as libc::c_int;
    if family == libc::AF_INET6 {
        // v4-mapped addresses want IPv4 QoS
        // SAFETY: ss_family said this is a sockaddr_in6
        let sa6 = unsafe { &*(&storage as *const _ as *const libc::sockaddr_in6) };
        let octets = sa6.sin6_addr.s6_addr;
        let v4_mapped = octets[..10].iter().all(|&b| b == 0) && octets[10] == 0xff && octets[11] == 0xff;
        if v4_mapped {
            family = libc::AF_INET;
        }
    }

    let tos: libc::c_int = (qos_dscp & 0x3f) << 2;
    let res = match family {
        libc::AF_INET => unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IP,
                libc::IP_TOS,
                &tos as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        },
        libc::AF_INET6 => unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IPV6,
                libc::IPV6_TCLASS,
                &tos as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        },
        _ => {
            // unix sockets and friends carry no ToS byte
            return Ok(());
        }
    };
    if res < 0 {
        return last_error();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn test_set_nonblocking_and_probe() {
        let (a, _b) = UnixStream::pair().unwrap();
        set_nonblocking(a.as_raw_fd()).unwrap();
        probe(a.as_raw_fd()).unwrap();
    }

    #[test]
    fn test_probe_bad_fd_fails() {
        assert!(probe(-1).is_err());
    }

    #[test]
    fn test_is_socket() {
        let (a, _b) = UnixStream::pair().unwrap();
        assert!(is_socket(a.as_raw_fd()));
    }

    #[test]
    fn test_available_bytes() {
        let (a, mut b) = UnixStream::pair().unwrap();
        assert_eq!(available_bytes(a.as_raw_fd()).unwrap(), 0);
        b.write_all(b"hello").unwrap();
        assert_eq!(available_bytes(a.as_raw_fd()).unwrap(), 5);
    }

    #[test]
    fn test_send_on_socket() {
        let (a, b) = UnixStream::pair().unwrap();
        let n = send(a.as_raw_fd(), b"data", true).unwrap();
        assert_eq!(n, 4);
        let mut got = [0u8; 4];
        let mut b = b;
        std::io::Read::read_exact(&mut b, &mut got).unwrap();
        assert_eq!(&got, b"data");
    }

    #[test]
    fn test_setup_dscp_ignores_unix_sockets() {
        // getsockname succeeds but the family is AF_UNIX: no-op
        let (a, _b) = UnixStream::pair().unwrap();
        setup_dscp(a.as_raw_fd(), 46).unwrap();
    }

    #[test]
    fn test_setup_dscp_sets_ip_tos() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = std::net::TcpStream::connect(addr).unwrap();
        let fd = stream.as_raw_fd();

        setup_dscp(fd, 46).unwrap();

        let mut tos: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        let res = unsafe {
            libc::getsockopt(
                fd,
                libc::IPPROTO_IP,
                libc::IP_TOS,
                &mut tos as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        assert_eq!(res, 0);
        assert_eq!(tos, 46 << 2);
    }
}
