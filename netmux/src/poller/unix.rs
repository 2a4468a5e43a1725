use libc::{
    AF_INET, AF_INET6, F_GETFD, F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, IPPROTO_TCP, O_NONBLOCK,
    SO_ERROR, SO_RCVBUF, SO_SNDBUF, SOCK_STREAM, SOL_SOCKET, TCP_NODELAY, c_int, c_void, close,
    connect, fcntl, getsockopt, read, setsockopt, sockaddr, sockaddr_in, sockaddr_in6,
    sockaddr_storage, socket, socklen_t,
};
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::{io, mem};

#[cfg(target_os = "linux")]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;

#[cfg(not(target_os = "linux"))]
const SEND_FLAGS: c_int = 0;

/// Reads from a socket into the given buffer.
///
/// Returns the number of bytes read; `Ok(0)` means end-of-stream.
/// The descriptor **must** be non-blocking.
pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { read(fd, buffer.as_mut_ptr() as *mut c_void, buffer.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Writes the buffer to a socket.
///
/// Returns the number of bytes the kernel accepted. Never raises
/// `SIGPIPE` on a socket whose peer has gone away.
pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> io::Result<usize> {
    let n = unsafe {
        libc::send(
            fd,
            buffer.as_ptr() as *const c_void,
            buffer.len(),
            SEND_FLAGS,
        )
    };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Closes a file descriptor.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe { close(fd) };
}

/// Sets a file descriptor to non-blocking mode.
pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Marks a file descriptor close-on-exec.
pub(crate) fn sys_set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFD, flags | FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Creates a non-blocking, close-on-exec stream socket for the family
/// of `addr`.
pub(crate) fn sys_socket(addr: &SocketAddr) -> io::Result<RawFd> {
    let domain = match addr {
        SocketAddr::V4(_) => AF_INET,
        SocketAddr::V6(_) => AF_INET6,
    };

    let fd = unsafe { socket(domain, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let configured = sys_set_nonblocking(fd)
        .and_then(|_| sys_set_cloexec(fd))
        .and_then(|_| sys_set_nosigpipe(fd));

    if let Err(e) = configured {
        unsafe { close(fd) };
        return Err(e);
    }

    Ok(fd)
}

/// Initiates a non-blocking connection.
///
/// An in-progress connect surfaces as an `EINPROGRESS` error; callers
/// treat it with [`connect_in_progress`].
pub(crate) fn sys_connect(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);

    let rc = unsafe { connect(fd, &storage as *const _ as *const sockaddr, len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Returns true if a `connect(2)` error only means the handshake is
/// still running.
pub(crate) fn connect_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EINPROGRESS)
}

/// Reads and clears the pending socket error (`SO_ERROR`).
///
/// After a non-blocking connect becomes writable this is `Ok(())` on
/// success and the connect failure otherwise.
pub(crate) fn sys_get_socket_error(fd: RawFd) -> io::Result<()> {
    let mut value: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;

    let rc = unsafe {
        getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut value as *mut _ as *mut c_void,
            &mut len,
        )
    };

    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    if value != 0 {
        return Err(io::Error::from_raw_os_error(value));
    }

    Ok(())
}

/// Sets `SO_SNDBUF`.
pub(crate) fn sys_set_send_buffer(fd: RawFd, size: usize) -> io::Result<()> {
    sys_setsockopt_int(fd, SOL_SOCKET, SO_SNDBUF, clamp(size))
}

/// Sets `SO_RCVBUF`.
pub(crate) fn sys_set_recv_buffer(fd: RawFd, size: usize) -> io::Result<()> {
    sys_setsockopt_int(fd, SOL_SOCKET, SO_RCVBUF, clamp(size))
}

/// Enables or disables Nagle's algorithm.
pub(crate) fn sys_set_nodelay(fd: RawFd, nodelay: bool) -> io::Result<()> {
    sys_setsockopt_int(fd, IPPROTO_TCP, TCP_NODELAY, nodelay as c_int)
}

#[cfg(target_os = "macos")]
fn sys_set_nosigpipe(fd: RawFd) -> io::Result<()> {
    sys_setsockopt_int(fd, SOL_SOCKET, libc::SO_NOSIGPIPE, 1)
}

#[cfg(not(target_os = "macos"))]
fn sys_set_nosigpipe(_fd: RawFd) -> io::Result<()> {
    Ok(())
}

fn sys_setsockopt_int(fd: RawFd, level: c_int, name: c_int, value: c_int) -> io::Result<()> {
    let rc = unsafe {
        setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const c_void,
            mem::size_of::<c_int>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn clamp(size: usize) -> c_int {
    size.min(c_int::MAX as usize) as c_int
}

/// Converts a `SocketAddr` to a `sockaddr_storage`.
pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}
