//! Owned, non-blocking TCP socket.

use crate::poller::platform::{
    connect_in_progress, sys_close, sys_connect, sys_get_socket_error, sys_read,
    sys_set_nodelay, sys_set_recv_buffer, sys_set_send_buffer, sys_socket, sys_write,
};

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::fd::RawFd;

/// Outcome of starting a non-blocking connect.
#[derive(Debug)]
pub(crate) enum ConnectStart {
    /// The handshake is running; completion is signalled by writability.
    InProgress,

    /// The kernel finished the handshake synchronously.
    Done,

    /// The kernel rejected the connect synchronously (e.g. refused).
    Failed(io::Error),
}

/// A non-blocking stream socket.
///
/// The descriptor is exclusively owned and closed on drop; it is never
/// closed anywhere else.
#[derive(Debug)]
pub(crate) struct Socket {
    fd: RawFd,
}

impl Socket {
    /// Creates a socket for `addr`, applies the buffer sizing and
    /// options, and starts connecting.
    ///
    /// Errors are local failures (descriptor exhaustion, bad options).
    /// Failures of the connect itself are reported through
    /// [`ConnectStart::Failed`].
    pub(crate) fn connect(
        addr: &SocketAddr,
        send_buffer: usize,
        recv_buffer: usize,
        nodelay: bool,
    ) -> io::Result<(Self, ConnectStart)> {
        let socket = Socket {
            fd: sys_socket(addr)?,
        };

        sys_set_send_buffer(socket.fd, send_buffer)?;
        sys_set_recv_buffer(socket.fd, recv_buffer)?;
        sys_set_nodelay(socket.fd, nodelay)?;

        let start = match sys_connect(socket.fd, addr) {
            Ok(()) => ConnectStart::Done,
            Err(err) if connect_in_progress(&err) => ConnectStart::InProgress,
            Err(err) => ConnectStart::Failed(err),
        };

        Ok((socket, start))
    }

    /// Resolves a connect that has signalled readiness.
    pub(crate) fn finish_connect(&self) -> io::Result<()> {
        sys_get_socket_error(self.fd)
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        sys_read(self.fd, buf)
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        sys_write(self.fd, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        sys_close(self.fd);
    }
}
