//! Linux `epoll`-based poller implementation.
//!
//! This module provides the Linux backend for the selector.
//! It is functionally equivalent to the macOS `kqueue` poller and
//! exposes the same interface.
//!
//! Responsibilities:
//! - Register socket descriptors with read/write interests
//! - Block waiting for I/O readiness, bounded by a timeout
//! - Wake a blocked wait from another thread through an `eventfd`
//!
//! Registrations are level-triggered: a socket with unread bytes keeps
//! reporting readable on every wait until it is drained.

use super::common::{Event, Interest};

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Reserved token used internally for the wake-up event.
///
/// Connection tokens are slab indices, so `u64::MAX` never collides.
const WAKE_TOKEN: u64 = u64::MAX;

/// Cross-thread wake handle backed by an `eventfd`.
///
/// The descriptor is closed when the last handle is dropped, so a
/// waker outliving its poller never writes to a recycled descriptor.
#[derive(Debug)]
pub(crate) struct Waker {
    fd: RawFd,
}

impl Waker {
    /// Wake the poller.
    ///
    /// This writes to the internal `eventfd`, causing `epoll_wait`
    /// to return immediately.
    pub(crate) fn wake(&self) -> io::Result<()> {
        let buf: u64 = 1;
        let rc = unsafe { libc::write(self.fd, &buf as *const _ as *const _, 8) };

        if rc < 0 {
            let err = io::Error::last_os_error();
            // The counter is saturated, a wake is already pending.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }

        Ok(())
    }

    /// Reset the counter after a wake-up has been observed.
    fn drain(&self) {
        let mut buf = 0u64;
        unsafe {
            libc::read(self.fd, &mut buf as *mut _ as *mut _, 8);
        }
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

/// Linux `epoll` poller.
///
/// This poller owns:
/// - an `epoll` instance,
/// - a shared [`Waker`] registered as a persistent wake source,
/// - a reusable event buffer.
pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,

    /// Waker wrapping the internal eventfd.
    waker: Arc<Waker>,
}

impl EpollPoller {
    /// Create a new `EpollPoller` able to report up to `capacity`
    /// events per wait.
    ///
    /// Failure to allocate the epoll instance or the eventfd is
    /// returned to the caller; the selector cannot run without them.
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let eventfd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if eventfd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll) };
            return Err(err);
        }
        let waker = Arc::new(Waker { fd: eventfd });

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };

        let rc = unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, eventfd, &mut event) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll) };
            return Err(err);
        }

        Ok(Self {
            epoll,
            events: Vec::with_capacity(capacity),
            waker,
        })
    }

    /// Return the poller waker.
    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Register a file descriptor with the poller.
    pub(crate) fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.ctl(EPOLL_CTL_ADD, fd, token, interest)
    }

    /// Update interest flags for an already registered descriptor.
    pub(crate) fn reregister(
        &mut self,
        fd: RawFd,
        token: usize,
        interest: Interest,
    ) -> io::Result<()> {
        self.ctl(EPOLL_CTL_MOD, fd, token, interest)
    }

    /// Remove a file descriptor from the poller.
    ///
    /// Closing a descriptor removes it from epoll anyway, so failures
    /// here are ignored.
    pub(crate) fn deregister(&mut self, fd: RawFd) {
        unsafe {
            epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
    }

    fn ctl(&self, op: i32, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        let mut flags = 0;

        if interest.read {
            flags |= EPOLLIN;
        }
        if interest.write {
            flags |= EPOLLOUT;
        }

        let mut event = epoll_event {
            events: flags as u32,
            u64: token as u64,
        };

        let rc = unsafe { epoll_ctl(self.epoll, op, fd, &mut event) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Poll for I/O readiness events.
    ///
    /// Blocks until:
    /// - at least one file descriptor becomes ready,
    /// - the wake event is triggered,
    /// - or the optional timeout expires.
    ///
    /// An interrupted wait (`EINTR`) is reported as an empty wait.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        events.clear();

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_millis(timeout),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            if ev.u64 == WAKE_TOKEN {
                self.waker.drain();
                continue;
            }

            let readable = ev.events & ((EPOLLIN | EPOLLERR | EPOLLHUP) as u32) != 0;
            let writable = ev.events & ((EPOLLOUT | EPOLLERR) as u32) != 0;

            events.push(Event {
                token: ev.u64 as usize,
                readable,
                writable,
            });
        }

        Ok(())
    }
}

/// Converts an optional timeout to the millisecond argument of a
/// readiness wait, where `-1` blocks indefinitely.
///
/// Sub-millisecond timeouts are rounded up so a short, non-zero wait
/// never degrades into a busy poll.
fn timeout_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(t) if t.is_zero() => 0,
        Some(t) => {
            let ms = t.as_millis().max(1);
            ms.min(i32::MAX as u128) as i32
        }
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe { libc::close(self.epoll) };
    }
}
