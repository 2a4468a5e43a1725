//! macOS `kqueue`-based poller implementation.
//!
//! Mirrors the Linux `epoll` backend. Read and write interest map to
//! separate `EVFILT_READ` / `EVFILT_WRITE` filters on the same ident;
//! events for the same token are merged before they reach the selector.
//!
//! Wake-ups go through a non-blocking pipe whose read end is registered
//! as a persistent read filter.

use super::common::{Event, Interest};

use libc::{
    EV_ADD, EV_DELETE, EV_DISABLE, EV_ENABLE, EV_EOF, EV_ERROR, EVFILT_READ, EVFILT_WRITE,
    kevent, kqueue, timespec,
};
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

/// Reserved token used internally for the wake-up pipe.
const WAKE_TOKEN: usize = usize::MAX;

/// Cross-thread wake handle backed by a non-blocking pipe.
#[derive(Debug)]
pub(crate) struct Waker {
    reader: RawFd,
    writer: RawFd,
}

impl Waker {
    fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }

        let waker = Waker {
            reader: fds[0],
            writer: fds[1],
        };

        for fd in fds {
            super::platform::sys_set_nonblocking(fd)?;
            super::platform::sys_set_cloexec(fd)?;
        }

        Ok(waker)
    }

    /// Wake the poller by writing a single byte to the pipe.
    pub(crate) fn wake(&self) -> io::Result<()> {
        let buf = [1u8; 1];
        let rc = unsafe { libc::write(self.writer, buf.as_ptr() as *const _, 1) };

        if rc < 0 {
            let err = io::Error::last_os_error();
            // The pipe is full, a wake is already pending.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }

        Ok(())
    }

    fn drain(&self) {
        let mut buf = [0u8; 64];
        while unsafe { libc::read(self.reader, buf.as_mut_ptr() as *mut _, buf.len()) } > 0 {}
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.reader);
            libc::close(self.writer);
        }
    }
}

/// macOS `kqueue` poller.
pub(crate) struct KqueuePoller {
    kqueue: RawFd,
    events: Vec<libc::kevent>,
    waker: Arc<Waker>,
}

// `udata` only ever carries a token, never a pointer.
unsafe impl Send for KqueuePoller {}

impl KqueuePoller {
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let kqueue = unsafe { kqueue() };
        if kqueue < 0 {
            return Err(io::Error::last_os_error());
        }

        let waker = match Waker::new() {
            Ok(waker) => Arc::new(waker),
            Err(err) => {
                unsafe { libc::close(kqueue) };
                return Err(err);
            }
        };

        let poller = KqueuePoller {
            kqueue,
            events: Vec::with_capacity(capacity),
            waker,
        };

        poller.apply(&[change(
            poller.waker.reader,
            EVFILT_READ,
            EV_ADD | EV_ENABLE,
            WAKE_TOKEN,
        )])?;

        Ok(poller)
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    pub(crate) fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.reregister(fd, token, interest)
    }

    /// `EV_ADD` on an existing filter updates it in place, so register and
    /// reregister share one path. Both filters are always submitted and
    /// the unwanted one is disabled.
    pub(crate) fn reregister(
        &mut self,
        fd: RawFd,
        token: usize,
        interest: Interest,
    ) -> io::Result<()> {
        let read = if interest.read { EV_ENABLE } else { EV_DISABLE };
        let write = if interest.write { EV_ENABLE } else { EV_DISABLE };

        self.apply(&[
            change(fd, EVFILT_READ, EV_ADD | read, token),
            change(fd, EVFILT_WRITE, EV_ADD | write, token),
        ])
    }

    pub(crate) fn deregister(&mut self, fd: RawFd) {
        let _ = self.apply(&[
            change(fd, EVFILT_READ, EV_DELETE, 0),
            change(fd, EVFILT_WRITE, EV_DELETE, 0),
        ]);
    }

    fn apply(&self, changes: &[libc::kevent]) -> io::Result<()> {
        let rc = unsafe {
            kevent(
                self.kqueue,
                changes.as_ptr(),
                changes.len() as i32,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };

        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        events.clear();

        let ts = timeout.map(|t| timespec {
            tv_sec: t.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: t.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts.as_ref().map_or(ptr::null(), |t| t as *const timespec);

        let n = unsafe {
            kevent(
                self.kqueue,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                ts_ptr,
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
            let token = ev.udata as usize;

            if token == WAKE_TOKEN {
                self.waker.drain();
                continue;
            }

            let failed = ev.flags & (EV_EOF | EV_ERROR) != 0;
            let readable = ev.filter == EVFILT_READ || failed;
            let writable = ev.filter == EVFILT_WRITE;

            if let Some(e) = events.iter_mut().find(|e| e.token == token) {
                e.readable |= readable;
                e.writable |= writable;
            } else {
                events.push(Event {
                    token,
                    readable,
                    writable,
                });
            }
        }

        Ok(())
    }
}

impl Drop for KqueuePoller {
    fn drop(&mut self) {
        unsafe { libc::close(self.kqueue) };
    }
}

fn change(fd: RawFd, filter: i16, flags: u16, token: usize) -> libc::kevent {
    libc::kevent {
        ident: fd as usize,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: token as *mut _,
    }
}
