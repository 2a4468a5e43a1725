/// Readiness a descriptor is registered for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    /// Interest of a socket whose non-blocking connect is still in flight.
    pub(crate) const CONNECT: Interest = Interest {
        read: false,
        write: true,
    };

    /// Interest of an idle connected socket.
    pub(crate) const READ: Interest = Interest {
        read: true,
        write: false,
    };

    /// Interest of a connected socket with a send in flight.
    pub(crate) const READ_WRITE: Interest = Interest {
        read: true,
        write: true,
    };
}

/// A readiness event reported by the poller.
///
/// Error and hang-up conditions are folded into `readable` so the
/// selector discovers them through the read path (a read returns the
/// error or end-of-stream).
#[derive(Clone, Copy, Debug)]
pub(crate) struct Event {
    /// Token the descriptor was registered with.
    pub(crate) token: usize,

    /// The descriptor is readable (or in an error / hang-up state).
    pub(crate) readable: bool,

    /// The descriptor is writable.
    pub(crate) writable: bool,
}
