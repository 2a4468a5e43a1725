use crate::error::Result;
use crate::frame::{DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE};
use crate::selector::Selector;

/// Builder for configuring and creating a [`Selector`].
///
/// # Examples
///
/// ```rust,no_run
/// let selector = netmux::SelectorBuilder::new()
///     .events_capacity(1024)
///     .max_frame_size(16 * 1024 * 1024)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct SelectorBuilder {
    pub(crate) events_capacity: usize,
    pub(crate) max_frame_size: usize,
    pub(crate) nodelay: bool,
}

impl SelectorBuilder {
    /// Creates a builder with the default configuration:
    /// 256 events per wait, a 100 MiB frame limit and `TCP_NODELAY` on.
    pub fn new() -> Self {
        Self {
            events_capacity: 256,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            nodelay: true,
        }
    }

    /// Sets how many readiness events a single wait can report.
    ///
    /// Connections beyond this many ready at once are picked up by the
    /// next `poll`.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn events_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "events_capacity must be > 0");

        self.events_capacity = n;
        self
    }

    /// Sets the largest declared frame size (header included) accepted
    /// from a peer. A larger declaration drops the connection.
    ///
    /// # Panics
    ///
    /// Panics if `n` is smaller than the frame header.
    pub fn max_frame_size(mut self, n: usize) -> Self {
        assert!(n >= HEADER_SIZE, "max_frame_size must cover the header");

        self.max_frame_size = n;
        self
    }

    /// Enables or disables `TCP_NODELAY` on new connections.
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Builds the selector, allocating the OS multiplexing resource.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the poller cannot be created.
    pub fn build(self) -> Result<Selector> {
        Selector::with_config(self)
    }
}

impl Default for SelectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
