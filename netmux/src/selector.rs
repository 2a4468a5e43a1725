//! The readiness-multiplexing event loop.
//!
//! A [`Selector`] owns every connection it creates and advances all of
//! them from a single thread. Each call to [`Selector::poll`] performs at
//! most one OS readiness wait and as much non-blocking I/O as the ready
//! sockets allow, then exposes what happened during that call through
//! four result sets:
//!
//! - [`connected`](Selector::connected): handshakes that completed,
//! - [`disconnected`](Selector::disconnected): connections that ended,
//! - [`completed_sends`](Selector::completed_sends): frames fully written,
//! - [`completed_receives`](Selector::completed_receives): frames fully read.
//!
//! The sets are cleared at the start of the next `poll`.
//!
//! Failures of an individual connection (refusal, reset, end-of-stream,
//! a malformed frame header) never escape `poll`; the connection is
//! closed and reported as disconnected, and the other connections carry
//! on untouched.

use crate::builder::SelectorBuilder;
use crate::error::{Error, Result};
use crate::metrics::SelectorMetrics;
use crate::poller::{Event, Interest, Poller, Waker};
use crate::registry::{Connection, ConnectionState, Registry};
use crate::socket::{ConnectStart, Socket};
use crate::transmission::{NetworkReceive, NetworkSend, OutboundState, ReceiveError};

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, trace_span, warn};

/// Initial number of connection slots.
const INITIAL_CONNECTIONS: usize = 16;

/// A single-threaded multiplexer over many non-blocking TCP connections.
///
/// # Examples
///
/// ```rust,no_run
/// use netmux::{NetworkSend, Selector};
/// use std::time::Duration;
///
/// let mut selector = Selector::new()?;
/// selector.connect("node-1", "127.0.0.1:6667", 64 * 1024, 64 * 1024)?;
///
/// while !selector.connected().iter().any(|id| id == "node-1") {
///     selector.poll(Duration::from_millis(100))?;
/// }
///
/// selector.poll_with(Duration::ZERO, [NetworkSend::new("node-1", b"ping")])?;
/// loop {
///     selector.poll(Duration::from_millis(100))?;
///     if let Some(receive) = selector.completed_receives().first() {
///         println!("{} bytes from {}", receive.payload().len(), receive.connection_id());
///         break;
///     }
/// }
/// # Ok::<(), netmux::Error>(())
/// ```
pub struct Selector {
    /// `None` once the selector is closed.
    poller: Option<Poller>,
    waker: Arc<Waker>,
    registry: Registry,

    /// Reusable readiness buffer.
    events: Vec<Event>,

    max_frame_size: usize,
    nodelay: bool,

    connected: Vec<String>,
    disconnected: Vec<String>,
    completed_sends: Vec<NetworkSend>,
    completed_receives: Vec<NetworkReceive>,

    /// Ids closed by `disconnect`, reported by the next `poll`. Sends for
    /// them are dropped until then.
    closing: Vec<String>,

    /// Ids whose connect failed inside `connect(2)`, reported by the next
    /// `poll`. They never connected, so sends for them are rejected.
    refused: Vec<String>,

    metrics: SelectorMetrics,
}

/// A handle that interrupts a blocked [`Selector::poll`] from another thread.
#[derive(Clone, Debug)]
pub struct SelectorWaker {
    inner: Arc<Waker>,
}

impl SelectorWaker {
    /// Makes the current (or next) readiness wait return immediately.
    pub fn wake(&self) -> io::Result<()> {
        self.inner.wake()
    }
}

impl Selector {
    /// Creates a selector with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the OS multiplexing resource cannot be
    /// allocated.
    pub fn new() -> Result<Self> {
        SelectorBuilder::new().build()
    }

    pub(crate) fn with_config(config: SelectorBuilder) -> Result<Self> {
        let poller = Poller::new(config.events_capacity)?;
        let waker = poller.waker();

        Ok(Self {
            poller: Some(poller),
            waker,
            registry: Registry::new(INITIAL_CONNECTIONS),
            events: Vec::with_capacity(config.events_capacity),
            max_frame_size: config.max_frame_size,
            nodelay: config.nodelay,
            connected: Vec::new(),
            disconnected: Vec::new(),
            completed_sends: Vec::new(),
            completed_receives: Vec::new(),
            closing: Vec::new(),
            refused: Vec::new(),
            metrics: SelectorMetrics::default(),
        })
    }

    /// Starts a non-blocking connect to `address` under `id`.
    ///
    /// The connection is reported in [`connected`](Self::connected) once
    /// the handshake completes. A refused or unreachable peer is not an
    /// error here: it shows up later in [`disconnected`](Self::disconnected).
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionExists`] if `id` is still registered or has
    ///   not been reported disconnected yet,
    /// - [`Error::Resolve`] / [`Error::NoAddress`] if `address` does not
    ///   resolve,
    /// - [`Error::Io`] if the socket cannot be created or configured,
    /// - [`Error::Closed`] after [`close`](Self::close).
    pub fn connect<A>(
        &mut self,
        id: impl Into<String>,
        address: A,
        send_buffer_size: usize,
        receive_buffer_size: usize,
    ) -> Result<()>
    where
        A: ToSocketAddrs + fmt::Display,
    {
        let id = id.into();

        if self.poller.is_none() {
            return Err(Error::Closed);
        }

        if self.registry.contains(&id) || self.is_pending_disconnect(&id) {
            return Err(Error::ConnectionExists(id));
        }

        let addr = address
            .to_socket_addrs()
            .map_err(|source| Error::Resolve {
                address: address.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| Error::NoAddress(address.to_string()))?;

        let (socket, start) =
            Socket::connect(&addr, send_buffer_size, receive_buffer_size, self.nodelay)?;

        if let ConnectStart::Failed(err) = start {
            debug!(connection = %id, address = %addr, error = %err, "connect failed immediately");
            self.refuse(id);
            return Ok(());
        }

        debug!(connection = %id, address = %addr, "connecting");

        let fd = socket.fd();
        let token = self.registry.register(Connection::new(id, addr, socket))?;

        let Some(poller) = self.poller.as_mut() else {
            return Err(Error::Closed);
        };

        if let Err(err) = poller.register(fd, token, Interest::CONNECT) {
            self.registry.evict(token);
            return Err(err.into());
        }

        self.metrics.active_connections = self.registry.len();

        Ok(())
    }

    /// Closes the connection `id` immediately.
    ///
    /// Any partial send or receive is discarded. The id is reported in
    /// [`disconnected`](Self::disconnected) by the next `poll`, and a send
    /// for it passed to that `poll` is dropped silently. Unknown ids are
    /// ignored.
    pub fn disconnect(&mut self, id: &str) {
        let Some(token) = self.registry.token(id) else {
            trace!(connection = %id, "disconnect of unknown connection ignored");
            return;
        };

        if let Some(connection) = self.release(token) {
            debug!(connection = %connection.id, "disconnected locally");
            self.closing.push(connection.id);
        }
    }

    /// Runs one poll cycle without new sends.
    ///
    /// See [`poll_with`](Self::poll_with).
    pub fn poll(&mut self, timeout: Duration) -> Result<()> {
        self.poll_with(timeout, std::iter::empty())
    }

    /// Runs one poll cycle.
    ///
    /// 1. Clears the previous cycle's result sets.
    /// 2. Installs `sends`, each on its connected, idle connection.
    /// 3. Waits at most `timeout` for readiness (a zero timeout never blocks).
    /// 4. Completes pending connects, then writes and reads on every
    ///    ready connection, recording completions and disconnects.
    ///
    /// # Errors
    ///
    /// The whole batch of sends is validated before any is installed. A
    /// send to an unknown or not yet connected id, to a connection with a
    /// send in flight, or two sends to the same id fail the call and
    /// install nothing. A failed readiness wait is returned as
    /// [`Error::Io`]; per-connection I/O failures never are.
    ///
    /// A rejected batch still clears the previous cycle's result sets.
    /// Disconnects queued by [`disconnect`](Self::disconnect) or by a
    /// refused connect stay pending and are reported by the next call
    /// that succeeds.
    pub fn poll_with<I>(&mut self, timeout: Duration, sends: I) -> Result<()>
    where
        I: IntoIterator<Item = NetworkSend>,
    {
        let _span = trace_span!("poll").entered();

        if self.poller.is_none() {
            return Err(Error::Closed);
        }

        self.clear();
        self.metrics.poll_calls += 1;

        let sends: Vec<NetworkSend> = sends.into_iter().collect();
        self.validate(&sends)?;

        for send in sends {
            self.install(send);
        }

        self.disconnected.append(&mut self.closing);
        self.disconnected.append(&mut self.refused);

        let timeout = if self.disconnected.is_empty() {
            timeout
        } else {
            Duration::ZERO
        };

        let mut events = std::mem::take(&mut self.events);
        let waited = Instant::now();

        let polled = match self.poller.as_mut() {
            Some(poller) => poller.poll(&mut events, Some(timeout)),
            None => Ok(()),
        };

        self.metrics.select_time += waited.elapsed();

        if let Err(err) = polled {
            self.events = events;
            return Err(err.into());
        }

        let io_started = Instant::now();
        for event in &events {
            self.dispatch(*event);
        }
        self.metrics.io_time += io_started.elapsed();

        self.events = events;
        self.metrics.active_connections = self.registry.len();

        trace!(
            connected = self.connected.len(),
            disconnected = self.disconnected.len(),
            sends = self.completed_sends.len(),
            receives = self.completed_receives.len(),
            "poll cycle complete"
        );

        Ok(())
    }

    /// Connections whose handshake completed during the last `poll`.
    pub fn connected(&self) -> &[String] {
        &self.connected
    }

    /// Connections that ended during (or just before) the last `poll`.
    pub fn disconnected(&self) -> &[String] {
        &self.disconnected
    }

    /// Sends fully written during the last `poll`.
    pub fn completed_sends(&self) -> &[NetworkSend] {
        &self.completed_sends
    }

    /// Frames fully received during the last `poll`, in arrival order
    /// per connection.
    pub fn completed_receives(&self) -> &[NetworkReceive] {
        &self.completed_receives
    }

    /// Moves the last cycle's receives out of the selector.
    pub fn drain_completed_receives(&mut self) -> Vec<NetworkReceive> {
        std::mem::take(&mut self.completed_receives)
    }

    /// True if `id` is registered and its handshake has completed.
    pub fn is_connected(&self, id: &str) -> bool {
        self.registry
            .lookup(id)
            .map(Connection::is_connected)
            .unwrap_or(false)
    }

    /// Number of registered connections, connecting or connected.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn metrics(&self) -> &SelectorMetrics {
        &self.metrics
    }

    /// Returns a handle that can interrupt `poll` from another thread.
    pub fn waker(&self) -> SelectorWaker {
        SelectorWaker {
            inner: self.waker.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.poller.is_none()
    }

    /// Closes every connection and releases the poller.
    ///
    /// Idempotent; also performed on drop. Later calls to `connect` and
    /// `poll` fail with [`Error::Closed`].
    pub fn close(&mut self) {
        if self.poller.is_none() {
            return;
        }

        for token in self.registry.tokens() {
            self.release(token);
        }
        debug_assert!(self.registry.is_empty());

        self.closing.clear();
        self.refused.clear();
        self.poller = None;
        self.metrics.active_connections = 0;

        debug!("selector closed");
    }

    /// True if `id` is closed but its disconnect has not been reported yet.
    fn is_pending_disconnect(&self, id: &str) -> bool {
        self.closing.iter().chain(&self.refused).any(|pending| pending == id)
    }

    /// Queues `id` as a connect that failed before reaching the poller.
    fn refuse(&mut self, id: String) {
        self.metrics.connect_failures += 1;
        self.refused.push(id);
    }

    fn clear(&mut self) {
        self.connected.clear();
        self.disconnected.clear();
        self.completed_sends.clear();
        self.completed_receives.clear();
    }

    fn validate(&self, sends: &[NetworkSend]) -> Result<()> {
        let mut seen = HashSet::with_capacity(sends.len());

        for send in sends {
            let id = send.connection_id();

            if self.closing.iter().any(|closing| closing == id) {
                continue;
            }

            if self.refused.iter().any(|refused| refused == id) {
                return Err(Error::NotConnected(id.to_owned()));
            }

            let connection = self.registry.lookup(id)?;

            if connection.state != ConnectionState::Connected {
                return Err(Error::NotConnected(id.to_owned()));
            }

            if connection.outbound.is_some() {
                return Err(Error::SendInProgress(id.to_owned()));
            }

            if !seen.insert(id) {
                return Err(Error::DuplicateSend(id.to_owned()));
            }
        }

        Ok(())
    }

    fn install(&mut self, send: NetworkSend) {
        let Some(token) = self.registry.token(send.connection_id()) else {
            trace!(connection = %send.connection_id(), "dropping send for closed connection");
            return;
        };

        let Some(connection) = self.registry.get_mut(token) else {
            return;
        };

        trace!(connection = %connection.id, bytes = send.frame().len(), "send queued");
        let fd = connection.socket.fd();
        connection.outbound = Some(OutboundState::new(send));

        self.set_interest(token, fd, Interest::READ_WRITE);
    }

    fn dispatch(&mut self, event: Event) {
        let Some(connection) = self.registry.get(event.token) else {
            // Closed earlier in this cycle.
            return;
        };

        match connection.state {
            ConnectionState::Connecting => {
                if event.readable || event.writable {
                    self.finish_connect(event.token);
                }
            }
            ConnectionState::Connected => {
                let writing = event.writable && connection.outbound.is_some();

                if writing && !self.write(event.token) {
                    return;
                }

                if event.readable {
                    self.read(event.token);
                }
            }
        }
    }

    fn finish_connect(&mut self, token: usize) {
        let Some(connection) = self.registry.get_mut(token) else {
            return;
        };

        match connection.socket.finish_connect() {
            Ok(()) => {
                connection.state = ConnectionState::Connected;
                debug!(connection = %connection.id, address = %connection.address, "connected");

                let fd = connection.socket.fd();
                self.connected.push(connection.id.clone());
                self.metrics.connections_created += 1;

                self.set_interest(token, fd, Interest::READ);
            }
            Err(err) => {
                debug!(connection = %connection.id, address = %connection.address, error = %err, "connect failed");
                self.metrics.connect_failures += 1;
                self.fail(token);
            }
        }
    }

    /// Returns false if the connection was closed.
    fn write(&mut self, token: usize) -> bool {
        let Some(connection) = self.registry.get_mut(token) else {
            return false;
        };

        let Some(outbound) = connection.outbound.as_mut() else {
            return true;
        };

        match outbound.write_to(&mut connection.socket) {
            Ok(progress) => {
                self.metrics.bytes_sent += progress.bytes as u64;
                trace!(connection = %connection.id, bytes = progress.bytes, "wrote");

                if progress.complete {
                    if let Some(done) = connection.outbound.take() {
                        self.completed_sends.push(done.into_send());
                    }

                    let fd = connection.socket.fd();
                    self.metrics.sends_completed += 1;
                    self.set_interest(token, fd, Interest::READ);
                }

                true
            }
            Err(err) => {
                warn!(connection = %connection.id, error = %err, "write failed, closing connection");
                self.fail(token);
                false
            }
        }
    }

    fn read(&mut self, token: usize) {
        let max_frame_size = self.max_frame_size;

        let Some(connection) = self.registry.get_mut(token) else {
            return;
        };

        match connection.inbound.read_from(&mut connection.socket, max_frame_size) {
            Ok(progress) => {
                self.metrics.bytes_received += progress.bytes as u64;
                trace!(connection = %connection.id, bytes = progress.bytes, "read");

                if let Some(payload) = progress.frame {
                    self.completed_receives
                        .push(NetworkReceive::new(connection.id.clone(), payload));
                    self.metrics.receives_completed += 1;
                }
            }
            Err(ReceiveError::Closed) => {
                debug!(
                    connection = %connection.id,
                    partial = connection.inbound.is_partial(),
                    "peer closed connection"
                );
                self.fail(token);
            }
            Err(ReceiveError::Frame(err)) => {
                warn!(connection = %connection.id, error = %err, "framing violation, closing connection");
                self.fail(token);
            }
            Err(ReceiveError::Io(err)) => {
                warn!(connection = %connection.id, error = %err, "read failed, closing connection");
                self.fail(token);
            }
        }
    }

    fn set_interest(&mut self, token: usize, fd: std::os::fd::RawFd, interest: Interest) {
        let updated = match self.poller.as_mut() {
            Some(poller) => poller.reregister(fd, token, interest),
            None => Ok(()),
        };

        if let Err(err) = updated {
            warn!(token, error = %err, "failed to update interest, closing connection");
            self.fail(token);
        }
    }

    /// Closes a connection from inside `poll` and reports it.
    fn fail(&mut self, token: usize) {
        if let Some(connection) = self.release(token) {
            self.disconnected.push(connection.id);
        }
    }

    /// Deregisters and evicts a connection. The socket is closed when
    /// the returned record is dropped.
    fn release(&mut self, token: usize) -> Option<Connection> {
        let connection = self.registry.evict(token)?;

        if let Some(poller) = self.poller.as_mut() {
            poller.deregister(connection.socket.fd());
        }

        self.metrics.connections_closed += 1;
        self.metrics.active_connections = self.registry.len();

        Some(connection)
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("connections", &self.registry.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
