//! Connection records and the id → record registry.
//!
//! Records live in a [`Slab`]; the slot index is the token the socket is
//! registered with in the poller, so readiness events resolve to a
//! record without hashing. A side map resolves caller ids to tokens.

use crate::error::{Error, Result};
use crate::socket::Socket;
use crate::transmission::{InboundState, OutboundState};
use crate::utils::Slab;

use std::collections::HashMap;
use std::net::SocketAddr;

/// Lifecycle of a connection.
///
/// `Disconnected` is never stored: a record reaching it is evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Connecting,
    Connected,
}

/// One peer relationship owned by the selector.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) id: String,
    pub(crate) address: SocketAddr,
    pub(crate) socket: Socket,
    pub(crate) state: ConnectionState,
    /// Present iff a send is in flight.
    pub(crate) outbound: Option<OutboundState>,
    pub(crate) inbound: InboundState,
}

impl Connection {
    pub(crate) fn new(id: String, address: SocketAddr, socket: Socket) -> Self {
        Self {
            id,
            address,
            socket,
            state: ConnectionState::Connecting,
            outbound: None,
            inbound: InboundState::Empty,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Mapping from connection id to connection record.
///
/// Only touched from the thread driving the selector.
pub(crate) struct Registry {
    connections: Slab<Connection>,
    tokens: HashMap<String, usize>,
}

impl Registry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            connections: Slab::new(capacity),
            tokens: HashMap::with_capacity(capacity),
        }
    }

    /// Adds a record and returns its token.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionExists`] if a record with the same id is present.
    pub(crate) fn register(&mut self, connection: Connection) -> Result<usize> {
        if self.tokens.contains_key(&connection.id) {
            return Err(Error::ConnectionExists(connection.id));
        }

        let id = connection.id.clone();
        let token = self.connections.insert(connection);
        self.tokens.insert(id, token);

        Ok(token)
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.tokens.contains_key(id)
    }

    pub(crate) fn token(&self, id: &str) -> Option<usize> {
        self.tokens.get(id).copied()
    }

    /// Looks up a record by id.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownConnection`] if no record carries `id`.
    pub(crate) fn lookup(&self, id: &str) -> Result<&Connection> {
        self.tokens
            .get(id)
            .and_then(|&token| self.connections.get(token))
            .ok_or_else(|| Error::UnknownConnection(id.to_owned()))
    }

    pub(crate) fn get(&self, token: usize) -> Option<&Connection> {
        self.connections.get(token)
    }

    pub(crate) fn get_mut(&mut self, token: usize) -> Option<&mut Connection> {
        self.connections.get_mut(token)
    }

    /// Removes a record. Dropping the returned record closes its socket,
    /// so this is the only path that releases a descriptor.
    pub(crate) fn evict(&mut self, token: usize) -> Option<Connection> {
        let connection = self.connections.remove(token)?;
        self.tokens.remove(&connection.id);
        Some(connection)
    }

    pub(crate) fn tokens(&self) -> Vec<usize> {
        self.connections.indices()
    }

    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
