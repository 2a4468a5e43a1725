//! Errors surfaced synchronously by the selector.
//!
//! Only two kinds of failure reach the caller as an [`Error`]:
//! caller-contract violations (sending on an unknown, unconnected or
//! busy connection; reusing a live id) and local failures while setting
//! up a connection or the selector itself. Everything that goes wrong on
//! an established or connecting socket is reported as a disconnect event
//! instead.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A send targeted an id with no registered connection.
    #[error("attempt to send to unknown connection `{0}`")]
    UnknownConnection(String),

    /// A send targeted a connection whose handshake has not completed.
    #[error("connection `{0}` is not connected yet")]
    NotConnected(String),

    /// A send targeted a connection that already has a send in flight.
    #[error("connection `{0}` already has a send in flight")]
    SendInProgress(String),

    /// One batch of sends carried two sends for the same connection.
    #[error("more than one send for connection `{0}` in a single poll")]
    DuplicateSend(String),

    /// `connect` was called with an id that is still in use.
    #[error("connection `{0}` is already registered")]
    ConnectionExists(String),

    /// The address could not be resolved.
    #[error("failed to resolve `{address}`: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The address resolved to nothing.
    #[error("`{0}` did not resolve to any address")]
    NoAddress(String),

    /// A local socket or poller operation failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The selector has been closed.
    #[error("selector is closed")]
    Closed,
}

impl Error {
    /// True for violations of the calling contract, as opposed to I/O
    /// or resolution failures.
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            Error::UnknownConnection(_)
                | Error::NotConnected(_)
                | Error::SendInProgress(_)
                | Error::DuplicateSend(_)
                | Error::ConnectionExists(_)
                | Error::Closed
        )
    }
}
