//! Per-connection transfer state.
//!
//! - [`send`]: the outbound frame of a connection and its write cursor,
//! - [`receive`]: the two-phase (header, payload) inbound accumulator.
//!
//! Both sides are driven through `std::io` traits so the selector can
//! hand them a socket and tests can hand them in-memory buffers.

pub(crate) mod receive;
pub(crate) mod send;

pub use receive::NetworkReceive;
pub use send::NetworkSend;

pub(crate) use receive::{InboundState, ReceiveError};
pub(crate) use send::OutboundState;
