//! # netmux
//!
//! **netmux** is the non-blocking network I/O multiplexer of a storage
//! node's transport layer. A single [`Selector`] owns many TCP
//! connections, waits for their readiness on one thread (epoll on Linux,
//! kqueue on macOS), frames length-delimited messages on the wire and
//! reports what happened in discrete poll cycles.
//!
//! ## Wire format
//!
//! Every message is a frame: an 8-byte big-endian length that counts
//! itself, followed by the payload. See [`frame`].
//!
//! ## Driving a selector
//!
//! ```rust,no_run
//! use netmux::{NetworkSend, Selector};
//! use std::time::Duration;
//!
//! let mut selector = Selector::new()?;
//! selector.connect("replica-0", "127.0.0.1:6667", 64 * 1024, 64 * 1024)?;
//!
//! let mut outbox = Vec::new();
//! loop {
//!     selector.poll_with(Duration::from_millis(50), outbox.drain(..))?;
//!
//!     for id in selector.connected() {
//!         outbox.push(NetworkSend::new(id.clone(), b"hello"));
//!     }
//!     for receive in selector.completed_receives() {
//!         println!("{}: {:?}", receive.connection_id(), receive.payload());
//!     }
//!     if !selector.disconnected().is_empty() {
//!         break;
//!     }
//! }
//! # Ok::<(), netmux::Error>(())
//! ```
//!
//! ## Modules
//!
//! - [`frame`]: the length-prefixed framing codec
//!
//! A selector is not shared between threads: one thread owns it and
//! calls [`Selector::poll`] in a loop. Other threads may only interrupt a
//! blocking wait through a [`SelectorWaker`].

mod builder;
mod error;
mod metrics;
mod poller;
mod registry;
mod selector;
mod socket;
mod transmission;
mod utils;

pub mod frame;

pub use builder::SelectorBuilder;
pub use error::{Error, Result};
pub use frame::FrameError;
pub use metrics::SelectorMetrics;
pub use selector::{Selector, SelectorWaker};
pub use transmission::{NetworkReceive, NetworkSend};
