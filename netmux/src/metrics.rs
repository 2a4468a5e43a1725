//! Passive selector counters.
//!
//! Updated in place while the selector runs and read through
//! [`Selector::metrics`](crate::Selector::metrics). Recording is plain
//! arithmetic on owned fields and never influences I/O.

use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorMetrics {
    /// Calls to `poll`.
    pub poll_calls: u64,

    /// Cumulative time spent blocked in the readiness wait.
    pub select_time: Duration,

    /// Cumulative time spent performing reads and writes.
    pub io_time: Duration,

    /// Connections that completed their handshake.
    pub connections_created: u64,

    /// Connections that were closed for any reason.
    pub connections_closed: u64,

    /// Connects that failed (refused, unreachable, reset before completion).
    pub connect_failures: u64,

    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub sends_completed: u64,
    pub receives_completed: u64,

    /// Connections currently registered, connecting or connected.
    pub active_connections: usize,
}
