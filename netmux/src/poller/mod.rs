//! Platform-specific readiness poller abstraction.
//!
//! This module provides a unified interface over the native event
//! notification facility of the target (epoll on Linux, kqueue on macOS).
//!
//! Every backend exposes the same set of operations to the selector:
//! - `new` to allocate the OS multiplexing resource,
//! - `register` / `reregister` / `deregister` to manage interest,
//! - `poll` to wait for readiness with an optional timeout,
//! - `waker` to obtain a handle that interrupts a blocking wait.
//!
//! The concrete implementation is selected at compile time
//! depending on the target operating system.

pub(crate) mod common;

pub(crate) use common::{Event, Interest};

#[cfg(target_os = "macos")]
mod kqueue;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "macos")]
pub(crate) type Poller = kqueue::KqueuePoller;

#[cfg(target_os = "macos")]
pub(crate) use kqueue::Waker;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(target_os = "linux")]
pub(crate) use epoll::Waker;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;
