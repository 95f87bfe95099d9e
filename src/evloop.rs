//! The event-loop seam.
//!
//! The core does not own an event loop. It asks the embedding loop, through
//! [`LoopHandle`], to watch the connection's socket for readability or
//! writability and to arm a timer; the loop feeds events back through
//! [`Client::on_event`](crate::Client::on_event). Registrations are managed
//! by [`WatcherSet`](crate::watcher::WatcherSet), which guarantees that each
//! start/stop call below is made at most once per transition.

use std::os::fd::RawFd;
use std::time::Duration;

/// Watcher and timer primitives supplied by the embedding event loop.
///
/// All calls are balanced by the watcher adapter: a `start_*` is never
/// issued while the corresponding watcher is already started, and a
/// `stop_*` is never issued while it is stopped.
pub trait LoopHandle {
    /// Start watching the fd for readability.
    fn start_read(&mut self, fd: RawFd);

    /// Stop the readability watcher.
    fn stop_read(&mut self);

    /// Start watching the fd for writability.
    fn start_write(&mut self, fd: RawFd);

    /// Stop the writability watcher.
    fn stop_write(&mut self);

    /// Arm a one-shot timer.
    fn start_timer(&mut self, after: Duration);

    /// Disarm the timer.
    fn stop_timer(&mut self);
}
