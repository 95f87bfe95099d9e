//! Watcher adapter: wait-sets to event-loop registrations.

use std::os::fd::RawFd;
use std::time::Duration;

use crate::connector::WaitSet;
use crate::evloop::LoopHandle;

/// Tracks the three registrations (read, write, timer) for one connection
/// socket and keeps them in sync with the connector's current wait-set.
///
/// Start/stop calls to the loop are idempotent at this layer: a watcher is
/// started only if not already started and stopped only if started.
pub struct WatcherSet<L: LoopHandle> {
    loop_handle: L,
    fd: Option<RawFd>,
    read_active: bool,
    write_active: bool,
    timer_active: bool,
}

impl<L: LoopHandle> WatcherSet<L> {
    pub fn new(loop_handle: L) -> Self {
        Self {
            loop_handle,
            fd: None,
            read_active: false,
            write_active: false,
            timer_active: false,
        }
    }

    /// Bind the adapter to a connection socket. Called once per connection
    /// establishment; the fd is re-fetched on reset.
    pub fn bind(&mut self, fd: RawFd) {
        self.fd = Some(fd);
    }

    /// Drop the socket binding, stopping any active registration first.
    pub fn unbind(&mut self) {
        self.clear();
        self.fd = None;
    }

    /// Synchronise registrations with the given wait-set.
    ///
    /// For each flag: start the watcher iff not started, stop it iff started
    /// and no longer requested. `timeout` is the connector's currently
    /// remaining operation timeout, used when the wait-set asks for one.
    pub fn update(&mut self, wait: WaitSet, timeout: Duration) {
        let Some(fd) = self.fd else {
            tracing::warn!("watcher update with no bound socket");
            return;
        };

        match (wait.contains(WaitSet::READ), self.read_active) {
            (true, false) => {
                self.loop_handle.start_read(fd);
                self.read_active = true;
            }
            (false, true) => {
                self.loop_handle.stop_read();
                self.read_active = false;
            }
            _ => {}
        }

        match (wait.contains(WaitSet::WRITE), self.write_active) {
            (true, false) => {
                self.loop_handle.start_write(fd);
                self.write_active = true;
            }
            (false, true) => {
                self.loop_handle.stop_write();
                self.write_active = false;
            }
            _ => {}
        }

        match (wait.contains(WaitSet::TIMEOUT), self.timer_active) {
            (true, false) => {
                self.loop_handle.start_timer(timeout);
                self.timer_active = true;
            }
            (false, true) => {
                self.loop_handle.stop_timer();
                self.timer_active = false;
            }
            _ => {}
        }
    }

    /// Unconditionally stop all three registrations.
    ///
    /// Invoked on every transition back to idle, so that a stale
    /// registration left by a synchronous fast-path completion can never
    /// mask a later operation's re-registration.
    pub fn clear(&mut self) {
        if self.read_active {
            self.loop_handle.stop_read();
            self.read_active = false;
        }
        if self.write_active {
            self.loop_handle.stop_write();
            self.write_active = false;
        }
        if self.timer_active {
            self.loop_handle.stop_timer();
            self.timer_active = false;
        }
    }

    /// True if any registration is active.
    pub fn is_active(&self) -> bool {
        self.read_active || self.write_active || self.timer_active
    }
}
