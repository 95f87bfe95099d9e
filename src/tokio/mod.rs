//! Tokio embedding.
//!
//! The core is loop-agnostic; this module supplies one binding. A
//! [`Driver`] owns a [`Client`] whose loop seam records the watcher and
//! timer interest in a shared cell, and [`Driver::run_until_idle`] awaits
//! socket readiness (via [`AsyncFd`]) or the timer and feeds the resulting
//! events back into the client. Single-threaded by construction: run it on
//! a current-thread runtime or inside a `LocalSet`.

use std::cell::RefCell;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;
use std::time::Duration;

use tokio::io::unix::AsyncFd;

use crate::client::Client;
use crate::connector::{Connector, WaitSet};
use crate::error::{Error, Result};
use crate::evloop::LoopHandle;
use crate::opts::Opts;

/// The client's current watcher and timer interest.
#[derive(Debug, Clone, Copy, Default)]
struct Wanted {
    fd: Option<RawFd>,
    read: bool,
    write: bool,
    timer: Option<Duration>,
}

/// Loop seam backed by a shared interest record, polled by [`Driver`].
#[derive(Clone, Default)]
pub struct TokioHandle {
    wanted: Rc<RefCell<Wanted>>,
}

impl LoopHandle for TokioHandle {
    fn start_read(&mut self, fd: RawFd) {
        let mut wanted = self.wanted.borrow_mut();
        wanted.fd = Some(fd);
        wanted.read = true;
    }

    fn stop_read(&mut self) {
        self.wanted.borrow_mut().read = false;
    }

    fn start_write(&mut self, fd: RawFd) {
        let mut wanted = self.wanted.borrow_mut();
        wanted.fd = Some(fd);
        wanted.write = true;
    }

    fn stop_write(&mut self) {
        self.wanted.borrow_mut().write = false;
    }

    fn start_timer(&mut self, after: Duration) {
        self.wanted.borrow_mut().timer = Some(after);
    }

    fn stop_timer(&mut self) {
        self.wanted.borrow_mut().timer = None;
    }
}

/// Raw fd wrapper for [`AsyncFd`]; the connector owns the fd, so dropping
/// this must not close it.
struct Socket(RawFd);

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// Drives a [`Client`] from a tokio runtime.
pub struct Driver<C: Connector> {
    client: Client<C, TokioHandle>,
    wanted: Rc<RefCell<Wanted>>,
}

impl<C: Connector> Driver<C> {
    pub fn new<E>(connector: C, opts: Opts, on_error: E) -> Self
    where
        E: FnMut(&mut Client<C, TokioHandle>, &Error) + 'static,
    {
        let handle = TokioHandle::default();
        let wanted = Rc::clone(&handle.wanted);
        Self {
            client: Client::new(connector, handle, opts, on_error),
            wanted,
        }
    }

    pub fn client(&self) -> &Client<C, TokioHandle> {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Client<C, TokioHandle> {
        &mut self.client
    }

    /// Await loop turns until the client registers no further interest,
    /// i.e. every queued operation has completed or been cancelled.
    pub async fn run_until_idle(&mut self) -> Result<()> {
        loop {
            let wanted = *self.wanted.borrow();

            if !wanted.read && !wanted.write && wanted.timer.is_none() {
                return Ok(());
            }
            let Some(fd) = wanted.fd else {
                return Ok(());
            };

            let async_fd = AsyncFd::new(Socket(fd))?;
            let timer = wanted.timer.unwrap_or_default();

            let fired = tokio::select! {
                ready = async_fd.readable(), if wanted.read => {
                    let mut guard = ready?;
                    guard.clear_ready();
                    WaitSet::READ
                }
                ready = async_fd.writable(), if wanted.write => {
                    let mut guard = ready?;
                    guard.clear_ready();
                    WaitSet::WRITE
                }
                _ = tokio::time::sleep(timer), if wanted.timer.is_some() => WaitSet::TIMEOUT,
            };

            drop(async_fd);
            self.client.on_event(fired);
        }
    }
}
