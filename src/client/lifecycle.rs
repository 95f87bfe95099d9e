//! Connection lifecycle: establish, reset, finish, skip, drop.

use crate::client::{Client, OpState};
use crate::connector::{Connector, Step};
use crate::error::{Error, Result};
use crate::evloop::LoopHandle;
use crate::opts::ConnectParams;

use super::pipeline::Flow;

impl<C: Connector, L: LoopHandle> Client<C, L> {
    /// Establish a connection.
    ///
    /// Connection-level failures (immediate or asynchronous) are reported
    /// through the `on_error` hook, after which all pending operations are
    /// cancelled with the same message. On success the `on_connect` hook
    /// fires and any queries queued in the meantime start executing.
    pub fn connect(&mut self, params: ConnectParams) -> Result<()> {
        if self.connected || self.state != OpState::Idle {
            return Err(Error::InvalidUsage(
                "connect on an already active client".into(),
            ));
        }
        self.params = Some(params);
        self.start_connect()
    }

    /// Shared by [`connect`](Self::connect) and [`reset`](Self::reset):
    /// apply options, then drive `connect_start`.
    fn start_connect(&mut self) -> Result<()> {
        self.connector.configure(&self.opts)?;

        let Some(params) = self.params.clone() else {
            return Err(Error::NotConnected);
        };

        match self.connector.connect_start(&params) {
            Ok(Step::Done(())) => {
                self.watchers.bind(self.connector.socket());
                self.finish_connect();
            }
            Ok(Step::Pending(wait)) => {
                // The fd exists as soon as the attempt starts; the watcher
                // adapter needs it to register interest.
                self.watchers.bind(self.connector.socket());
                self.state = OpState::Connecting;
                self.update_watchers(wait);
            }
            Err(err) => self.connect_failed(err),
        }
        Ok(())
    }

    pub(crate) fn finish_connect(&mut self) {
        self.set_idle();
        self.connected = true;
        self.fire_on_connect();
        self.pump();
    }

    pub(crate) fn connect_failed(&mut self, err: Error) {
        let message = err.to_string();
        self.fire_on_error(&err);
        self.cancel_all(&message);
        self.teardown();
    }

    /// Cancel everything pending with `"connection reset"`, close the
    /// connection, and re-establish it with the original parameters and
    /// options. Rebind `on_connect` beforehand to learn when the new
    /// connection is ready.
    pub fn reset(&mut self) -> Result<()> {
        if self.params.is_none() {
            return Err(Error::NotConnected);
        }
        self.cancel_all("connection reset");
        self.teardown();
        self.start_connect()
    }

    /// Cancel everything pending with `"connection finished"` and tear the
    /// connection down. Synchronous: every queued callback has run by the
    /// time this returns.
    pub fn finish(&mut self) {
        self.cancel_all("connection finished");
        self.teardown();
        self.params = None;
    }

    /// Abandon all pending operations with `"skipped"`.
    ///
    /// If an operation is in flight the connection itself must come down
    /// (its wire state is indeterminate) and a [`reset`](Self::reset) is
    /// needed before new queries; purely queued work is cancelled with the
    /// connection left intact.
    pub fn skip_pending(&mut self) {
        if self.state != OpState::Idle || self.send_count > 0 {
            self.teardown();
        }
        self.cancel_all("skipped");
    }

    /// Connection-level failure mid-operation: report, cancel, tear down.
    pub(crate) fn fatal(&mut self, err: Error) -> Flow {
        let message = err.to_string();
        self.fire_on_error(&err);
        self.cancel_all(&message);
        self.teardown();
        Flow::Stop
    }

    /// Cancel every pending operation, oldest first, delivering the given
    /// message to each callback. Loops until the queues are empty, so
    /// requests queued by a cancellation callback are cancelled as well.
    pub(crate) fn cancel_all(&mut self, message: &str) {
        if let Some(ex) = self.exclusive.take() {
            if let (OpState::StmtPrepare, Some(stmt)) = (self.state, ex.stmt) {
                self.connector.stmt_discard(stmt);
            }
            self.invoke(ex.callback, Err(Error::Cancelled(message.to_string())));
        }
        while let Some(callback) = self.cb_queue.pop() {
            self.invoke(callback, Err(Error::Cancelled(message.to_string())));
        }
        if let Some(pending) = self.current_send.take() {
            self.invoke(
                pending.into_callback(),
                Err(Error::Cancelled(message.to_string())),
            );
        }
        while let Some(pending) = self.send_queue.pop() {
            self.invoke(
                pending.into_callback(),
                Err(Error::Cancelled(message.to_string())),
            );
        }
    }

    /// Close the connection and return the client to detached state.
    /// Queued callbacks are untouched; callers cancel first when needed.
    pub(crate) fn teardown(&mut self) {
        self.connector.close();
        self.watchers.unbind();
        self.connected = false;
        self.state = OpState::Idle;
        self.draining = false;
        self.send_count = 0;
    }
}

impl<C: Connector, L: LoopHandle> Drop for Client<C, L> {
    fn drop(&mut self) {
        if self.pending_count() > 0 {
            self.cancel_all("connection finished");
        }
        self.connector.close();
    }
}
