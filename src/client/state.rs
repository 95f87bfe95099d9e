//! The operation state machine.
//!
//! Every non-idle state has a start step (issued by the pipeline engine or
//! an operation method), a continue step (driven by [`Client::on_event`]),
//! and a done handler shared by both: a `*_start` that completes
//! synchronously runs the same handler the `*_cont` path does, without a
//! detour through the event loop.

use crate::client::pipeline::Flow;
use crate::client::{Client, Reply};
use crate::connector::{Connector, Step, WaitSet};
use crate::error::{Error, Result};
use crate::evloop::LoopHandle;
use crate::row::{materialise_binary, materialise_text};

/// What the connection is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpState {
    Idle,
    Connecting,
    Send,
    ReadResult,
    StoreResult,
    NextResult,
    Ping,
    ChangeUser,
    SelectDb,
    ResetConnection,
    StmtPrepare,
    StmtExecute,
    StmtStore,
    StmtClose,
    StmtReset,
}

impl<C: Connector, L: LoopHandle> Client<C, L> {
    /// Feed an event-loop wakeup into the state machine.
    ///
    /// `ready` holds the wait conditions that actually occurred on the
    /// connection's socket (or [`WaitSet::TIMEOUT`] for a timer fire).
    pub fn on_event(&mut self, ready: WaitSet) {
        match self.state {
            // Stale wakeup from a registration already being torn down.
            OpState::Idle => {}
            OpState::Connecting => self.connect_cont(ready),
            OpState::Send => self.send_cont(ready),
            OpState::ReadResult => self.read_result_cont(ready),
            OpState::StoreResult => self.store_result_cont(ready),
            OpState::NextResult => self.next_result_cont(ready),
            OpState::Ping
            | OpState::ChangeUser
            | OpState::SelectDb
            | OpState::ResetConnection
            | OpState::StmtPrepare
            | OpState::StmtExecute
            | OpState::StmtStore
            | OpState::StmtClose
            | OpState::StmtReset => self.exclusive_cont(ready),
        }
    }

    /// Timer-fire convenience wrapper around [`on_event`](Self::on_event).
    pub fn on_timeout(&mut self) {
        self.on_event(WaitSet::TIMEOUT);
    }

    // === Shared transition plumbing ===

    /// Return to idle. Registrations are cleared unconditionally so that a
    /// stale watcher left by a synchronous fast-path completion can never
    /// mask the next operation's re-registration.
    pub(crate) fn set_idle(&mut self) {
        self.state = OpState::Idle;
        self.watchers.clear();
    }

    pub(crate) fn update_watchers(&mut self, wait: WaitSet) {
        let timeout = std::time::Duration::from_millis(self.connector.timeout_ms());
        self.watchers.update(wait, timeout);
    }

    // === Connecting ===

    fn connect_cont(&mut self, ready: WaitSet) {
        match self.connector.connect_cont(ready) {
            Ok(Step::Pending(wait)) => self.update_watchers(wait),
            Ok(Step::Done(())) => self.finish_connect(),
            Err(err) => self.connect_failed(err),
        }
    }

    // === Send ===

    fn send_cont(&mut self, ready: WaitSet) {
        match self.connector.send_query_cont(ready) {
            Ok(Step::Pending(wait)) => self.update_watchers(wait),
            Ok(Step::Done(())) => {
                let Some(pending) = self.current_send.take() else {
                    return;
                };
                self.cb_queue.push(pending.into_callback());
                self.send_count += 1;
                self.set_idle();
                self.pump();
            }
            Err(err) => self.send_failed(err),
        }
    }

    /// A query failed on the wire. The owning callback gets the error, the
    /// rest are cancelled, and the connection comes down.
    pub(crate) fn send_failed(&mut self, err: Error) {
        self.fire_on_error(&err);
        if let Some(pending) = self.current_send.take() {
            self.invoke(pending.into_callback(), Err(err));
        }
        self.cancel_all("send failed");
        self.teardown();
    }

    // === ReadResult / StoreResult ===

    fn read_result_cont(&mut self, ready: WaitSet) {
        match self.connector.read_result_cont(ready) {
            Ok(Step::Pending(wait)) => self.update_watchers(wait),
            Ok(Step::Done(())) => {
                let flow = self.read_result_done();
                self.after_flow(flow);
            }
            Err(err) => {
                let flow = self.read_result_failed(err);
                self.after_flow(flow);
            }
        }
    }

    /// The result header is in. SELECT chains into the store step; DML
    /// delivers the affected-row count directly.
    pub(crate) fn read_result_done(&mut self) -> Flow {
        self.send_count = self.send_count.saturating_sub(1);

        if self.connector.field_count() > 0 {
            match self.connector.store_result_start() {
                Ok(Step::Done(())) => self.store_result_done(),
                Ok(Step::Pending(wait)) => {
                    self.state = OpState::StoreResult;
                    self.update_watchers(wait);
                    Flow::Suspended
                }
                Err(err) => self.store_result_failed(err),
            }
        } else {
            let affected = self.connector.affected_rows();
            self.set_idle();
            self.deliver_next(Ok(Reply::Affected(affected)));
            self.after_delivery()
        }
    }

    pub(crate) fn read_result_failed(&mut self, err: Error) -> Flow {
        self.send_count = self.send_count.saturating_sub(1);

        if err.is_connection_broken() {
            return self.fatal(err);
        }

        // Local statement error: deliver in position, then let the pipeline
        // continue with the next pending operation.
        self.set_idle();
        self.deliver_next(Err(err));
        self.after_delivery()
    }

    fn store_result_cont(&mut self, ready: WaitSet) {
        match self.connector.store_result_cont(ready) {
            Ok(Step::Pending(wait)) => self.update_watchers(wait),
            Ok(Step::Done(())) => {
                let flow = if self.draining {
                    self.connector.result_free();
                    self.drain_step()
                } else {
                    self.store_result_done()
                };
                self.after_flow(flow);
            }
            Err(err) => {
                let flow = if self.draining {
                    self.drain_abort(err)
                } else {
                    self.store_result_failed(err)
                };
                self.after_flow(flow);
            }
        }
    }

    fn store_result_done(&mut self) -> Flow {
        let rows = materialise_text(&mut self.connector);
        self.connector.result_free();
        self.set_idle();
        self.deliver_next(rows.map(Reply::Rows));
        self.after_delivery()
    }

    fn store_result_failed(&mut self, err: Error) -> Flow {
        if err.is_connection_broken() {
            return self.fatal(err);
        }
        self.set_idle();
        self.deliver_next(Err(err));
        self.after_delivery()
    }

    // === Multi-result drain ===

    /// Walk the remaining result sets of a multi-statement query, freeing
    /// each. The owning statement's result has already been delivered, so
    /// errors here end the sweep without user-visible effect.
    pub(crate) fn drain_step(&mut self) -> Flow {
        loop {
            if !self.connector.more_results() {
                self.draining = false;
                self.set_idle();
                return Flow::Continue;
            }

            match self.connector.next_result_start() {
                Ok(Step::Pending(wait)) => {
                    self.draining = true;
                    self.state = OpState::NextResult;
                    self.update_watchers(wait);
                    return Flow::Suspended;
                }
                Ok(Step::Done(())) => {}
                Err(err) => return self.drain_abort(err),
            }

            if let Some(flow) = self.drain_store() {
                return flow;
            }
        }
    }

    /// Store and free one drained result set. `None` means keep sweeping.
    fn drain_store(&mut self) -> Option<Flow> {
        if self.connector.field_count() == 0 {
            return None;
        }
        match self.connector.store_result_start() {
            Ok(Step::Done(())) => {
                self.connector.result_free();
                None
            }
            Ok(Step::Pending(wait)) => {
                self.draining = true;
                self.state = OpState::StoreResult;
                self.update_watchers(wait);
                Some(Flow::Suspended)
            }
            Err(err) => Some(self.drain_abort(err)),
        }
    }

    fn next_result_cont(&mut self, ready: WaitSet) {
        match self.connector.next_result_cont(ready) {
            Ok(Step::Pending(wait)) => self.update_watchers(wait),
            Ok(Step::Done(())) => {
                let flow = match self.drain_store() {
                    Some(flow) => flow,
                    None => self.drain_step(),
                };
                self.after_flow(flow);
            }
            Err(err) => {
                let flow = self.drain_abort(err);
                self.after_flow(flow);
            }
        }
    }

    pub(crate) fn drain_abort(&mut self, err: Error) -> Flow {
        tracing::warn!(error = %err, "discarding error during multi-result drain");
        self.draining = false;
        self.set_idle();
        Flow::Continue
    }

    // === Exclusive operations ===

    fn exclusive_cont(&mut self, ready: WaitSet) {
        let stmt = self.exclusive.as_ref().and_then(|ex| ex.stmt);
        let step = match (self.state, stmt) {
            (OpState::Ping, _) => self.connector.ping_cont(ready),
            (OpState::SelectDb, _) => self.connector.select_db_cont(ready),
            (OpState::ChangeUser, _) => self.connector.change_user_cont(ready),
            (OpState::ResetConnection, _) => self.connector.reset_connection_cont(ready),
            (OpState::StmtPrepare, Some(stmt)) => self.connector.stmt_prepare_cont(stmt, ready),
            (OpState::StmtExecute, Some(stmt)) => self.connector.stmt_execute_cont(stmt, ready),
            (OpState::StmtStore, Some(stmt)) => self.connector.stmt_store_cont(stmt, ready),
            (OpState::StmtClose, Some(stmt)) => self.connector.stmt_close_cont(stmt, ready),
            (OpState::StmtReset, Some(stmt)) => self.connector.stmt_reset_cont(stmt, ready),
            _ => return,
        };

        match step {
            Ok(Step::Pending(wait)) => self.update_watchers(wait),
            Ok(Step::Done(())) => self.exclusive_done(),
            Err(err) => self.exclusive_failed(err),
        }
    }

    /// Shared done handler for exclusive operations.
    pub(crate) fn exclusive_done(&mut self) {
        match self.state {
            OpState::StmtExecute => self.stmt_execute_done(),
            OpState::StmtStore => self.stmt_store_done(),
            OpState::StmtPrepare => {
                let stmt = self.exclusive.as_ref().and_then(|ex| ex.stmt);
                match stmt {
                    Some(stmt) => self.finish_exclusive(Ok(Reply::Statement(stmt))),
                    None => self.finish_exclusive(Err(Error::ConnectionBroken)),
                }
            }
            OpState::Ping
            | OpState::SelectDb
            | OpState::ChangeUser
            | OpState::ResetConnection
            | OpState::StmtClose
            | OpState::StmtReset => self.finish_exclusive(Ok(Reply::Done)),
            _ => {}
        }
    }

    /// Execute completed on the wire; chain into the store step.
    fn stmt_execute_done(&mut self) {
        let Some(stmt) = self.exclusive.as_ref().and_then(|ex| ex.stmt) else {
            return;
        };
        self.state = OpState::StmtStore;
        match self.connector.stmt_store_start(stmt) {
            Ok(Step::Done(())) => self.stmt_store_done(),
            Ok(Step::Pending(wait)) => self.update_watchers(wait),
            Err(err) => self.exclusive_failed(err),
        }
    }

    fn stmt_store_done(&mut self) {
        let Some(stmt) = self.exclusive.as_ref().and_then(|ex| ex.stmt) else {
            return;
        };
        let outcome = if self.connector.stmt_field_count(stmt) == 0 {
            Ok(Reply::Affected(self.connector.stmt_affected_rows(stmt)))
        } else {
            let rows = materialise_binary(&mut self.connector, stmt);
            self.connector.stmt_free_result(stmt);
            rows.map(Reply::Rows)
        };
        self.finish_exclusive(outcome);
    }

    pub(crate) fn exclusive_failed(&mut self, err: Error) {
        if err.is_connection_broken() {
            self.fatal(err);
            return;
        }
        // A statement that failed to prepare never had server-side state;
        // release the client-side slot.
        if self.state == OpState::StmtPrepare {
            if let Some(stmt) = self.exclusive.as_ref().and_then(|ex| ex.stmt) {
                self.connector.stmt_discard(stmt);
            }
        }
        self.finish_exclusive(Err(err));
    }

    fn finish_exclusive(&mut self, outcome: Result<Reply>) {
        let Some(ex) = self.exclusive.take() else {
            return;
        };
        self.set_idle();
        self.invoke(ex.callback, outcome);
        self.pump();
    }
}
