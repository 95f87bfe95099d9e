//! The pipeline engine: bounded send phase, ordered receive phase.
//!
//! The engine alternates between sending queued queries (up to
//! [`MAX_PIPELINE_DEPTH`] in flight) and reading results back in submission
//! order. Both phases exploit the connector's synchronous fast path: a
//! `*_start` that completes immediately is handled inline, so a batch of
//! queries against a warm socket runs to completion without a single
//! event-loop turn.

use crate::client::{Client, OpState, Reply};
use crate::connector::{Connector, Step};
use crate::error::Result;
use crate::evloop::LoopHandle;
use crate::queue::PendingSend;

use super::Callback;

/// Maximum queries sent before any corresponding result is read. Additional
/// queued sends wait until the window frees.
pub const MAX_PIPELINE_DEPTH: usize = 64;

/// Where the engine goes after one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Made progress; take another engine turn.
    Continue,
    /// An operation registered watchers and awaits the event loop.
    Suspended,
    /// Nothing left to do, or the connection is gone.
    Stop,
}

impl<C: Connector, L: LoopHandle> Client<C, L> {
    /// Advance the pipeline until it suspends or runs dry.
    ///
    /// Entered only from the outermost frame: calls made while a callback
    /// is on the stack, or while the engine is already running, return
    /// immediately — the running engine picks up whatever the callback
    /// queued on its next turn.
    pub(crate) fn pump(&mut self) {
        if self.in_pipeline || self.callback_depth > 0 {
            return;
        }
        if !self.connected || self.state != OpState::Idle {
            return;
        }

        self.in_pipeline = true;
        loop {
            match self.engine_turn() {
                Flow::Continue => {}
                Flow::Suspended | Flow::Stop => break,
            }
        }
        self.in_pipeline = false;
    }

    /// One send-then-receive sweep.
    fn engine_turn(&mut self) -> Flow {
        // Send phase: fill the window.
        while self.send_count < MAX_PIPELINE_DEPTH {
            // A callback invoked below may have finished or reset the client.
            if !self.connected || self.state != OpState::Idle {
                return Flow::Stop;
            }
            let Some(pending) = self.send_queue.pop() else {
                break;
            };
            match self.send_one(pending) {
                Flow::Continue => {}
                other => return other,
            }
        }

        // Receive phase: read the oldest in-flight result.
        if self.send_count == 0 {
            return Flow::Stop;
        }
        self.receive_one()
    }

    fn send_one(&mut self, pending: PendingSend<Callback<C, L>>) -> Flow {
        match self.connector.send_query_start(pending.sql()) {
            Ok(Step::Done(())) => {
                self.cb_queue.push(pending.into_callback());
                self.send_count += 1;
                Flow::Continue
            }
            Ok(Step::Pending(wait)) => {
                self.current_send = Some(pending);
                self.state = OpState::Send;
                self.update_watchers(wait);
                Flow::Suspended
            }
            Err(err) => {
                self.current_send = Some(pending);
                self.send_failed(err);
                Flow::Stop
            }
        }
    }

    fn receive_one(&mut self) -> Flow {
        match self.connector.read_result_start() {
            Ok(Step::Pending(wait)) => {
                self.state = OpState::ReadResult;
                self.update_watchers(wait);
                Flow::Suspended
            }
            Ok(Step::Done(())) => self.read_result_done(),
            Err(err) => self.read_result_failed(err),
        }
    }

    /// Hand a result (or error) to the oldest pending callback.
    pub(crate) fn deliver_next(&mut self, outcome: Result<Reply>) {
        let Some(callback) = self.cb_queue.pop() else {
            tracing::warn!("result with no pending callback");
            return;
        };
        self.invoke(callback, outcome);
    }

    /// After a delivery: sweep residual result sets, then let the engine
    /// loop back into the send phase for anything the callback queued.
    pub(crate) fn after_delivery(&mut self) -> Flow {
        if self.connected && self.connector.more_results() {
            return self.drain_step();
        }
        Flow::Continue
    }

    /// Event-path counterpart of the engine loop: a done handler that ran
    /// outside [`pump`](Self::pump) asks the engine to take over again.
    pub(crate) fn after_flow(&mut self, flow: Flow) {
        if flow == Flow::Continue {
            self.pump();
        }
    }
}
