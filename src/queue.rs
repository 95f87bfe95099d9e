//! Callback queues.
//!
//! Two ordered queues carry a request through its life: the send queue
//! holds requests not yet on the wire (SQL plus callback), the cb queue
//! holds requests whose query has been sent and whose result is owed. On
//! successful wire-submission the callback moves from one to the other
//! without touching the SQL buffer again; the buffer returns to the
//! [pool](crate::buffer_pool) at that point.

use std::collections::VecDeque;

use crate::buffer_pool::{PooledSql, GLOBAL_SQL_POOL};

/// An unsent request: owned SQL bytes and the user callback.
pub(crate) struct PendingSend<CB> {
    sql: PooledSql,
    callback: CB,
}

impl<CB> PendingSend<CB> {
    pub fn new(sql: &[u8], callback: CB) -> Self {
        Self {
            sql: GLOBAL_SQL_POOL.get(sql),
            callback,
        }
    }

    pub fn sql(&self) -> &[u8] {
        &self.sql
    }

    /// Transfer the callback out, releasing the SQL buffer to the pool.
    pub fn into_callback(self) -> CB {
        self.callback
    }
}

/// FIFO queue of unsent requests.
pub(crate) struct SendQueue<CB> {
    items: VecDeque<PendingSend<CB>>,
}

impl<CB> SendQueue<CB> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, pending: PendingSend<CB>) {
        self.items.push_back(pending);
    }

    pub fn pop(&mut self) -> Option<PendingSend<CB>> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// FIFO queue of sent requests awaiting their result.
pub(crate) struct CbQueue<CB> {
    items: VecDeque<CB>,
}

impl<CB> CbQueue<CB> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, callback: CB) {
        self.items.push_back(callback);
    }

    pub fn pop(&mut self) -> Option<CB> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}
