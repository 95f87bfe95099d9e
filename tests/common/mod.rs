//! Shared test harness: a scripted connector and a manual event loop.
//!
//! [`MockConnector`] implements the connector seam over an in-memory
//! pseudo-server: submitted SQL is evaluated immediately (preserving
//! submission order for results) and any operation can be scripted to
//! suspend with a chosen wait-set, so both the synchronous fast path and
//! the watcher-driven path are exercised. [`ManualLoop`] records watcher
//! registrations; tests fire events back with `client.on_event(..)`.

#![allow(dead_code)]

use std::cell::{Ref, RefCell};
use std::collections::{HashMap, VecDeque};
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use ev_mariadb::{
    BindOut, Cell, Client, ConnectParams, Connector, Error, Fetch, LoopHandle, Opts, Reply,
    Result, Row, ServerError, Step, StmtId, WaitSet,
};

pub const MOCK_FD: RawFd = 7;

// === Manual event loop ===

#[derive(Debug, Default)]
pub struct LoopState {
    pub read_fd: Option<RawFd>,
    pub write_fd: Option<RawFd>,
    pub timer: Option<Duration>,
    pub read_starts: usize,
    pub write_starts: usize,
    pub timer_starts: usize,
}

/// Event loop stand-in that records registrations for inspection.
#[derive(Clone, Default)]
pub struct ManualLoop(Rc<RefCell<LoopState>>);

impl ManualLoop {
    pub fn state(&self) -> Ref<'_, LoopState> {
        self.0.borrow()
    }

    /// True when no watcher or timer is registered.
    pub fn is_idle(&self) -> bool {
        let state = self.0.borrow();
        state.read_fd.is_none() && state.write_fd.is_none() && state.timer.is_none()
    }
}

impl LoopHandle for ManualLoop {
    fn start_read(&mut self, fd: RawFd) {
        let mut state = self.0.borrow_mut();
        state.read_fd = Some(fd);
        state.read_starts += 1;
    }

    fn stop_read(&mut self) {
        self.0.borrow_mut().read_fd = None;
    }

    fn start_write(&mut self, fd: RawFd) {
        let mut state = self.0.borrow_mut();
        state.write_fd = Some(fd);
        state.write_starts += 1;
    }

    fn stop_write(&mut self) {
        self.0.borrow_mut().write_fd = None;
    }

    fn start_timer(&mut self, after: Duration) {
        let mut state = self.0.borrow_mut();
        state.timer = Some(after);
        state.timer_starts += 1;
    }

    fn stop_timer(&mut self) {
        self.0.borrow_mut().timer = None;
    }
}

// === Scripted replies ===

/// What the pseudo-server answers for one statement.
pub enum MockReply {
    Rows(Vec<Row>),
    Affected(u64),
    Err {
        code: u16,
        sqlstate: &'static str,
        message: String,
    },
    /// Transport failure surfaced while reading the result.
    Broken(String),
    /// Multiple result sets: the first is delivered, the rest are drained.
    Multi(Vec<MockReply>),
}

/// Operations that can be scripted to suspend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Connect,
    SendQuery,
    ReadResult,
    StoreResult,
    NextResult,
    Ping,
    SelectDb,
    ChangeUser,
    ResetConnection,
    StmtPrepare,
    StmtExecute,
    StmtStore,
    StmtClose,
    StmtReset,
}

#[derive(Default)]
pub struct MockStmt {
    pub sql: String,
    pub rows: Vec<Row>,
    pub field_count: usize,
    pub affected: u64,
    cursor: usize,
    current: usize,
}

type Handler = Box<dyn FnMut(&str) -> MockReply>;

pub struct MockState {
    handler: Handler,
    pub opts: Option<Opts>,
    pub connected: bool,
    fail_connect: Option<String>,
    fail_prepare: Option<String>,

    /// Scripted suspensions: per op, a queue of occurrences, each a
    /// sequence of wait-sets the op yields before completing.
    defers: HashMap<Op, VecDeque<Vec<WaitSet>>>,
    /// Remaining waits of the currently suspended op.
    inflight_waits: VecDeque<WaitSet>,

    pending_replies: VecDeque<MockReply>,
    extra_replies: VecDeque<MockReply>,
    inflight_sql: Option<String>,
    inflight_stmt: Option<(usize, String)>,

    field_count: usize,
    affected: u64,
    staged: Option<Vec<Row>>,
    stored_rows: VecDeque<Row>,

    stmts: Vec<Option<MockStmt>>,
    max_lengths: Vec<usize>,

    pub sent: Vec<String>,
    pub insert_id: u64,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            handler: Box::new(default_eval),
            opts: None,
            connected: false,
            fail_connect: None,
            fail_prepare: None,
            defers: HashMap::new(),
            inflight_waits: VecDeque::new(),
            pending_replies: VecDeque::new(),
            extra_replies: VecDeque::new(),
            inflight_sql: None,
            inflight_stmt: None,
            field_count: 0,
            affected: 0,
            staged: None,
            stored_rows: VecDeque::new(),
            stmts: Vec::new(),
            max_lengths: Vec::new(),
            sent: Vec::new(),
            insert_id: 0,
        }
    }
}

impl MockState {
    fn stmt_mut(&mut self, stmt: StmtId) -> Result<&mut MockStmt> {
        self.stmts
            .get_mut(stmt.index())
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| Error::InvalidUsage("unknown statement handle".into()))
    }

    fn stmt_ref(&self, stmt: StmtId) -> Option<&MockStmt> {
        self.stmts.get(stmt.index()).and_then(|slot| slot.as_ref())
    }

    /// Apply one reply as the current result header.
    fn install_reply(&mut self, reply: MockReply) -> Result<Step<()>> {
        match reply {
            MockReply::Multi(mut parts) => {
                if parts.is_empty() {
                    self.field_count = 0;
                    self.affected = 0;
                    return Ok(Step::Done(()));
                }
                let first = parts.remove(0);
                self.extra_replies = parts.into_iter().collect();
                self.install_reply(first)
            }
            MockReply::Rows(rows) => {
                self.field_count = rows.first().map_or(1, |row| row.len().max(1));
                self.affected = 0;
                self.staged = Some(rows);
                Ok(Step::Done(()))
            }
            MockReply::Affected(count) => {
                self.field_count = 0;
                self.affected = count;
                self.staged = None;
                Ok(Step::Done(()))
            }
            MockReply::Err {
                code,
                sqlstate,
                message,
            } => Err(Error::Server(ServerError {
                code,
                sqlstate: sqlstate.to_string(),
                message,
            })),
            MockReply::Broken(message) => Err(Error::Io(std::io::Error::other(message))),
        }
    }
}

/// Scripting and inspection handle shared with the connector.
#[derive(Clone)]
pub struct MockControl(Rc<RefCell<MockState>>);

impl MockControl {
    pub fn set_handler<F>(&self, handler: F)
    where
        F: FnMut(&str) -> MockReply + 'static,
    {
        self.0.borrow_mut().handler = Box::new(handler);
    }

    /// Script the next run of `op` to suspend once per wait-set given,
    /// in order, before completing.
    pub fn defer(&self, op: Op, waits: &[WaitSet]) {
        self.0
            .borrow_mut()
            .defers
            .entry(op)
            .or_default()
            .push_back(waits.to_vec());
    }

    /// Script the next `count` runs of `op` to each suspend once.
    pub fn defer_each(&self, op: Op, count: usize, wait: WaitSet) {
        for _ in 0..count {
            self.defer(op, &[wait]);
        }
    }

    pub fn fail_connect(&self, message: &str) {
        self.0.borrow_mut().fail_connect = Some(message.to_string());
    }

    pub fn fail_prepare(&self, message: &str) {
        self.0.borrow_mut().fail_prepare = Some(message.to_string());
    }

    /// SQL submitted to the wire, in order.
    pub fn sent(&self) -> Vec<String> {
        self.0.borrow().sent.clone()
    }

    /// Reported per-column maximum lengths for binary results.
    pub fn set_max_lengths(&self, lengths: Vec<usize>) {
        self.0.borrow_mut().max_lengths = lengths;
    }

    pub fn set_insert_id(&self, value: u64) {
        self.0.borrow_mut().insert_id = value;
    }

    pub fn configured_opts(&self) -> Option<Opts> {
        self.0.borrow().opts.clone()
    }

    pub fn stmt_exists(&self, stmt: StmtId) -> bool {
        self.0.borrow().stmt_ref(stmt).is_some()
    }

    /// Statement slots not yet closed or discarded.
    pub fn live_stmts(&self) -> usize {
        self.0
            .borrow()
            .stmts
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}

// === The connector ===

pub struct MockConnector {
    state: Rc<RefCell<MockState>>,
    /// Row the text-result cursor is on; borrowed out by `result_cell`.
    current_row: Option<Row>,
}

impl MockConnector {
    pub fn new() -> (Self, MockControl) {
        let state = Rc::new(RefCell::new(MockState::default()));
        (
            Self {
                state: Rc::clone(&state),
                current_row: None,
            },
            MockControl(state),
        )
    }

    /// Consume the next scripted occurrence for `op` at start time.
    fn begin_op(&self, op: Op) -> Option<Step<()>> {
        let mut state = self.state.borrow_mut();
        let mut waits: VecDeque<WaitSet> = state
            .defers
            .get_mut(&op)
            .and_then(|queue| queue.pop_front())?
            .into();
        let first = waits.pop_front()?;
        state.inflight_waits = waits;
        Some(Step::Pending(first))
    }

    /// Consume the next wait of the suspended op at continue time.
    fn next_wait(&self) -> Option<Step<()>> {
        self.state
            .borrow_mut()
            .inflight_waits
            .pop_front()
            .map(Step::Pending)
    }

    fn apply_connect(&self) -> Result<Step<()>> {
        let init_command = {
            let mut state = self.state.borrow_mut();
            if let Some(message) = state.fail_connect.take() {
                return Err(Error::Server(ServerError {
                    code: 2002,
                    sqlstate: "HY000".to_string(),
                    message,
                }));
            }
            state.connected = true;
            state.opts.as_ref().and_then(|opts| opts.init_command.clone())
        };
        if let Some(sql) = init_command {
            // The native client runs the init command as part of the
            // handshake; results are discarded.
            self.run_handler(&sql);
        }
        Ok(Step::Done(()))
    }

    fn run_handler(&self, sql: &str) -> MockReply {
        let mut state = self.state.borrow_mut();
        state.sent.push(sql.to_string());
        (state.handler)(sql)
    }

    fn apply_send(&self, sql: String) -> Result<Step<()>> {
        let reply = self.run_handler(&sql);
        self.state.borrow_mut().pending_replies.push_back(reply);
        Ok(Step::Done(()))
    }

    fn apply_read(&self) -> Result<Step<()>> {
        let mut state = self.state.borrow_mut();
        let Some(reply) = state.pending_replies.pop_front() else {
            return Err(Error::Io(std::io::Error::other("no pending result")));
        };
        state.install_reply(reply)
    }

    fn apply_store(&self) -> Result<Step<()>> {
        let mut state = self.state.borrow_mut();
        let rows = state.staged.take().unwrap_or_default();
        state.stored_rows = rows.into_iter().collect();
        Ok(Step::Done(()))
    }

    fn apply_next(&self) -> Result<Step<()>> {
        let mut state = self.state.borrow_mut();
        match state.extra_replies.pop_front() {
            Some(reply) => state.install_reply(reply),
            None => {
                state.field_count = 0;
                Ok(Step::Done(()))
            }
        }
    }

    fn apply_prepare(&self, index: usize, sql: String) -> Result<Step<()>> {
        let mut state = self.state.borrow_mut();
        if let Some(message) = state.fail_prepare.take() {
            return Err(Error::Server(ServerError {
                code: 1064,
                sqlstate: "42000".to_string(),
                message,
            }));
        }
        if let Some(Some(slot)) = state.stmts.get_mut(index) {
            slot.sql = sql;
        }
        Ok(Step::Done(()))
    }

    fn apply_execute(&self, index: usize, sql: String) -> Result<Step<()>> {
        let reply = self.run_handler(&sql);
        let mut state = self.state.borrow_mut();
        let Some(Some(slot)) = state.stmts.get_mut(index) else {
            return Err(Error::InvalidUsage("unknown statement handle".into()));
        };
        slot.cursor = 0;
        slot.current = 0;
        match reply {
            MockReply::Rows(rows) => {
                slot.field_count = rows.first().map_or(1, |row| row.len().max(1));
                slot.affected = 0;
                slot.rows = rows;
                Ok(Step::Done(()))
            }
            MockReply::Affected(count) => {
                slot.field_count = 0;
                slot.affected = count;
                slot.rows = Vec::new();
                Ok(Step::Done(()))
            }
            MockReply::Multi(mut parts) if !parts.is_empty() => {
                let first = parts.remove(0);
                drop(state);
                self.install_stmt_reply(index, first)
            }
            MockReply::Multi(_) => Ok(Step::Done(())),
            MockReply::Err {
                code,
                sqlstate,
                message,
            } => Err(Error::Server(ServerError {
                code,
                sqlstate: sqlstate.to_string(),
                message,
            })),
            MockReply::Broken(message) => Err(Error::Io(std::io::Error::other(message))),
        }
    }

    fn install_stmt_reply(&self, index: usize, reply: MockReply) -> Result<Step<()>> {
        let mut state = self.state.borrow_mut();
        let Some(Some(slot)) = state.stmts.get_mut(index) else {
            return Err(Error::InvalidUsage("unknown statement handle".into()));
        };
        match reply {
            MockReply::Rows(rows) => {
                slot.field_count = rows.first().map_or(1, |row| row.len().max(1));
                slot.rows = rows;
            }
            MockReply::Affected(count) => {
                slot.field_count = 0;
                slot.affected = count;
            }
            _ => {}
        }
        Ok(Step::Done(()))
    }
}

impl Connector for MockConnector {
    fn configure(&mut self, opts: &Opts) -> Result<()> {
        self.state.borrow_mut().opts = Some(opts.clone());
        Ok(())
    }

    fn connect_start(&mut self, _params: &ConnectParams) -> Result<Step<()>> {
        if let Some(step) = self.begin_op(Op::Connect) {
            return Ok(step);
        }
        self.apply_connect()
    }

    fn connect_cont(&mut self, _ready: WaitSet) -> Result<Step<()>> {
        if let Some(step) = self.next_wait() {
            return Ok(step);
        }
        self.apply_connect()
    }

    fn close(&mut self) {
        self.current_row = None;
        let mut state = self.state.borrow_mut();
        state.connected = false;
        state.pending_replies.clear();
        state.extra_replies.clear();
        state.inflight_sql = None;
        state.inflight_stmt = None;
        state.staged = None;
        state.stored_rows.clear();
        state.field_count = 0;
        state.affected = 0;
        state.stmts.clear();
    }

    fn send_query_start(&mut self, sql: &[u8]) -> Result<Step<()>> {
        let sql = String::from_utf8_lossy(sql).to_string();
        if let Some(step) = self.begin_op(Op::SendQuery) {
            self.state.borrow_mut().inflight_sql = Some(sql);
            return Ok(step);
        }
        self.apply_send(sql)
    }

    fn send_query_cont(&mut self, _ready: WaitSet) -> Result<Step<()>> {
        if let Some(step) = self.next_wait() {
            return Ok(step);
        }
        let sql = self.state.borrow_mut().inflight_sql.take().unwrap_or_default();
        self.apply_send(sql)
    }

    fn read_result_start(&mut self) -> Result<Step<()>> {
        if let Some(step) = self.begin_op(Op::ReadResult) {
            return Ok(step);
        }
        self.apply_read()
    }

    fn read_result_cont(&mut self, _ready: WaitSet) -> Result<Step<()>> {
        if let Some(step) = self.next_wait() {
            return Ok(step);
        }
        self.apply_read()
    }

    fn store_result_start(&mut self) -> Result<Step<()>> {
        if let Some(step) = self.begin_op(Op::StoreResult) {
            return Ok(step);
        }
        self.apply_store()
    }

    fn store_result_cont(&mut self, _ready: WaitSet) -> Result<Step<()>> {
        if let Some(step) = self.next_wait() {
            return Ok(step);
        }
        self.apply_store()
    }

    fn next_result_start(&mut self) -> Result<Step<()>> {
        if let Some(step) = self.begin_op(Op::NextResult) {
            return Ok(step);
        }
        self.apply_next()
    }

    fn next_result_cont(&mut self, _ready: WaitSet) -> Result<Step<()>> {
        if let Some(step) = self.next_wait() {
            return Ok(step);
        }
        self.apply_next()
    }

    fn result_columns(&self) -> usize {
        self.state.borrow().field_count
    }

    fn result_fetch(&mut self) -> Result<bool> {
        self.current_row = self.state.borrow_mut().stored_rows.pop_front();
        Ok(self.current_row.is_some())
    }

    fn result_cell(&self, column: usize) -> Option<&[u8]> {
        self.current_row
            .as_ref()
            .and_then(|row| row.get(column))
            .and_then(|cell| cell.as_deref())
    }

    fn result_free(&mut self) {
        self.current_row = None;
        self.state.borrow_mut().stored_rows.clear();
    }

    fn ping_start(&mut self) -> Result<Step<()>> {
        Ok(self.begin_op(Op::Ping).unwrap_or(Step::Done(())))
    }

    fn ping_cont(&mut self, _ready: WaitSet) -> Result<Step<()>> {
        Ok(self.next_wait().unwrap_or(Step::Done(())))
    }

    fn select_db_start(&mut self, _database: &str) -> Result<Step<()>> {
        Ok(self.begin_op(Op::SelectDb).unwrap_or(Step::Done(())))
    }

    fn select_db_cont(&mut self, _ready: WaitSet) -> Result<Step<()>> {
        Ok(self.next_wait().unwrap_or(Step::Done(())))
    }

    fn change_user_start(
        &mut self,
        _user: &str,
        _password: &str,
        _database: Option<&str>,
    ) -> Result<Step<()>> {
        Ok(self.begin_op(Op::ChangeUser).unwrap_or(Step::Done(())))
    }

    fn change_user_cont(&mut self, _ready: WaitSet) -> Result<Step<()>> {
        Ok(self.next_wait().unwrap_or(Step::Done(())))
    }

    fn reset_connection_start(&mut self) -> Result<Step<()>> {
        Ok(self.begin_op(Op::ResetConnection).unwrap_or(Step::Done(())))
    }

    fn reset_connection_cont(&mut self, _ready: WaitSet) -> Result<Step<()>> {
        Ok(self.next_wait().unwrap_or(Step::Done(())))
    }

    fn stmt_init(&mut self) -> Result<StmtId> {
        let mut state = self.state.borrow_mut();
        state.stmts.push(Some(MockStmt::default()));
        Ok(StmtId::new(state.stmts.len() - 1))
    }

    fn stmt_prepare_start(&mut self, stmt: StmtId, sql: &[u8]) -> Result<Step<()>> {
        let sql = String::from_utf8_lossy(sql).to_string();
        if let Some(step) = self.begin_op(Op::StmtPrepare) {
            self.state.borrow_mut().inflight_stmt = Some((stmt.index(), sql));
            return Ok(step);
        }
        self.apply_prepare(stmt.index(), sql)
    }

    fn stmt_prepare_cont(&mut self, stmt: StmtId, _ready: WaitSet) -> Result<Step<()>> {
        if let Some(step) = self.next_wait() {
            return Ok(step);
        }
        let sql = self
            .state
            .borrow_mut()
            .inflight_stmt
            .take()
            .map(|(_, sql)| sql)
            .unwrap_or_default();
        self.apply_prepare(stmt.index(), sql)
    }

    fn stmt_execute_start(
        &mut self,
        stmt: StmtId,
        params: &[Option<Vec<u8>>],
    ) -> Result<Step<()>> {
        let sql = {
            let state = self.state.borrow();
            let Some(slot) = state.stmt_ref(stmt) else {
                return Err(Error::InvalidUsage("unknown statement handle".into()));
            };
            substitute(&slot.sql, params)
        };
        if let Some(step) = self.begin_op(Op::StmtExecute) {
            self.state.borrow_mut().inflight_stmt = Some((stmt.index(), sql));
            return Ok(step);
        }
        self.apply_execute(stmt.index(), sql)
    }

    fn stmt_execute_cont(&mut self, stmt: StmtId, _ready: WaitSet) -> Result<Step<()>> {
        if let Some(step) = self.next_wait() {
            return Ok(step);
        }
        let sql = self
            .state
            .borrow_mut()
            .inflight_stmt
            .take()
            .map(|(_, sql)| sql)
            .unwrap_or_default();
        self.apply_execute(stmt.index(), sql)
    }

    fn stmt_store_start(&mut self, _stmt: StmtId) -> Result<Step<()>> {
        Ok(self.begin_op(Op::StmtStore).unwrap_or(Step::Done(())))
    }

    fn stmt_store_cont(&mut self, _stmt: StmtId, _ready: WaitSet) -> Result<Step<()>> {
        Ok(self.next_wait().unwrap_or(Step::Done(())))
    }

    fn stmt_close_start(&mut self, stmt: StmtId) -> Result<Step<()>> {
        if let Some(step) = self.begin_op(Op::StmtClose) {
            return Ok(step);
        }
        let mut state = self.state.borrow_mut();
        state.stmt_mut(stmt)?;
        state.stmts[stmt.index()] = None;
        Ok(Step::Done(()))
    }

    fn stmt_close_cont(&mut self, stmt: StmtId, _ready: WaitSet) -> Result<Step<()>> {
        if let Some(step) = self.next_wait() {
            return Ok(step);
        }
        let mut state = self.state.borrow_mut();
        state.stmt_mut(stmt)?;
        state.stmts[stmt.index()] = None;
        Ok(Step::Done(()))
    }

    fn stmt_reset_start(&mut self, stmt: StmtId) -> Result<Step<()>> {
        if let Some(step) = self.begin_op(Op::StmtReset) {
            return Ok(step);
        }
        let mut state = self.state.borrow_mut();
        let slot = state.stmt_mut(stmt)?;
        slot.rows.clear();
        slot.cursor = 0;
        Ok(Step::Done(()))
    }

    fn stmt_reset_cont(&mut self, stmt: StmtId, _ready: WaitSet) -> Result<Step<()>> {
        if let Some(step) = self.next_wait() {
            return Ok(step);
        }
        let mut state = self.state.borrow_mut();
        let slot = state.stmt_mut(stmt)?;
        slot.rows.clear();
        slot.cursor = 0;
        Ok(Step::Done(()))
    }

    fn stmt_discard(&mut self, stmt: StmtId) {
        let mut state = self.state.borrow_mut();
        if let Some(slot) = state.stmts.get_mut(stmt.index()) {
            *slot = None;
        }
    }

    fn stmt_field_count(&self, stmt: StmtId) -> usize {
        self.state
            .borrow()
            .stmt_ref(stmt)
            .map_or(0, |slot| slot.field_count)
    }

    fn stmt_max_length(&self, _stmt: StmtId, column: usize) -> usize {
        self.state
            .borrow()
            .max_lengths
            .get(column)
            .copied()
            .unwrap_or(0)
    }

    fn stmt_fetch(&mut self, stmt: StmtId, binds: &mut [BindOut]) -> Result<Fetch> {
        let mut state = self.state.borrow_mut();
        let slot = state.stmt_mut(stmt)?;
        if slot.cursor >= slot.rows.len() {
            return Ok(Fetch::Done);
        }
        slot.current = slot.cursor;
        let row = slot.rows[slot.cursor].clone();
        slot.cursor += 1;

        let mut truncated = false;
        for (bind, cell) in binds.iter_mut().zip(row.iter()) {
            match cell {
                None => {
                    bind.is_null = true;
                    bind.length = 0;
                }
                Some(bytes) => {
                    bind.is_null = false;
                    bind.length = bytes.len();
                    let n = bind.buffer.len().min(bytes.len());
                    bind.buffer[..n].copy_from_slice(&bytes[..n]);
                    if bytes.len() > bind.buffer.len() {
                        truncated = true;
                    }
                }
            }
        }
        Ok(if truncated { Fetch::Truncated } else { Fetch::Row })
    }

    fn stmt_fetch_column(&mut self, stmt: StmtId, column: usize, buffer: &mut [u8]) -> Result<()> {
        let state = self.state.borrow();
        let bytes = state
            .stmt_ref(stmt)
            .and_then(|slot| slot.rows.get(slot.current))
            .and_then(|row| row.get(column))
            .and_then(|cell| cell.as_ref())
            .ok_or_else(|| Error::InvalidUsage("no column to refetch".into()))?;
        let n = buffer.len().min(bytes.len());
        buffer[..n].copy_from_slice(&bytes[..n]);
        Ok(())
    }

    fn stmt_free_result(&mut self, stmt: StmtId) {
        let mut state = self.state.borrow_mut();
        if let Ok(slot) = state.stmt_mut(stmt) {
            slot.rows.clear();
            slot.cursor = 0;
        }
    }

    fn stmt_affected_rows(&self, stmt: StmtId) -> u64 {
        self.state
            .borrow()
            .stmt_ref(stmt)
            .map_or(0, |slot| slot.affected)
    }

    fn field_count(&self) -> usize {
        self.state.borrow().field_count
    }

    fn affected_rows(&self) -> u64 {
        self.state.borrow().affected
    }

    fn more_results(&self) -> bool {
        !self.state.borrow().extra_replies.is_empty()
    }

    fn socket(&self) -> RawFd {
        MOCK_FD
    }

    fn timeout_ms(&self) -> u64 {
        1000
    }

    fn insert_id(&self) -> u64 {
        self.state.borrow().insert_id
    }

    fn warning_count(&self) -> u32 {
        0
    }

    fn info(&self) -> Option<String> {
        None
    }

    fn server_version(&self) -> u64 {
        100608
    }

    fn server_info(&self) -> String {
        "10.6.8-MariaDB".to_string()
    }

    fn thread_id(&self) -> u64 {
        42
    }

    fn host_info(&self) -> String {
        "Localhost via UNIX socket".to_string()
    }

    fn character_set_name(&self) -> String {
        self.state
            .borrow()
            .opts
            .as_ref()
            .and_then(|opts| opts.charset.clone())
            .unwrap_or_else(|| "utf8mb4".to_string())
    }

    fn escape(&self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len());
        for &byte in input {
            match byte {
                b'\'' => out.extend_from_slice(b"\\'"),
                b'"' => out.extend_from_slice(b"\\\""),
                b'\\' => out.extend_from_slice(b"\\\\"),
                b'\0' => out.extend_from_slice(b"\\0"),
                b'\n' => out.extend_from_slice(b"\\n"),
                b'\r' => out.extend_from_slice(b"\\r"),
                other => out.push(other),
            }
        }
        out
    }
}

// === Pseudo-SQL evaluation ===

/// Default statement evaluation: enough SQL to express the result shapes
/// the client cares about.
///
/// - `select A, B union all select C, D` yields literal rows; `null` cells
///   and `'quoted'` strings are understood, `x as alias` is stripped
/// - `;`-separated statements yield multiple result sets
/// - anything else is DML affecting one row
pub fn default_eval(sql: &str) -> MockReply {
    let trimmed = sql.trim().trim_end_matches(';');
    let statements: Vec<&str> = trimmed
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if statements.len() > 1 {
        return MockReply::Multi(statements.into_iter().map(eval_single).collect());
    }
    eval_single(trimmed)
}

fn eval_single(sql: &str) -> MockReply {
    let sql = sql.trim();
    if sql.len() < 7 || !sql[..7].eq_ignore_ascii_case("select ") {
        return MockReply::Affected(1);
    }
    let body = &sql[7..];
    let rows: Vec<Row> = split_keyword(body, " union all select ")
        .into_iter()
        .map(|row_expr| row_expr.split(',').map(eval_cell).collect())
        .collect();
    MockReply::Rows(rows)
}

fn split_keyword<'a>(body: &'a str, keyword: &str) -> Vec<&'a str> {
    let lower = body.to_ascii_lowercase();
    let mut parts = Vec::new();
    let mut start = 0;
    while let Some(pos) = lower[start..].find(keyword) {
        parts.push(&body[start..start + pos]);
        start += pos + keyword.len();
    }
    parts.push(&body[start..]);
    parts
}

fn eval_cell(cell: &str) -> Cell {
    let expr = cell.trim();
    let value = match expr.to_ascii_lowercase().find(" as ") {
        Some(pos) => expr[..pos].trim(),
        None => expr,
    };
    if value.eq_ignore_ascii_case("null") {
        return None;
    }
    let value = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value);
    Some(value.as_bytes().to_vec())
}

fn substitute(sql: &str, params: &[Option<Vec<u8>>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut index = 0;
    for ch in sql.chars() {
        if ch == '?' {
            match params.get(index) {
                Some(Some(bytes)) => {
                    out.push('\'');
                    out.push_str(&String::from_utf8_lossy(bytes));
                    out.push('\'');
                }
                _ => out.push_str("null"),
            }
            index += 1;
        } else {
            out.push(ch);
        }
    }
    out
}

// === Harness ===

pub type TestClient = Client<MockConnector, ManualLoop>;

pub struct Harness {
    pub client: TestClient,
    pub control: MockControl,
    pub lp: ManualLoop,
    pub errors: Rc<RefCell<Vec<String>>>,
}

pub fn params() -> ConnectParams {
    ConnectParams {
        host: "localhost".to_string(),
        port: 3306,
        user: "root".to_string(),
        password: String::new(),
        database: Some("test".to_string()),
        unix_socket: None,
    }
}

/// A detached client over a fresh mock connector and manual loop.
pub fn harness() -> Harness {
    harness_with_opts(Opts::default())
}

pub fn harness_with_opts(opts: Opts) -> Harness {
    let (connector, control) = MockConnector::new();
    let lp = ManualLoop::default();
    let errors: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&errors);
    let client = Client::new(connector, lp.clone(), opts, move |_, err| {
        sink.borrow_mut().push(err.to_string());
    });
    Harness {
        client,
        control,
        lp,
        errors,
    }
}

/// A client already connected through the synchronous fast path.
pub fn connected() -> Harness {
    connected_with_opts(Opts::default())
}

pub fn connected_with_opts(opts: Opts) -> Harness {
    let mut h = harness_with_opts(opts);
    h.client.connect(params()).unwrap();
    assert!(h.client.is_connected());
    h
}

// === Result capture ===

pub type Results = Rc<RefCell<Vec<core::result::Result<Reply, String>>>>;

pub fn results() -> Results {
    Rc::new(RefCell::new(Vec::new()))
}

/// Build a callback that records its outcome (errors as display strings).
pub fn push_to(results: &Results) -> impl FnOnce(&mut TestClient, Result<Reply>) + 'static {
    let results = Rc::clone(results);
    move |_, outcome| {
        results
            .borrow_mut()
            .push(outcome.map_err(|e| e.to_string()));
    }
}

/// Shorthand for an expected row of optional UTF-8 cells.
pub fn row(cells: &[Option<&str>]) -> Row {
    cells
        .iter()
        .map(|cell| cell.map(|s| s.as_bytes().to_vec()))
        .collect()
}

/// Prepare a statement over the synchronous fast path and return its handle.
pub fn prepare_stmt(client: &mut TestClient, sql: &str) -> StmtId {
    let captured: Rc<RefCell<Option<StmtId>>> = Rc::new(RefCell::new(None));
    let inner = Rc::clone(&captured);
    client
        .prepare(sql, move |_, outcome| {
            if let Ok(Reply::Statement(stmt)) = outcome {
                *inner.borrow_mut() = Some(stmt);
            }
        })
        .unwrap();
    let stmt = *captured.borrow();
    stmt.expect("prepare did not complete synchronously")
}
