//! The client: queues, state machine, pipeline engine, and lifecycle.
//!
//! A [`Client`] drives one connection on one event loop. Every asynchronous
//! operation takes a completion callback receiving `&mut Client` and a
//! `Result<Reply, Error>`; callbacks are free to issue further operations,
//! cancel everything, or finish the client from inside the call.
//!
//! # Example
//!
//! ```ignore
//! let mut client = Client::new(connector, loop_handle, Opts::default(), |_, err| {
//!     eprintln!("connection error: {err}");
//! });
//! client.connect(ConnectParams::try_from("mysql://app@db/orders")?)?;
//! client.query("SELECT id FROM orders", |_, result| {
//!     println!("{result:?}");
//! })?;
//! ```

mod lifecycle;
mod pipeline;
mod state;

pub use pipeline::MAX_PIPELINE_DEPTH;
pub(crate) use state::OpState;

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::buffer_pool::{PooledSql, GLOBAL_SQL_POOL};
use crate::connector::{Connector, Step, StmtId};
use crate::error::{Error, Result, ServerError};
use crate::evloop::LoopHandle;
use crate::opts::{ConnectParams, Opts};
use crate::queue::{CbQueue, PendingSend, SendQueue};
use crate::row::Row;
use crate::watcher::WatcherSet;

/// Successful outcome of an asynchronous operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Result rows of a SELECT, in server order
    Rows(Vec<Row>),
    /// Affected-row count of a DML statement
    Affected(u64),
    /// Handle of a freshly prepared statement
    Statement(StmtId),
    /// Completion of a utility operation
    Done,
}

/// Completion callback of an asynchronous operation.
pub type Callback<C, L> = Box<dyn FnOnce(&mut Client<C, L>, Result<Reply>)>;

type ConnectHook<C, L> = Box<dyn FnMut(&mut Client<C, L>)>;
type ErrorHook<C, L> = Box<dyn FnMut(&mut Client<C, L>, &Error)>;

/// The in-flight exclusive operation (everything that is not a pipelined
/// query): its callback, its statement if any, and the borrowed arguments
/// the connector may still reference.
struct Exclusive<C: Connector, L: LoopHandle> {
    callback: Callback<C, L>,
    stmt: Option<StmtId>,
    /// Keeps prepare SQL alive until the operation completes.
    sql: Option<PooledSql>,
    /// Keeps execute parameters alive until the operation completes.
    params: Vec<Option<Vec<u8>>>,
}

/// An asynchronous MariaDB/MySQL client bound to a single event loop.
pub struct Client<C: Connector, L: LoopHandle> {
    connector: C,
    watchers: WatcherSet<L>,
    opts: Opts,
    params: Option<ConnectParams>,

    state: OpState,
    draining: bool,
    connected: bool,

    send_queue: SendQueue<Callback<C, L>>,
    cb_queue: CbQueue<Callback<C, L>>,
    current_send: Option<PendingSend<Callback<C, L>>>,
    exclusive: Option<Exclusive<C, L>>,
    send_count: usize,

    callback_depth: usize,
    in_pipeline: bool,

    on_connect: Option<ConnectHook<C, L>>,
    on_error: Option<ErrorHook<C, L>>,
    last_server_error: Option<ServerError>,
}

impl<C: Connector, L: LoopHandle> Client<C, L> {
    /// Create a detached client.
    ///
    /// `on_error` fires on connection-level failures (the pending operations
    /// are then cancelled with the same message). Operation-level errors go
    /// to the owning callback only.
    pub fn new<E>(connector: C, loop_handle: L, opts: Opts, on_error: E) -> Self
    where
        E: FnMut(&mut Self, &Error) + 'static,
    {
        Self {
            connector,
            watchers: WatcherSet::new(loop_handle),
            opts,
            params: None,
            state: OpState::Idle,
            draining: false,
            connected: false,
            send_queue: SendQueue::new(),
            cb_queue: CbQueue::new(),
            current_send: None,
            exclusive: None,
            send_count: 0,
            callback_depth: 0,
            in_pipeline: false,
            on_connect: None,
            on_error: Some(Box::new(on_error)),
            last_server_error: None,
        }
    }

    /// Install the callback fired after each successful connection
    /// establishment (including the one triggered by [`reset`](Self::reset)).
    pub fn set_on_connect<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Self) + 'static,
    {
        self.on_connect = Some(Box::new(callback));
    }

    /// Replace the connection-error callback.
    pub fn set_on_error<E>(&mut self, callback: E)
    where
        E: FnMut(&mut Self, &Error) + 'static,
    {
        self.on_error = Some(Box::new(callback));
    }

    // === Queries ===

    /// Queue a query. Results are delivered strictly in enqueue order; up to
    /// [`MAX_PIPELINE_DEPTH`] queries are sent before any result is read.
    ///
    /// Allowed while a connection attempt is still in progress: the query
    /// runs once the connection is established.
    pub fn query<S, F>(&mut self, sql: S, callback: F) -> Result<()>
    where
        S: AsRef<[u8]>,
        F: FnOnce(&mut Self, Result<Reply>) + 'static,
    {
        if !self.connected && self.state != OpState::Connecting {
            return Err(Error::NotConnected);
        }
        self.send_queue
            .push(PendingSend::new(sql.as_ref(), Box::new(callback)));
        self.pump();
        Ok(())
    }

    // === Prepared statements ===

    /// Prepare a statement; the callback receives [`Reply::Statement`].
    pub fn prepare<S, F>(&mut self, sql: S, callback: F) -> Result<()>
    where
        S: AsRef<[u8]>,
        F: FnOnce(&mut Self, Result<Reply>) + 'static,
    {
        self.check_exclusive_allowed()?;
        let stmt = self.connector.stmt_init()?;
        let ex = Exclusive {
            callback: Box::new(callback),
            stmt: Some(stmt),
            sql: Some(GLOBAL_SQL_POOL.get(sql.as_ref())),
            params: Vec::new(),
        };
        let sql_bytes: &[u8] = ex.sql.as_deref().unwrap_or(&[]);
        let step = self.connector.stmt_prepare_start(stmt, sql_bytes);
        self.begin_exclusive(OpState::StmtPrepare, step, ex);
        Ok(())
    }

    /// Execute a prepared statement with the given parameters, each a byte
    /// string or `None` for SQL NULL.
    pub fn execute<F>(
        &mut self,
        stmt: StmtId,
        params: Vec<Option<Vec<u8>>>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut Self, Result<Reply>) + 'static,
    {
        self.check_exclusive_allowed()?;
        let ex = Exclusive {
            callback: Box::new(callback),
            stmt: Some(stmt),
            sql: None,
            params,
        };
        let step = self.connector.stmt_execute_start(stmt, &ex.params);
        self.begin_exclusive(OpState::StmtExecute, step, ex);
        Ok(())
    }

    /// Close a prepared statement. The handle is invalid once the callback
    /// has fired.
    pub fn close_stmt<F>(&mut self, stmt: StmtId, callback: F) -> Result<()>
    where
        F: FnOnce(&mut Self, Result<Reply>) + 'static,
    {
        self.check_exclusive_allowed()?;
        let ex = Exclusive {
            callback: Box::new(callback),
            stmt: Some(stmt),
            sql: None,
            params: Vec::new(),
        };
        let step = self.connector.stmt_close_start(stmt);
        self.begin_exclusive(OpState::StmtClose, step, ex);
        Ok(())
    }

    /// Reset a prepared statement's server-side state.
    pub fn stmt_reset<F>(&mut self, stmt: StmtId, callback: F) -> Result<()>
    where
        F: FnOnce(&mut Self, Result<Reply>) + 'static,
    {
        self.check_exclusive_allowed()?;
        let ex = Exclusive {
            callback: Box::new(callback),
            stmt: Some(stmt),
            sql: None,
            params: Vec::new(),
        };
        let step = self.connector.stmt_reset_start(stmt);
        self.begin_exclusive(OpState::StmtReset, step, ex);
        Ok(())
    }

    // === Utility operations ===

    /// Ping the server.
    pub fn ping<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnOnce(&mut Self, Result<Reply>) + 'static,
    {
        self.check_exclusive_allowed()?;
        let ex = self.bare_exclusive(callback);
        let step = self.connector.ping_start();
        self.begin_exclusive(OpState::Ping, step, ex);
        Ok(())
    }

    /// Change the default database.
    pub fn select_db<F>(&mut self, database: &str, callback: F) -> Result<()>
    where
        F: FnOnce(&mut Self, Result<Reply>) + 'static,
    {
        self.check_exclusive_allowed()?;
        let ex = self.bare_exclusive(callback);
        let step = self.connector.select_db_start(database);
        self.begin_exclusive(OpState::SelectDb, step, ex);
        Ok(())
    }

    /// Re-authenticate as a different user.
    pub fn change_user<F>(
        &mut self,
        user: &str,
        password: &str,
        database: Option<&str>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut Self, Result<Reply>) + 'static,
    {
        self.check_exclusive_allowed()?;
        let ex = self.bare_exclusive(callback);
        let step = self.connector.change_user_start(user, password, database);
        self.begin_exclusive(OpState::ChangeUser, step, ex);
        Ok(())
    }

    /// Reset the server-side session state without reconnecting.
    pub fn reset_connection<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnOnce(&mut Self, Result<Reply>) + 'static,
    {
        self.check_exclusive_allowed()?;
        let ex = self.bare_exclusive(callback);
        let step = self.connector.reset_connection_start();
        self.begin_exclusive(OpState::ResetConnection, step, ex);
        Ok(())
    }

    /// Escape a byte string for safe inclusion in a SQL literal.
    pub fn escape(&self, input: &[u8]) -> Vec<u8> {
        self.connector.escape(input)
    }

    // === Accessors ===

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Queued plus in-flight operations awaiting a callback.
    pub fn pending_count(&self) -> usize {
        self.send_queue.len()
            + self.cb_queue.len()
            + usize::from(self.current_send.is_some())
            + usize::from(self.exclusive.is_some())
    }

    /// Message of the last server error, or empty.
    pub fn error_message(&self) -> String {
        self.last_server_error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_default()
    }

    /// Code of the last server error, or 0.
    pub fn error_number(&self) -> u16 {
        self.last_server_error.as_ref().map(|e| e.code).unwrap_or(0)
    }

    /// SQLSTATE of the last server error, or `00000`.
    pub fn sqlstate(&self) -> String {
        self.last_server_error
            .as_ref()
            .map(|e| e.sqlstate.clone())
            .unwrap_or_else(|| "00000".to_string())
    }

    pub fn insert_id(&self) -> u64 {
        self.connector.insert_id()
    }

    pub fn warning_count(&self) -> u32 {
        self.connector.warning_count()
    }

    pub fn info(&self) -> Option<String> {
        self.connector.info()
    }

    pub fn server_version(&self) -> u64 {
        self.connector.server_version()
    }

    pub fn server_info(&self) -> String {
        self.connector.server_info()
    }

    pub fn thread_id(&self) -> u64 {
        self.connector.thread_id()
    }

    pub fn host_info(&self) -> String {
        self.connector.host_info()
    }

    pub fn character_set_name(&self) -> String {
        self.connector.character_set_name()
    }

    /// The connection's socket, if connected.
    pub fn socket(&self) -> Option<std::os::fd::RawFd> {
        self.connected.then(|| self.connector.socket())
    }

    // === Internals shared by the submodules ===

    fn bare_exclusive<F>(&mut self, callback: F) -> Exclusive<C, L>
    where
        F: FnOnce(&mut Self, Result<Reply>) + 'static,
    {
        Exclusive {
            callback: Box::new(callback),
            stmt: None,
            sql: None,
            params: Vec::new(),
        }
    }

    /// Gate for operations that need the connection to themselves.
    fn check_exclusive_allowed(&self) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if self.state != OpState::Idle {
            return Err(Error::InProgress);
        }
        if self.send_count > 0 {
            return Err(Error::PipelineBusy);
        }
        Ok(())
    }

    fn begin_exclusive(&mut self, state: OpState, step: Result<Step<()>>, ex: Exclusive<C, L>) {
        self.exclusive = Some(ex);
        self.state = state;
        match step {
            Ok(Step::Done(())) => self.exclusive_done(),
            Ok(Step::Pending(wait)) => self.update_watchers(wait),
            Err(err) => self.exclusive_failed(err),
        }
    }

    /// Invoke one user callback, preserving reentrancy: the depth counter
    /// gates outer pipeline entry, and a panic inside the callback is
    /// reported without unwinding into the state machine.
    pub(crate) fn invoke(&mut self, callback: Callback<C, L>, outcome: Result<Reply>) {
        if let Err(Error::Server(server)) = &outcome {
            self.last_server_error = Some(server.clone());
        }

        self.callback_depth += 1;
        let result = catch_unwind(AssertUnwindSafe(|| callback(&mut *self, outcome)));
        self.callback_depth -= 1;

        if let Err(payload) = result {
            tracing::error!(
                panic = %panic_message(&payload),
                "user callback panicked; suppressed"
            );
        }
    }

    pub(crate) fn fire_on_connect(&mut self) {
        let Some(mut hook) = self.on_connect.take() else {
            return;
        };
        self.callback_depth += 1;
        let result = catch_unwind(AssertUnwindSafe(|| hook(&mut *self)));
        self.callback_depth -= 1;
        if let Err(payload) = result {
            tracing::error!(
                panic = %panic_message(&payload),
                "on_connect callback panicked; suppressed"
            );
        }
        // Keep the hook installed unless the callback replaced it.
        if self.on_connect.is_none() {
            self.on_connect = Some(hook);
        }
    }

    pub(crate) fn fire_on_error(&mut self, err: &Error) {
        if let Error::Server(server) = err {
            self.last_server_error = Some(server.clone());
        }
        let Some(mut hook) = self.on_error.take() else {
            return;
        };
        self.callback_depth += 1;
        let result = catch_unwind(AssertUnwindSafe(|| hook(&mut *self, err)));
        self.callback_depth -= 1;
        if let Err(payload) = result {
            tracing::error!(
                panic = %panic_message(&payload),
                "on_error callback panicked; suppressed"
            );
        }
        if self.on_error.is_none() {
            self.on_error = Some(hook);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
