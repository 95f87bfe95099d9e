//! The connector seam: non-blocking MariaDB/MySQL protocol primitives.
//!
//! The client core never touches the wire. Everything protocol-level is
//! delegated to a [`Connector`]: an adapter over a native client library
//! exposing the non-blocking `*_start` / `*_cont` call pairs. Each pair
//! either completes without blocking ([`Step::Done`]) or suspends and
//! reports the wait conditions ([`Step::Pending`]) that must occur on the
//! connection's socket before `*_cont` can make progress.

use std::ops::{BitOr, BitOrAssign};
use std::os::fd::RawFd;

use crate::error::Result;
use crate::opts::{ConnectParams, Opts};

/// Wait conditions reported by a suspended connector operation.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitSet(u8);

impl WaitSet {
    /// Nothing to wait for.
    pub const NONE: WaitSet = WaitSet(0);
    /// The socket must become readable.
    pub const READ: WaitSet = WaitSet(1);
    /// The socket must become writable.
    pub const WRITE: WaitSet = WaitSet(1 << 1);
    /// The connector's operation timeout must elapse.
    pub const TIMEOUT: WaitSet = WaitSet(1 << 2);

    /// Check whether every flag in `other` is set.
    pub fn contains(self, other: WaitSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no wait condition is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for WaitSet {
    type Output = WaitSet;

    fn bitor(self, rhs: WaitSet) -> WaitSet {
        WaitSet(self.0 | rhs.0)
    }
}

impl BitOrAssign for WaitSet {
    fn bitor_assign(&mut self, rhs: WaitSet) {
        self.0 |= rhs.0;
    }
}

impl std::fmt::Debug for WaitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut set = f.debug_set();
        if self.contains(WaitSet::READ) {
            set.entry(&"READ");
        }
        if self.contains(WaitSet::WRITE) {
            set.entry(&"WRITE");
        }
        if self.contains(WaitSet::TIMEOUT) {
            set.entry(&"TIMEOUT");
        }
        set.finish()
    }
}

/// Outcome of a non-blocking start or continue call.
#[derive(Debug)]
pub enum Step<T> {
    /// The operation completed without blocking.
    Done(T),
    /// The operation suspended; `*_cont` may be called once one of the
    /// given wait conditions occurs.
    Pending(WaitSet),
}

/// Opaque prepared-statement handle: an index into the connector's
/// statement arena. Invalid once `stmt_close` completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtId(pub(crate) usize);

impl StmtId {
    pub fn new(index: usize) -> Self {
        StmtId(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// One bound output column for binary row fetch.
///
/// The connector writes at most `buffer.len()` bytes of the value into
/// `buffer` and always reports the value's full length in `length`, which
/// may exceed the buffer. `is_null` takes precedence over both.
#[derive(Debug, Default)]
pub struct BindOut {
    pub buffer: Vec<u8>,
    pub length: usize,
    pub is_null: bool,
}

impl BindOut {
    /// Create a bind with a zero-filled buffer of the given size.
    pub fn with_size(size: usize) -> Self {
        Self {
            buffer: vec![0; size],
            length: 0,
            is_null: false,
        }
    }
}

/// Outcome of fetching one binary row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// A row was fetched into the binds.
    Row,
    /// A row was fetched but at least one column exceeded its buffer;
    /// the affected columns must be refetched with `stmt_fetch_column`.
    Truncated,
    /// No more rows.
    Done,
}

/// Non-blocking protocol adapter over a native MariaDB/MySQL client.
///
/// Contract for every `*_start` / `*_cont` pair:
///
/// - `*_start` begins the operation. [`Step::Done`] means it completed
///   synchronously; [`Step::Pending`] means the caller must wait for the
///   reported conditions on [`socket`](Connector::socket) and then call the
///   matching `*_cont` with the conditions that actually occurred.
/// - Exactly one operation may be in flight per connector.
/// - Errors carry the server's diagnostics; after an `Err` the operation is
///   over and the connector is ready for the next one (unless the error is
///   [connection-broken](crate::Error::is_connection_broken)).
/// - Borrowed arguments (`sql`, `params`) are kept alive by the caller until
///   the operation completes, mirroring the native API's pointer contract.
pub trait Connector {
    /// Apply connection options. Called before connect and again on reset.
    fn configure(&mut self, opts: &Opts) -> Result<()>;

    fn connect_start(&mut self, params: &ConnectParams) -> Result<Step<()>>;
    fn connect_cont(&mut self, ready: WaitSet) -> Result<Step<()>>;

    /// Close the connection and return the connector to its pre-connect
    /// state. Safe to call at any time; in-flight operations are abandoned.
    fn close(&mut self);

    // === Plain queries ===

    fn send_query_start(&mut self, sql: &[u8]) -> Result<Step<()>>;
    fn send_query_cont(&mut self, ready: WaitSet) -> Result<Step<()>>;

    fn read_result_start(&mut self) -> Result<Step<()>>;
    fn read_result_cont(&mut self, ready: WaitSet) -> Result<Step<()>>;

    fn store_result_start(&mut self) -> Result<Step<()>>;
    fn store_result_cont(&mut self, ready: WaitSet) -> Result<Step<()>>;

    fn next_result_start(&mut self) -> Result<Step<()>>;
    fn next_result_cont(&mut self, ready: WaitSet) -> Result<Step<()>>;

    // === Stored text result set ===

    /// Number of columns in the stored result set.
    fn result_columns(&self) -> usize;

    /// Advance the row cursor. Returns false once past the last row.
    fn result_fetch(&mut self) -> Result<bool>;

    /// Borrow one cell of the current row, or `None` for SQL NULL.
    fn result_cell(&self, column: usize) -> Option<&[u8]>;

    /// Release the stored result set.
    fn result_free(&mut self);

    // === Utility operations ===

    fn ping_start(&mut self) -> Result<Step<()>>;
    fn ping_cont(&mut self, ready: WaitSet) -> Result<Step<()>>;

    fn select_db_start(&mut self, database: &str) -> Result<Step<()>>;
    fn select_db_cont(&mut self, ready: WaitSet) -> Result<Step<()>>;

    fn change_user_start(
        &mut self,
        user: &str,
        password: &str,
        database: Option<&str>,
    ) -> Result<Step<()>>;
    fn change_user_cont(&mut self, ready: WaitSet) -> Result<Step<()>>;

    fn reset_connection_start(&mut self) -> Result<Step<()>>;
    fn reset_connection_cont(&mut self, ready: WaitSet) -> Result<Step<()>>;

    // === Prepared statements ===

    /// Allocate a statement slot.
    fn stmt_init(&mut self) -> Result<StmtId>;

    fn stmt_prepare_start(&mut self, stmt: StmtId, sql: &[u8]) -> Result<Step<()>>;
    fn stmt_prepare_cont(&mut self, stmt: StmtId, ready: WaitSet) -> Result<Step<()>>;

    fn stmt_execute_start(&mut self, stmt: StmtId, params: &[Option<Vec<u8>>])
        -> Result<Step<()>>;
    fn stmt_execute_cont(&mut self, stmt: StmtId, ready: WaitSet) -> Result<Step<()>>;

    fn stmt_store_start(&mut self, stmt: StmtId) -> Result<Step<()>>;
    fn stmt_store_cont(&mut self, stmt: StmtId, ready: WaitSet) -> Result<Step<()>>;

    fn stmt_close_start(&mut self, stmt: StmtId) -> Result<Step<()>>;
    fn stmt_close_cont(&mut self, stmt: StmtId, ready: WaitSet) -> Result<Step<()>>;

    fn stmt_reset_start(&mut self, stmt: StmtId) -> Result<Step<()>>;
    fn stmt_reset_cont(&mut self, stmt: StmtId, ready: WaitSet) -> Result<Step<()>>;

    /// Release a statement slot without a server round trip. Used on abort
    /// paths (failed prepare, cancellation).
    fn stmt_discard(&mut self, stmt: StmtId);

    // === Binary result set (after stmt_store) ===

    /// Number of result columns of the statement.
    fn stmt_field_count(&self, stmt: StmtId) -> usize;

    /// Longest value of the column in the stored result, in bytes.
    fn stmt_max_length(&self, stmt: StmtId, column: usize) -> usize;

    /// Fetch the next row into the binds. `binds.len()` must equal
    /// [`stmt_field_count`](Connector::stmt_field_count).
    fn stmt_fetch(&mut self, stmt: StmtId, binds: &mut [BindOut]) -> Result<Fetch>;

    /// Refetch one column of the current row into `buffer`, which must be
    /// exactly the length reported by the truncated bind.
    fn stmt_fetch_column(&mut self, stmt: StmtId, column: usize, buffer: &mut [u8]) -> Result<()>;

    /// Release the statement's stored result set.
    fn stmt_free_result(&mut self, stmt: StmtId);

    /// Rows affected by the statement's last execution.
    fn stmt_affected_rows(&self, stmt: StmtId) -> u64;

    // === Metadata and diagnostics ===

    /// Columns of the last read result header; 0 for DML.
    fn field_count(&self) -> usize;

    /// Rows affected by the last DML statement.
    fn affected_rows(&self) -> u64;

    /// True if the last query has more result sets to read.
    fn more_results(&self) -> bool;

    /// The connection's socket, valid from connect start until close.
    fn socket(&self) -> RawFd;

    /// Remaining timeout of the suspended operation in milliseconds.
    /// Meaningful only while a `*_start`/`*_cont` reported
    /// [`WaitSet::TIMEOUT`].
    fn timeout_ms(&self) -> u64;

    fn insert_id(&self) -> u64;
    fn warning_count(&self) -> u32;
    fn info(&self) -> Option<String>;
    fn server_version(&self) -> u64;
    fn server_info(&self) -> String;
    fn thread_id(&self) -> u64;
    fn host_info(&self) -> String;
    fn character_set_name(&self) -> String;

    /// Escape a byte string for safe inclusion in a SQL literal, honouring
    /// the connection character set.
    fn escape(&self, input: &[u8]) -> Vec<u8>;
}
