//! An event-loop driven MariaDB/MySQL client core.
//!
//! # Features
//!
//! - **Query pipelining**: up to [`MAX_PIPELINE_DEPTH`] queries on the wire
//!   before the first result is read, with results delivered strictly in
//!   enqueue order
//! - **Continuation-driven state machine**: every operation advances over
//!   the connector's non-blocking start/continue API; synchronous
//!   completions never detour through the event loop
//! - **Loop-agnostic**: the event loop and the native connector are trait
//!   seams ([`LoopHandle`], [`Connector`]); a tokio binding ships behind
//!   the `tokio` feature
//! - **Reentrant callbacks**: completion callbacks may queue further
//!   queries, skip pending work, reset, or finish the client
//!
//! # Example
//!
//! ```ignore
//! use ev_mariadb::{Client, ConnectParams, Opts, Reply};
//!
//! let mut client = Client::new(connector, loop_handle, Opts::default(), |_, err| {
//!     eprintln!("connection error: {err}");
//! });
//!
//! client.connect(ConnectParams::try_from("mysql://app:secret@db/orders")?)?;
//! client.query("SELECT id, name FROM users", |_, result| match result {
//!     Ok(Reply::Rows(rows)) => println!("{} rows", rows.len()),
//!     other => println!("{other:?}"),
//! })?;
//! ```

pub mod buffer_pool;
pub mod client;
pub mod connector;
pub mod error;
pub mod evloop;
pub mod opts;
mod queue;
pub mod row;
pub mod watcher;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use client::{Callback, Client, Reply, MAX_PIPELINE_DEPTH};
pub use connector::{BindOut, Connector, Fetch, Step, StmtId, WaitSet};
pub use error::{Error, Result, ServerError};
pub use evloop::LoopHandle;
pub use opts::{ConnectParams, Opts};
pub use row::{Cell, Row};
