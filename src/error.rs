//! Error types for ev-mariadb.

use thiserror::Error;

/// Result type for ev-mariadb operations.
pub type Result<T> = core::result::Result<T, Error>;

/// CR_SERVER_GONE_ERROR: the server closed the connection.
pub(crate) const CR_SERVER_GONE_ERROR: u16 = 2006;
/// CR_SERVER_LOST: the connection was lost mid-operation.
pub(crate) const CR_SERVER_LOST: u16 = 2013;
/// CR_CONNECTION_ERROR: could not reach the server at all.
pub(crate) const CR_CONNECTION_ERROR: u16 = 2002;
/// CR_CONN_HOST_ERROR: could not connect to the named host.
pub(crate) const CR_CONN_HOST_ERROR: u16 = 2003;

/// Error reported by the MariaDB/MySQL server for a single statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerError {
    /// Server error code (e.g. 1064 for a parse error)
    pub code: u16,
    /// 5-character SQLSTATE
    pub sqlstate: String,
    /// Primary error message
    pub message: String,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if self.code != 0 {
            write!(f, " (error {}", self.code)?;
            if !self.sqlstate.is_empty() {
                write!(f, ", SQLSTATE {}", self.sqlstate)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Error type for ev-mariadb.
#[derive(Debug, Error)]
pub enum Error {
    /// Server rejected a statement or the session
    #[error("server error: {0}")]
    Server(ServerError),

    /// I/O error surfaced by the connector
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation requires an established connection
    #[error("not connected")]
    NotConnected,

    /// Another operation is still being driven by the state machine
    #[error("operation already in progress")]
    InProgress,

    /// Operation requires exclusive use of the connection while queries are in flight
    #[error("pipeline busy: operation requires an idle connection")]
    PipelineBusy,

    /// Invalid usage (e.g. malformed URL, bad parameters)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Operation was cancelled collectively; the message names the cause
    #[error("{0}")]
    Cancelled(String),

    /// Connection is broken and cannot be reused without a reset
    #[error("Connection is broken")]
    ConnectionBroken,
}

impl Error {
    /// Returns true if the error indicates the connection is broken and
    /// cannot be reused without [`reset`](crate::Client::reset).
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionBroken => true,
            Error::Server(server) => matches!(
                server.code,
                CR_SERVER_GONE_ERROR | CR_SERVER_LOST | CR_CONNECTION_ERROR | CR_CONN_HOST_ERROR
            ),
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(server) => Some(&server.sqlstate),
            _ => None,
        }
    }

    /// Get the server error code if this is a server error.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Error::Server(server) => Some(server.code),
            _ => None,
        }
    }
}
