//! Error types for the user statistics service.
//!
//! This module defines the central `Error` enum shared by the connection pool,
//! the enrichment client, the repositories and the aggregation coordinator. It
//! implements `From<Error>` for `tonic::Status` so the points RPC server can
//! surface failures with appropriate status codes.
//!
//! ## Error Cases
//! - `Config`: the pool or a server was constructed with invalid settings.
//! - `Connect`: dialing the points service failed.
//! - `InvalidInput`: pagination or sort parameters were rejected.
//! - `Repository`: a data-access call failed.
//! - `Enrichment`: the point-balance RPC failed or returned garbage.
//! - `PoolTimeout`: no pooled connection became available in time.
//! - `PoolClosed`: a connection was requested from a closed pool.
//! - `Cancelled`: a sub-operation was stopped by a sibling's failure.
//! - `Task`: a spawned sub-operation panicked or was aborted.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the user statistics service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Invalid construction parameters (pool size, target URI, ...).
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// Establishing a transport connection failed.
    #[error("Failed to connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    /// The request parameters were malformed.
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// The backing store failed.
    #[error("Repository error: {reason}")]
    Repository { reason: String },

    /// The point-balance lookup failed.
    #[error("Enrichment error: {reason}")]
    Enrichment { reason: String },

    /// The pool stayed exhausted past the caller's deadline.
    #[error("Timed out after {waited_ms}ms waiting for a pooled connection")]
    PoolTimeout { waited_ms: u64 },

    /// The pool was closed.
    #[error("Connection pool is closed")]
    PoolClosed,

    /// Work was cancelled before it finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// A spawned task did not complete normally.
    #[error("Task failed: {context}")]
    Task { context: String },
}

impl Error {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn repository(reason: impl ToString) -> Self {
        Self::Repository {
            reason: reason.to_string(),
        }
    }

    pub fn enrichment(reason: impl ToString) -> Self {
        Self::Enrichment {
            reason: reason.to_string(),
        }
    }

    /// Whether the caller, rather than the service, is at fault.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput { .. })
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Config { reason } => Status::invalid_argument(reason),
            Error::Connect { target, reason } => {
                Status::unavailable(format!("Failed to connect to {target}: {reason}"))
            }
            Error::InvalidInput { reason } => Status::invalid_argument(reason),
            Error::Repository { reason } => Status::internal(reason),
            Error::Enrichment { reason } => Status::unavailable(reason),
            Error::PoolTimeout { waited_ms } => Status::resource_exhausted(format!(
                "No pooled connection available after {waited_ms}ms"
            )),
            Error::PoolClosed => Status::unavailable("Connection pool is closed"),
            Error::Cancelled => Status::cancelled("Operation was cancelled"),
            Error::Task { context } => Status::internal(context),
        }
    }
}
