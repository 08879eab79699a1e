//! Error types for the users service.
//!
//! This module defines the central `Error` enum covering startup, request and
//! shutdown failures. It implements `From<Error>` for `tonic::Status` so store
//! failures propagate to gRPC (and through the gateway, to HTTP) callers with
//! the database driver's message and an appropriate status code.
//!
//! ## Error Cases
//! - `Config`: configuration that parsed but is not usable.
//! - `Migration`: applying the embedded schema migrations failed.
//! - `Store`: a database round trip failed (connection, constraint, decode).
//! - `Listener`: a listener could not bind its address.
//! - `Transport`, `Reflection`, `Http`, `Task`: server lifecycle failures.

use std::net::SocketAddr;
use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the users service.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration is malformed or unusable.
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// Schema migrations could not be applied.
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The record store rejected or failed a statement.
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// A listener failed to bind.
    #[error("Failed to bind {addr}: {source}")]
    Listener {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The gRPC server or the gateway's client channel failed.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The reflection service could not be built from the descriptor set.
    #[error("Reflection error: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),

    /// The HTTP gateway server failed.
    #[error("HTTP gateway error: {0}")]
    Http(#[source] std::io::Error),

    /// A server task panicked or was aborted.
    #[error("Server task failed: {context}")]
    Task { context: String },
}

impl Error {
    /// Returns `true` when the underlying store error means the database
    /// could not be reached, as opposed to a statement being rejected.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Store(
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            )
        )
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Store(ref e) if err.is_unavailable() => Status::unavailable(e.to_string()),
            Error::Store(e) => Status::internal(e.to_string()),
            other => Status::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn closed_pool_is_unavailable() {
        let status = Status::from(Error::Store(sqlx::Error::PoolClosed));
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), sqlx::Error::PoolClosed.to_string());
    }

    #[test]
    fn decode_failure_is_internal() {
        let err = Error::Store(sqlx::Error::ColumnDecode {
            index: "\"id\"".to_string(),
            source: "invalid digit found in string".into(),
        });
        assert!(!err.is_unavailable());

        let status = Status::from(err);
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("invalid digit found in string"));
    }

    #[test]
    fn protocol_failure_keeps_driver_message() {
        let status = Status::from(Error::Store(sqlx::Error::Protocol(
            "database connection failed".to_string(),
        )));
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("database connection failed"));
    }
}
