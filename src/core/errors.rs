// src/core/errors.rs

//! Defines the primary error type for the engine.

use thiserror::Error;

/// Every failure the engine can report to its caller.
///
/// The variant is chosen by where the failure happened, not by the underlying
/// I/O error kind: a refused connection is a `Connect` error, a broken pipe on a
/// live connection is a `Send` error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The remote endpoint could not be reached (refused, unreachable, timed out).
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    /// The connection id is unknown or the connection is already closed.
    #[error("Connection {0} not found")]
    NotFound(u64),

    /// A write failed on a connection that was believed to be alive.
    #[error("Send failed: {0}")]
    Send(String),

    /// The peer closed the connection or the receive side failed.
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// The current platform has no socket implementation.
    #[error("TCP client is not supported on the {0} platform")]
    UnsupportedPlatform(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine has been shut down and accepts no new connections.
    #[error("Engine is shut down")]
    ShutDown,

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns true for errors that mean the id no longer refers to a live connection.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}
