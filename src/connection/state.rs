// src/connection/state.rs

//! Lifecycle states of a connection and the reasons it can close.

use std::fmt;

/// ```text
/// Connecting ──established──▶ Connected ──close requested / peer EOF / I/O error──▶ Closing
///     │                                                                               │
///     └──────────────────────connect failed──────────▶ Closed ◀──socket released─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closing,
    /// Terminal. A closed connection is no longer in the registry.
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connection left the `Connected` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// The caller asked for the connection to be closed.
    Requested,
    /// The engine is shutting down.
    Shutdown,
    /// A read returned zero bytes.
    PeerClosed,
    ReadFailed(String),
    WriteFailed(String),
    /// The receive loop was aborted before it could record a cause.
    Aborted,
}

impl CloseCause {
    /// The text delivered as `StateEvent::data` for the closing transition.
    pub fn describe(&self, id: u64, remote: &str) -> String {
        match self {
            CloseCause::Requested => format!("connection {id} to {remote} disconnected"),
            CloseCause::Shutdown => format!("connection {id} to {remote} closed on shutdown"),
            CloseCause::PeerClosed => format!("connection {id} closed by peer {remote}"),
            CloseCause::ReadFailed(e) => format!("read from {remote} failed: {e}"),
            CloseCause::WriteFailed(e) => format!("write to {remote} failed: {e}"),
            CloseCause::Aborted => format!("connection {id} to {remote} aborted"),
        }
    }
}
