// src/connection/guard.rs

//! Defines `CloseGuard`, an RAII guard that finishes a connection's teardown.

use super::session::Connection;
use super::state::CloseCause;
use crate::core::registry::ConnectionRegistry;
use std::sync::Arc;
use tracing::debug;

/// Held by the receive loop for the lifetime of a connection. When the loop
/// returns, or its task is aborted, the guard moves the connection to `Closed`,
/// removes it from the registry and emits the closing state event.
pub(crate) struct CloseGuard {
    connection: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
}

impl CloseGuard {
    pub(crate) fn new(connection: Arc<Connection>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            connection,
            registry,
        }
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        // Covers an abort that happened before any close was requested.
        if self.connection.begin_close(CloseCause::Aborted) {
            debug!(
                "CloseGuard for connection {} dropped without a recorded cause.",
                self.connection.id()
            );
        }
        self.connection.complete_close(&self.registry);
    }
}
