// src/core/client.rs

//! The abstract operation surface shared by every platform implementation.

use crate::connection::ConnectionState;
use crate::core::EngineError;
use crate::core::events::{Event, EventListener, ListenerHandle};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// The reply to a successful `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResult {
    /// The id assigned to the new connection.
    pub id: u64,
    /// Always true; a failed connect is an error instead.
    pub connected: bool,
    /// Reserved for a connect message. Currently always empty.
    pub data: String,
}

/// The reply to `send_once`. A failed write is reported here rather than as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub id: u64,
    /// True when every byte was handed to the socket.
    pub success: bool,
    /// Why the write failed. Empty on success.
    pub message: String,
}

impl SendResult {
    pub fn ok(id: u64) -> Self {
        Self {
            id,
            success: true,
            message: String::new(),
        }
    }

    pub fn failed(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            message: message.into(),
        }
    }
}

/// A point-in-time view of one registered connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: u64,
    /// The host as passed to `connect`, trimmed.
    pub host: String,
    pub port: u16,
    /// The resolved remote address.
    pub peer_addr: Option<SocketAddr>,
    pub state: ConnectionState,
    /// Whether a keep-send task is currently running.
    pub keep_sending: bool,
}

/// A TCP client as seen by the embedding application.
///
/// Payloads are text; they are written as their UTF-8 bytes without framing.
#[async_trait]
pub trait TcpClient: Send + Sync {
    /// Opens a connection and starts delivering its data as events.
    async fn connect(&self, ip: &str, port: u16) -> Result<ConnectResult, EngineError>;

    /// Writes `data` once.
    async fn send_once(&self, id: u64, data: &str) -> Result<SendResult, EngineError>;

    /// Writes `data` repeatedly until `duration` elapses (forever if `None`),
    /// `stop_send` is called, or the connection closes.
    async fn keep_send(
        &self,
        id: u64,
        data: &str,
        duration: Option<Duration>,
    ) -> Result<(), EngineError>;

    /// Stops the keep-send task of `id`. Idempotent.
    async fn stop_send(&self, id: u64) -> Result<(), EngineError>;

    /// Closes the connection and returns once it is fully closed.
    async fn disconnect(&self, id: u64) -> Result<(), EngineError>;

    /// Registers a listener for `onData` and `onConnectStateChange` events.
    fn add_listener(&self, listener: Arc<dyn EventListener>) -> Result<ListenerHandle, EngineError>;

    /// Convenience: a channel that receives every event.
    fn subscribe(&self) -> Result<(UnboundedReceiver<Event>, ListenerHandle), EngineError>;
}
