// src/platform/web.rs

use crate::core::EngineError;
use crate::core::client::{ConnectResult, SendResult, TcpClient};
use crate::core::events::{Event, EventListener, ListenerHandle};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;

/// The client handed out where raw sockets are unavailable. Every operation
/// is logged and fails with `UnsupportedPlatform`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebClient;

impl WebClient {
    pub fn new() -> Self {
        Self
    }

    fn unsupported(operation: &str) -> EngineError {
        warn!("{} called on the web platform, which has no TCP support.", operation);
        EngineError::UnsupportedPlatform("web".into())
    }
}

#[async_trait]
impl TcpClient for WebClient {
    async fn connect(&self, _ip: &str, _port: u16) -> Result<ConnectResult, EngineError> {
        Err(Self::unsupported("connect"))
    }

    async fn send_once(&self, _id: u64, _data: &str) -> Result<SendResult, EngineError> {
        Err(Self::unsupported("send_once"))
    }

    async fn keep_send(
        &self,
        _id: u64,
        _data: &str,
        _duration: Option<Duration>,
    ) -> Result<(), EngineError> {
        Err(Self::unsupported("keep_send"))
    }

    async fn stop_send(&self, _id: u64) -> Result<(), EngineError> {
        Err(Self::unsupported("stop_send"))
    }

    async fn disconnect(&self, _id: u64) -> Result<(), EngineError> {
        Err(Self::unsupported("disconnect"))
    }

    fn add_listener(&self, _listener: Arc<dyn EventListener>) -> Result<ListenerHandle, EngineError> {
        Err(Self::unsupported("add_listener"))
    }

    fn subscribe(&self) -> Result<(UnboundedReceiver<Event>, ListenerHandle), EngineError> {
        Err(Self::unsupported("subscribe"))
    }
}
