// src/connection/session.rs

//! Defines `Connection`, the per-socket state shared between the engine facade,
//! the receive loop and the keep-send task.

use super::state::{CloseCause, ConnectionState};
use crate::core::EngineError;
use crate::core::events::EventSink;
use crate::core::metrics;
use crate::core::registry::ConnectionRegistry;
use crate::core::scheduler::SendTask;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One outbound TCP session.
///
/// The socket is split at establishment: the read half is owned by the receive
/// loop task, the write half lives behind `writer` so that at most one writer
/// touches it at a time.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    host: String,
    port: u16,
    peer_addr: OnceLock<SocketAddr>,
    state: watch::Sender<ConnectionState>,
    close_cause: Mutex<Option<CloseCause>>,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    /// Cancelled when the connection starts closing. Send tasks run on child tokens.
    shutdown: CancellationToken,
    pub(crate) active_send: AsyncMutex<Option<SendTask>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    sink: EventSink,
}

impl Connection {
    /// Creates a connection in the `Connecting` state. Nothing is registered yet.
    pub(crate) fn new(id: u64, host: String, port: u16, sink: EventSink) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            id,
            host,
            port,
            peer_addr: OnceLock::new(),
            state,
            close_cause: Mutex::new(None),
            writer: AsyncMutex::new(None),
            shutdown: CancellationToken::new(),
            active_send: AsyncMutex::new(None),
            reader_task: Mutex::new(None),
            sink,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The resolved address of the peer, once established.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr.get().copied()
    }

    /// `host:port` as the caller supplied it.
    pub fn remote(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub(crate) fn sink(&self) -> &EventSink {
        &self.sink
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// A token that is cancelled with the connection but can also be cancelled on its own.
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Installs the write half and moves `Connecting → Connected`.
    /// Returns false if the connection was closed while connecting.
    pub(crate) async fn attach(&self, writer: OwnedWriteHalf, peer_addr: SocketAddr) -> bool {
        let _ = self.peer_addr.set(peer_addr);
        *self.writer.lock().await = Some(writer);
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        })
    }

    /// Moves a connection whose establishment failed straight to `Closed`.
    /// It was never registered, so no event is emitted.
    pub(crate) fn fail_connect(&self) {
        self.shutdown.cancel();
        self.state.send_replace(ConnectionState::Closed);
    }

    pub(crate) fn set_reader_task(&self, handle: JoinHandle<()>) {
        *self.reader_task.lock() = Some(handle);
    }

    /// Starts closing the connection: `Connecting`/`Connected → Closing`, then
    /// cancels the receive loop and any send task.
    ///
    /// Returns true only for the call that performed the transition; the cause
    /// recorded by that call is the one reported to listeners.
    pub(crate) fn begin_close(&self, cause: CloseCause) -> bool {
        let transitioned = self.state.send_if_modified(|state| {
            if state.is_open() {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        });
        if transitioned {
            debug!("Connection {} is closing: {:?}", self.id, cause);
            *self.close_cause.lock() = Some(cause);
        }
        self.shutdown.cancel();
        transitioned
    }

    /// Stops the keep-send task and shuts the write half down. Each step waits
    /// at most `grace`. Writes in flight observe the cancelled shutdown token
    /// and release the writer lock; if one still holds it after `grace`, the
    /// write half stays alive until the connection itself is dropped.
    pub(crate) async fn release(&self, grace: Duration) {
        if let Some(task) = self.active_send.lock().await.take() {
            task.stop(grace).await;
        }

        match tokio::time::timeout(grace, self.writer.lock()).await {
            Ok(mut writer) => {
                if let Some(mut half) = writer.take() {
                    match tokio::time::timeout(grace, half.shutdown()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!("Connection {}: write shutdown failed: {}", self.id, e),
                        Err(_) => debug!("Connection {}: write shutdown timed out.", self.id),
                    }
                }
            }
            Err(_) => warn!(
                "Connection {}: a write is still in flight after {:?}; releasing without shutdown.",
                self.id, grace
            ),
        }
    }

    /// The final `→ Closed` transition: removes the connection from the
    /// registry and reports the close. Idempotent.
    ///
    /// Lock order is state, then registry shard; `ConnectionRegistry::connections`
    /// releases shard locks before any state is read.
    pub(crate) fn complete_close(&self, registry: &ConnectionRegistry) {
        let transitioned = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed {
                return false;
            }
            registry.remove(self.id);
            *state = ConnectionState::Closed;
            true
        });
        if !transitioned {
            return;
        }

        self.shutdown.cancel();
        metrics::OPEN_CONNECTIONS.dec();

        let cause = self.close_cause.lock().take().unwrap_or(CloseCause::Aborted);
        let message = cause.describe(self.id, &self.remote());
        info!("{}", message);
        self.sink.state(self.id, false, message);
    }

    /// Waits until the connection is `Closed`, at most `grace`.
    /// Returns false on timeout.
    pub(crate) async fn wait_closed(&self, grace: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let closed = tokio::time::timeout(grace, rx.wait_for(|s| *s == ConnectionState::Closed))
            .await
            .is_ok_and(|r| r.is_ok());
        closed
    }

    /// Aborts the receive loop. Its close guard finishes the teardown on drop.
    pub(crate) fn abort_reader(&self) {
        if let Some(handle) = self.reader_task.lock().as_ref() {
            handle.abort();
        }
    }

    /// Writes the whole payload and flushes it, bounded by `timeout`.
    ///
    /// The state is checked again once the writer lock is held, so a write
    /// queued behind another never touches the socket of a closing connection.
    /// A write in flight is abandoned as soon as the connection starts closing.
    /// When `cancel` is given and has fired by the time the writer lock is
    /// acquired, nothing is written and `Ok(None)` is returned.
    pub(crate) async fn write_payload(
        &self,
        payload: &[u8],
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<usize>, EngineError> {
        if !self.is_connected() {
            return Err(self.not_connected());
        }

        let mut guard = self.writer.lock().await;
        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Ok(None);
        }
        if !self.is_connected() {
            return Err(self.not_connected());
        }
        let writer = guard.as_mut().ok_or_else(|| {
            EngineError::TransportClosed(format!("connection {} has no writer", self.id))
        })?;

        let write = async {
            writer.write_all(payload).await?;
            writer.flush().await
        };
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(EngineError::TransportClosed(format!(
                "connection {} closed during a write",
                self.id
            ))),
            res = tokio::time::timeout(timeout, write) => match res {
                Ok(Ok(())) => {
                    metrics::BYTES_SENT_TOTAL.inc_by(payload.len() as f64);
                    Ok(Some(payload.len()))
                }
                Ok(Err(e)) => Err(EngineError::Send(e.to_string())),
                Err(_) => Err(EngineError::Send(format!(
                    "write timed out after {timeout:?}"
                ))),
            },
        }
    }

    fn not_connected(&self) -> EngineError {
        EngineError::TransportClosed(format!("connection {} is {}", self.id, self.state()))
    }
}
