// src/core/engine.rs

//! The engine facade: every public operation validates its connection id
//! against the registry, then drives the connection, the scheduler, or both.

use crate::config::EngineConfig;
use crate::connection::{CloseCause, Connection, ReceiveOptions, run_receive_loop};
use crate::core::EngineError;
use crate::core::client::{ConnectResult, ConnectionInfo, SendResult, TcpClient};
use crate::core::events::{Event, EventListener, ListenerHandle, ReceiveDispatcher};
use crate::core::metrics;
use crate::core::registry::ConnectionRegistry;
use crate::core::scheduler::SendScheduler;
use async_trait::async_trait;
use socket2::SockRef;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct EngineInner {
    config: EngineConfig,
    registry: Arc<ConnectionRegistry>,
    dispatcher: ReceiveDispatcher,
    scheduler: SendScheduler,
    /// Cancelled once `shutdown` starts; no connection is registered after that.
    shutdown: CancellationToken,
}

/// The native TCP client engine. Cloning is cheap and every clone drives the
/// same set of connections.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Creates an engine. Must be called from within a Tokio runtime, which
    /// hosts the event dispatcher and every connection task.
    pub fn new(config: EngineConfig) -> Self {
        let scheduler = SendScheduler::new(&config);
        Self {
            inner: Arc::new(EngineInner {
                config,
                registry: Arc::new(ConnectionRegistry::new()),
                dispatcher: ReceiveDispatcher::new(),
                scheduler,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    /// Opens a TCP connection to `ip:port`, registers it, and starts its receive loop.
    ///
    /// The id is allocated before dialing; if the dial fails the id is burned
    /// and never registered. Fails with `ShutDown` once `shutdown` has started,
    /// including for a dial that was in flight when it started.
    pub async fn connect(&self, ip: &str, port: u16) -> Result<ConnectResult, EngineError> {
        if self.is_shut_down() {
            return Err(EngineError::ShutDown);
        }
        let host = ip.trim();
        if host.is_empty() {
            return Err(EngineError::InvalidArgument("ip cannot be empty".into()));
        }
        if port == 0 {
            return Err(EngineError::InvalidArgument("port cannot be 0".into()));
        }

        let id = self.inner.registry.allocate();
        let connection = Arc::new(Connection::new(
            id,
            host.to_string(),
            port,
            self.inner.dispatcher.sink(),
        ));
        info!("Connection {}: connecting to {}:{}", id, host, port);

        let connect_error = |reason: String| EngineError::Connect {
            host: host.to_string(),
            port,
            reason,
        };

        let stream = match self.open_stream(host, port).await {
            Ok(stream) => stream,
            Err(reason) => {
                connection.fail_connect();
                metrics::CONNECT_FAILURES_TOTAL.inc();
                warn!("Connection {}: failed to connect to {}:{}: {}", id, host, port, reason);
                return Err(connect_error(reason));
            }
        };
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(e) => {
                connection.fail_connect();
                metrics::CONNECT_FAILURES_TOTAL.inc();
                return Err(connect_error(e.to_string()));
            }
        };

        let (read_half, write_half) = stream.into_split();
        if !connection.attach(write_half, peer_addr).await {
            connection.fail_connect();
            return Err(connect_error("connection closed while connecting".into()));
        }
        if let Err(e) = self.inner.registry.insert(connection.clone()) {
            connection.fail_connect();
            return Err(e);
        }
        // `shutdown` cancels before it snapshots the registry, so a connection
        // inserted after the snapshot always sees the cancellation here.
        if self.is_shut_down() {
            self.inner.registry.remove(id);
            connection.fail_connect();
            info!("Connection {}: engine shut down while connecting.", id);
            return Err(EngineError::ShutDown);
        }
        metrics::OPEN_CONNECTIONS.inc();
        metrics::CONNECTIONS_OPENED_TOTAL.inc();
        info!("Connection {}: connected to {}", id, peer_addr);

        // The connected event is queued before the receive loop can queue any data.
        connection
            .sink()
            .state(id, true, format!("connected to {peer_addr}"));

        let options = ReceiveOptions {
            buffer_size: self.inner.config.read_buffer_size,
            close_grace: self.inner.config.close_grace,
        };
        let handle = tokio::spawn(run_receive_loop(
            connection.clone(),
            read_half,
            self.inner.registry.clone(),
            options,
        ));
        connection.set_reader_task(handle);

        Ok(ConnectResult {
            id,
            connected: true,
            data: String::new(),
        })
    }

    async fn open_stream(&self, host: &str, port: u16) -> Result<TcpStream, String> {
        let timeout = self.inner.config.connect_timeout;
        let stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e.to_string()),
            Err(_) => return Err(format!("timed out after {timeout:?}")),
        };
        self.apply_socket_options(&stream);
        Ok(stream)
    }

    /// Option failures are logged; the connection is usable without them.
    fn apply_socket_options(&self, stream: &TcpStream) {
        if let Err(e) = stream.set_nodelay(self.inner.config.tcp_nodelay) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
        if self.inner.config.tcp_keepalive {
            if let Err(e) = SockRef::from(stream).set_keepalive(true) {
                warn!("Failed to enable SO_KEEPALIVE: {}", e);
            }
        }
    }

    pub async fn send_once(&self, id: u64, data: &str) -> Result<SendResult, EngineError> {
        let connection = self.inner.registry.require(id)?;
        Ok(self.inner.scheduler.send_once(&connection, data).await)
    }

    pub async fn keep_send(
        &self,
        id: u64,
        data: &str,
        duration: Option<Duration>,
    ) -> Result<(), EngineError> {
        let connection = self.inner.registry.require(id)?;
        self.inner
            .scheduler
            .keep_send(&connection, data, duration)
            .await
    }

    /// Stops the keep-send task of `id`. Unknown ids and connections without a
    /// task are no-ops.
    pub async fn stop_send(&self, id: u64) -> Result<(), EngineError> {
        match self.inner.registry.get(id) {
            Some(connection) => self.inner.scheduler.stop_send(&connection).await,
            None => debug!("stop_send for unknown connection {}; nothing to stop.", id),
        }
        Ok(())
    }

    /// Closes the connection and waits until it is `Closed`.
    pub async fn disconnect(&self, id: u64) -> Result<(), EngineError> {
        let connection = self.inner.registry.require(id)?;
        self.close(&connection, CloseCause::Requested).await;
        Ok(())
    }

    async fn close(&self, connection: &Connection, cause: CloseCause) {
        let id = connection.id();
        if connection.begin_close(cause) {
            info!("Connection {}: close requested.", id);
        }

        // The receive loop spends at most one grace period each on the send
        // task, the writer lock and the write shutdown.
        let grace = self.inner.config.close_grace;
        let budget = grace.saturating_mul(4);
        if connection.wait_closed(budget).await {
            return;
        }

        warn!(
            "Connection {} did not close within {:?}; aborting its receive loop.",
            id, budget
        );
        connection.abort_reader();
        if !connection.wait_closed(grace).await {
            connection.complete_close(&self.inner.registry);
        }
    }

    /// Closes every open connection and refuses new ones. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let connections = self.inner.registry.connections();
        info!(
            "Shutting down engine with {} open connection(s).",
            connections.len()
        );

        let mut closing = JoinSet::new();
        for connection in connections {
            let engine = self.clone();
            closing.spawn(async move {
                engine.close(&connection, CloseCause::Shutdown).await;
            });
        }
        while let Some(res) = closing.join_next().await {
            if let Err(e) = res {
                warn!("A connection close task failed during shutdown: {e:?}");
            }
        }
        info!("Engine shutdown complete.");
    }

    /// A snapshot of every registered connection, ordered by id.
    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        let mut infos = Vec::new();
        for connection in self.inner.registry.connections() {
            infos.push(ConnectionInfo {
                id: connection.id(),
                host: connection.host().to_string(),
                port: connection.port(),
                peer_addr: connection.peer_addr(),
                state: connection.state(),
                keep_sending: self.inner.scheduler.has_active_task(&connection).await,
            });
        }
        infos
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener>) -> ListenerHandle {
        self.inner.dispatcher.add_listener(listener)
    }

    pub fn subscribe(&self) -> (UnboundedReceiver<Event>, ListenerHandle) {
        self.inner.dispatcher.subscribe()
    }

    pub fn remove_all_listeners(&self) {
        self.inner.dispatcher.remove_all_listeners();
    }
}

#[async_trait]
impl TcpClient for Engine {
    async fn connect(&self, ip: &str, port: u16) -> Result<ConnectResult, EngineError> {
        Engine::connect(self, ip, port).await
    }

    async fn send_once(&self, id: u64, data: &str) -> Result<SendResult, EngineError> {
        Engine::send_once(self, id, data).await
    }

    async fn keep_send(
        &self,
        id: u64,
        data: &str,
        duration: Option<Duration>,
    ) -> Result<(), EngineError> {
        Engine::keep_send(self, id, data, duration).await
    }

    async fn stop_send(&self, id: u64) -> Result<(), EngineError> {
        Engine::stop_send(self, id).await
    }

    async fn disconnect(&self, id: u64) -> Result<(), EngineError> {
        Engine::disconnect(self, id).await
    }

    fn add_listener(&self, listener: Arc<dyn EventListener>) -> Result<ListenerHandle, EngineError> {
        Ok(Engine::add_listener(self, listener))
    }

    fn subscribe(&self) -> Result<(UnboundedReceiver<Event>, ListenerHandle), EngineError> {
        Ok(Engine::subscribe(self))
    }
}
