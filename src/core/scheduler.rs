// src/core/scheduler.rs

//! One-shot and repeating sends.
//!
//! A connection owns at most one keep-send task. The task writes its payload
//! immediately, then once per `keep_send_interval` (fixed delay between writes),
//! until its duration runs out, it is stopped, or the connection leaves
//! `Connected`. All writes go through `Connection::write_payload`, which holds
//! the connection's writer lock for the whole write.

use crate::config::EngineConfig;
use crate::connection::{CloseCause, Connection};
use crate::core::EngineError;
use crate::core::client::SendResult;
use crate::core::metrics;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// A single write with no ticker. Used for a keep-send with a zero duration.
    OneShot,
    /// Writes once per interval until the deadline, if any.
    Repeating(Option<Instant>),
}

impl SendMode {
    /// `None` repeats forever and `Some(Duration::ZERO)` writes exactly once.
    pub fn for_duration(duration: Option<Duration>, now: Instant) -> Self {
        match duration {
            Some(d) if d.is_zero() => SendMode::OneShot,
            Some(d) => SendMode::Repeating(Some(now + d)),
            None => SendMode::Repeating(None),
        }
    }
}

/// A running keep-send task.
#[derive(Debug)]
pub struct SendTask {
    connection_id: u64,
    mode: SendMode,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SendTask {
    /// False once the task has returned, whatever the reason.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancels the task and waits up to `grace` for it to observe the
    /// cancellation; aborts it after that.
    pub async fn stop(self, grace: Duration) {
        debug!(
            "Stopping {:?} keep-send on connection {}.",
            self.mode, self.connection_id
        );
        self.cancel.cancel();
        let mut handle = self.handle;
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            warn!(
                "Keep-send task on connection {} did not stop within {:?}; aborting.",
                self.connection_id, grace
            );
            handle.abort();
        }
    }
}

/// Drives writes on behalf of the engine facade.
#[derive(Debug, Clone)]
pub struct SendScheduler {
    send_timeout: Duration,
    interval: Duration,
    grace: Duration,
}

impl SendScheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            send_timeout: config.send_timeout,
            interval: config.keep_send_interval,
            grace: config.close_grace,
        }
    }

    /// Performs exactly one write. A connection that is not `Connected` fails
    /// fast without touching the socket. A failed write closes the connection.
    pub async fn send_once(&self, connection: &Arc<Connection>, payload: &str) -> SendResult {
        let id = connection.id();
        if !connection.is_connected() {
            return SendResult::failed(
                id,
                format!("connection {id} is {}", connection.state()),
            );
        }

        match connection
            .write_payload(payload.as_bytes(), self.send_timeout, None)
            .await
        {
            Ok(_) => SendResult::ok(id),
            Err(e) => {
                if let EngineError::Send(reason) = &e {
                    warn!("Send on connection {} failed: {}", id, reason);
                    connection.begin_close(CloseCause::WriteFailed(reason.clone()));
                }
                SendResult::failed(id, e.to_string())
            }
        }
    }

    /// Starts a keep-send task, replacing (and first stopping) any existing one.
    /// `None` repeats until stopped; `Some(Duration::ZERO)` writes exactly once.
    pub async fn keep_send(
        &self,
        connection: &Arc<Connection>,
        payload: &str,
        duration: Option<Duration>,
    ) -> Result<(), EngineError> {
        let id = connection.id();
        if !connection.is_connected() {
            return Err(EngineError::TransportClosed(format!(
                "connection {id} is {}",
                connection.state()
            )));
        }

        let mut slot = connection.active_send.lock().await;
        if let Some(previous) = slot.take() {
            debug!("Replacing the keep-send task on connection {}.", id);
            previous.stop(self.grace).await;
        }

        let payload = Bytes::copy_from_slice(payload.as_bytes());
        let mode = SendMode::for_duration(duration, Instant::now());
        let cancel = connection.child_token();
        let handle = tokio::spawn(run_keep_send(
            connection.clone(),
            payload,
            mode,
            self.interval,
            self.send_timeout,
            cancel.clone(),
        ));

        info!(
            "Keep-send started on connection {} (interval {:?}, duration {:?}).",
            id, self.interval, duration
        );
        *slot = Some(SendTask {
            connection_id: id,
            mode,
            cancel,
            handle,
        });
        Ok(())
    }

    /// Stops the keep-send task, if any. Calling it with no task is a no-op.
    pub async fn stop_send(&self, connection: &Connection) {
        let task = connection.active_send.lock().await.take();
        match task {
            Some(task) => {
                task.stop(self.grace).await;
                info!("Keep-send stopped on connection {}.", connection.id());
            }
            None => debug!(
                "stop_send on connection {} with no keep-send task.",
                connection.id()
            ),
        }
    }

    /// Whether the connection currently has a running keep-send task.
    pub async fn has_active_task(&self, connection: &Connection) -> bool {
        connection
            .active_send
            .lock()
            .await
            .as_ref()
            .is_some_and(SendTask::is_active)
    }
}

/// Decrements the active task gauge however the task ends, abort included.
struct ActiveTaskGauge;

impl ActiveTaskGauge {
    fn new() -> Self {
        metrics::ACTIVE_SEND_TASKS.inc();
        Self
    }
}

impl Drop for ActiveTaskGauge {
    fn drop(&mut self) {
        metrics::ACTIVE_SEND_TASKS.dec();
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_keep_send(
    connection: Arc<Connection>,
    payload: Bytes,
    mode: SendMode,
    interval: Duration,
    send_timeout: Duration,
    cancel: CancellationToken,
) {
    let _gauge = ActiveTaskGauge::new();
    let id = connection.id();
    let deadline = match mode {
        SendMode::OneShot => {
            write_tick(&connection, &payload, send_timeout, &cancel).await;
            return;
        }
        SendMode::Repeating(deadline) => deadline,
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut writes: u64 = 0;

    loop {
        // The first tick completes immediately, so the first write never waits.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Keep-send on connection {} cancelled after {} writes.", id, writes);
                return;
            }
            _ = ticker.tick() => {}
            _ = deadline_elapsed(deadline), if writes > 0 => {
                debug!("Keep-send on connection {} finished its duration after {} writes.", id, writes);
                return;
            }
        }

        if writes > 0 && deadline.is_some_and(|d| Instant::now() >= d) {
            debug!("Keep-send on connection {} finished its duration after {} writes.", id, writes);
            return;
        }
        if !write_tick(&connection, &payload, send_timeout, &cancel).await {
            return;
        }
        writes += 1;
    }
}

/// One keep-send write. Returns false when the task should end; a failed
/// write also starts closing the connection.
async fn write_tick(
    connection: &Connection,
    payload: &[u8],
    send_timeout: Duration,
    cancel: &CancellationToken,
) -> bool {
    if !connection.is_connected() {
        return false;
    }
    match connection
        .write_payload(payload, send_timeout, Some(cancel))
        .await
    {
        Ok(Some(_)) => true,
        Ok(None) => false,
        Err(EngineError::Send(reason)) => {
            warn!("Keep-send on connection {} failed: {}", connection.id(), reason);
            connection.begin_close(CloseCause::WriteFailed(reason));
            false
        }
        // The connection left `Connected` between the check and the write.
        Err(_) => false,
    }
}
