// src/connection/reader.rs

//! The per-connection receive loop.

use super::guard::CloseGuard;
use super::session::Connection;
use super::state::CloseCause;
use crate::core::metrics;
use crate::core::registry::ConnectionRegistry;
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, warn};

/// Settings the receive loop needs from the engine configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReceiveOptions {
    pub buffer_size: usize,
    pub close_grace: Duration,
}

/// Reads from the socket until the peer closes it, a read fails, or the
/// connection is asked to close, then tears the connection down.
///
/// Every chunk read while the connection is `Connected` becomes one `DataEvent`.
/// The closing `StateEvent` is emitted by the guard after the last `DataEvent`.
pub(crate) async fn run_receive_loop(
    connection: Arc<Connection>,
    mut reader: OwnedReadHalf,
    registry: Arc<ConnectionRegistry>,
    options: ReceiveOptions,
) {
    let _guard = CloseGuard::new(connection.clone(), registry);
    let id = connection.id();
    let shutdown = connection.shutdown_token().clone();
    let mut buf = BytesMut::with_capacity(options.buffer_size);

    debug!("Receive loop for connection {} started.", id);
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                debug!("Receive loop for connection {} observed close request.", id);
                break;
            }

            res = reader.read_buf(&mut buf) => match res {
                Ok(0) => {
                    connection.begin_close(CloseCause::PeerClosed);
                    break;
                }
                Ok(n) => {
                    metrics::BYTES_RECEIVED_TOTAL.inc_by(n as f64);
                    let chunk = buf.split().freeze();
                    if connection.is_connected() {
                        connection.sink().data(id, chunk);
                    }
                    buf.reserve(options.buffer_size);
                }
                Err(e) => {
                    warn!("Read failed on connection {}: {}", id, e);
                    connection.begin_close(CloseCause::ReadFailed(e.to_string()));
                    break;
                }
            }
        }
    }

    drop(reader);
    connection.release(options.close_grace).await;
    debug!("Receive loop for connection {} finished.", id);
}
