//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use kiki_core::{ClientConnection, ConnectionHandler, Delivery, Lifecycle, Payload, RelayError};
use metrics::{counter, gauge, histogram};
use tokio::sync::{OwnedSemaphorePermit, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::metrics::{
    RELAY_DELIVERIES_TOTAL, RELAY_DROPS_TOTAL, RELAY_MALFORMED_TOTAL, RELAY_MESSAGES_TOTAL,
    RELAY_SEND_FAILURES_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::server::AppState;

/// Everything a session needs besides the socket.
pub struct Session<H: ConnectionHandler> {
    /// Ordering guard around the variant handler.
    pub lifecycle: Lifecycle<H>,
    /// Core-side handle of this connection.
    pub connection: Arc<ClientConnection>,
    /// Receiving half of the connection's outbound queue.
    pub outbound: mpsc::Receiver<Payload>,
    /// `"direct"` or `"room"`, used as a metrics label.
    pub variant: &'static str,
    /// Connection-limit slot, released when the session ends.
    pub permit: OwnedSemaphorePermit,
}

/// Run a WebSocket session for an admitted client.
///
/// 1. Dispatches `Open` to the lifecycle
/// 2. Forwards inbound text as `Message` events
/// 3. Drains the outbound queue to the socket and sends periodic Pings
/// 4. Ends on peer close, socket error, heartbeat timeout, replacement by a
///    newer connection, or server shutdown
/// 5. Dispatches `Close` exactly once
#[instrument(
    skip_all,
    fields(
        variant = session.variant,
        client_id = %session.connection.identity(),
        connection_id = session.connection.connection_id(),
    )
)]
pub async fn run_session<H>(socket: WebSocket, session: Session<H>, state: AppState)
where
    H: ConnectionHandler + 'static,
{
    let Session {
        mut lifecycle,
        connection,
        outbound,
        variant,
        permit,
    } = session;

    let (ws_tx, mut ws_rx) = socket.split();
    let started = Instant::now();
    let cancel = state.shutdown.child_token();

    counter!(WS_CONNECTIONS_TOTAL, "variant" => variant).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    match lifecycle.open() {
        Ok(delivery) => record_delivery(delivery),
        Err(error) => warn!(%error, "open handling failed"),
    }
    state.record_rooms();

    let writer = tokio::spawn(write_loop(
        ws_tx,
        outbound,
        state.config.heartbeat_interval(),
        cancel.clone(),
    ));
    let heartbeat = tokio::spawn(watch_liveness(
        Arc::clone(&connection),
        state.config.heartbeat_interval(),
        state.config.heartbeat_timeout(),
        cancel.clone(),
    ));

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = connection.closed() => {
                info!("replaced by a newer connection, closing");
                break;
            }
            () = cancel.cancelled() => break,
        };

        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(error)) => {
                debug!(%error, "websocket read error");
                break;
            }
            None => break,
        };
        connection.mark_alive();

        let text = match msg {
            Message::Text(text) => text,
            Message::Binary(data) => {
                let len = data.len();
                match Utf8Bytes::try_from(data) {
                    Ok(text) => text,
                    Err(_) => {
                        info!(len, "dropping non-UTF8 binary frame");
                        continue;
                    }
                }
            }
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match lifecycle.message(text.as_str()) {
            Ok(delivery) => {
                counter!(RELAY_MESSAGES_TOTAL, "variant" => variant).increment(1);
                record_delivery(delivery);
            }
            Err(RelayError::MalformedMessage(error)) => {
                counter!(RELAY_MALFORMED_TOTAL).increment(1);
                warn!(%error, len = text.len(), "dropping malformed message");
            }
            Err(error) => warn!(%error, "message handling failed"),
        }
    }

    cancel.cancel();
    record_delivery(lifecycle.close());
    state.record_rooms();
    let _ = writer.await;
    let _ = heartbeat.await;

    info!(
        duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        dropped = connection.drop_count(),
        "session ended"
    );
    counter!(WS_DISCONNECTIONS_TOTAL, "variant" => variant).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    drop(permit);
}

/// Forward queued messages to the socket and send periodic Pings.
///
/// Exits (and cancels the session) when the socket fails, the queue closes,
/// or the session is cancelled, in which case a Close frame is sent first.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Payload>,
    ping_every: Duration,
    cancel: CancellationToken,
) {
    let mut ping = tokio::time::interval(ping_every);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(payload) = msg else { break };
                let Some(frame) = text_frame(payload) else { continue };
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    cancel.cancel();
}

/// Wrap a queued payload as a text frame over the same buffer.
fn text_frame(payload: Payload) -> Option<Message> {
    match Utf8Bytes::try_from(payload.into_bytes()) {
        Ok(text) => Some(Message::Text(text)),
        Err(error) => {
            warn!(%error, "dropping non-UTF8 outbound payload");
            None
        }
    }
}

async fn watch_liveness(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) {
    if run_heartbeat(connection, interval, timeout, cancel.clone()).await
        == HeartbeatResult::TimedOut
    {
        warn!(timeout_secs = timeout.as_secs(), "client unresponsive, disconnecting");
        cancel.cancel();
    }
}

fn record_delivery(delivery: Delivery) {
    counter!(RELAY_DELIVERIES_TOTAL).increment(delivery.delivered as u64);
    counter!(RELAY_DROPS_TOTAL).increment(delivery.dropped as u64);
    counter!(RELAY_SEND_FAILURES_TOTAL).increment(delivery.failed as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_reuses_payload_buffer() {
        let payload = Payload::from(String::from(r#"{"action":"event","client_id":"c1","body":"x"}"#));
        let ptr = payload.as_ptr();

        let Some(Message::Text(text)) = text_frame(payload.clone()) else {
            panic!("expected a text frame");
        };
        assert_eq!(text.as_str(), payload.as_str());
        assert_eq!(text.as_str().as_ptr(), ptr);
    }
}
