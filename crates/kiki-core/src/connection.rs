//! Per-connection handle shared between the transport and the core.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::ids::ClientId;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A serialized text frame queued for delivery.
///
/// Clones share one buffer, so a message serialized once can be queued on
/// any number of connections and handed to the socket without copying.
/// Only ever built from `String`/`&str`, so the bytes are always UTF-8.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Payload(Bytes);

impl Payload {
    /// The frame as text.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    /// The shared buffer backing this frame.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self(Bytes::from(text))
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl Deref for Payload {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of handing a message to a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for the writer task.
    Sent,
    /// Queue full; the message was discarded and the connection kept.
    Dropped,
    /// The writer is gone; the connection is broken.
    Closed,
}

/// A connected client as seen by the core.
///
/// The socket itself belongs to the transport. The core only holds the
/// sending half of the connection's outbound queue plus a close signal.
#[derive(Debug)]
pub struct ClientConnection {
    connection_id: u64,
    identity: ClientId,
    tx: mpsc::Sender<Payload>,
    close: CancellationToken,
    connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection around an existing outbound sender.
    pub fn new(identity: ClientId, tx: mpsc::Sender<Payload>) -> Self {
        let now = Instant::now();
        Self {
            connection_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            identity,
            tx,
            close: CancellationToken::new(),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Create a connection together with the receiving half of its queue.
    pub fn channel(
        identity: ClientId,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self::new(identity, tx)), rx)
    }

    /// Process-unique id distinguishing two connections with the same identity.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Identity supplied at connect time.
    pub fn identity(&self) -> &ClientId {
        &self.identity
    }

    /// Queue a serialized message without waiting.
    pub fn send(&self, message: Payload) -> SendOutcome {
        match self.tx.try_send(message) {
            Ok(()) => SendOutcome::Sent,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Whether the writer is still draining and no close was requested.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed() && !self.close.is_cancelled()
    }

    /// Ask the transport to terminate this connection.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Whether a close was requested.
    pub fn is_closing(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close.cancelled()
    }

    /// Total messages dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or any inbound traffic).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the peer was heard from since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the peer was last heard from.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
