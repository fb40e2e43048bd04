//! Addressed delivery for the direct-relay variant.
//!
//! An inbound frame is forwarded as the text that arrived: it is parsed only
//! to find its recipients, and the same shared payload is queued on every
//! resolved recipient. Delivery is best effort and at most once:
//! offline recipients are skipped silently and nothing is retried.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::connection::{Payload, SendOutcome};
use crate::errors::RelayError;
use crate::ids::ClientId;
use crate::message::Envelope;
use crate::registry::ClientRegistry;

/// Per-recipient outcome of one [`MessageRouter::forward`] call.
///
/// Never reported to the sender; it feeds logs, metrics and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients whose queue accepted the message.
    pub delivered: Vec<ClientId>,
    /// Recipients not connected (or already closing).
    pub offline: Vec<ClientId>,
    /// Recipients whose queue was full.
    pub dropped: Vec<ClientId>,
    /// Recipients whose connection was broken; they have been unregistered.
    pub failed: Vec<ClientId>,
}

impl DeliveryReport {
    /// Number of distinct recipients attempted.
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.offline.len() + self.dropped.len() + self.failed.len()
    }
}

/// Resolves envelope recipients against the registry and delivers.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: Arc<ClientRegistry>,
}

impl MessageRouter {
    /// Create a router over `registry`.
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// The registry recipients are resolved against.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Parse an inbound text frame and forward it unmodified.
    pub fn deliver_raw(&self, text: &str) -> Result<DeliveryReport, RelayError> {
        let envelope = Envelope::parse(text)?;
        Ok(self.forward(&envelope, Payload::from(text)))
    }

    /// Serialize `envelope` and deliver it.
    pub fn deliver(&self, envelope: &Envelope) -> Result<DeliveryReport, RelayError> {
        let payload = Payload::from(envelope.to_json()?);
        Ok(self.forward(envelope, payload))
    }

    /// Queue `payload` on each distinct identity in `envelope.to`.
    ///
    /// Recipients are resolved under one read lock; sends happen after the
    /// lock is released. A broken recipient is unregistered and does not stop
    /// delivery to the others.
    pub fn forward(&self, envelope: &Envelope, payload: Payload) -> DeliveryReport {
        let mut seen = HashSet::with_capacity(envelope.to.len());
        let targets = envelope.to.iter().filter(|id| seen.insert(id.as_str()));
        let resolved = self.registry.resolve(targets);

        let mut report = DeliveryReport::default();
        for (identity, connection) in resolved {
            let Some(connection) = connection.filter(|c| !c.is_closing()) else {
                report.offline.push(identity);
                continue;
            };
            match connection.send(payload.clone()) {
                SendOutcome::Sent => report.delivered.push(identity),
                SendOutcome::Dropped => {
                    warn!(client_id = %identity, "recipient queue full, dropping message");
                    report.dropped.push(identity);
                }
                SendOutcome::Closed => {
                    warn!(client_id = %identity, "recipient connection broken, unregistering");
                    let _ = self.registry.release(&connection);
                    report.failed.push(identity);
                }
            }
        }

        debug!(
            from = %envelope.from,
            delivered = report.delivered.len(),
            offline = report.offline.len(),
            "envelope routed"
        );
        report
    }
}
