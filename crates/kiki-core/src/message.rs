//! Wire message formats (JSON text frames).

use serde::{Deserialize, Serialize};

use crate::errors::RelayError;
use crate::ids::ClientId;

/// Body of the notice broadcast when a client enters a room.
pub const JOINED_BODY: &str = "joined";

/// Body of the notice broadcast when a client leaves a room.
pub const LEFT_BODY: &str = "left";

/// Addressed message in the direct-relay variant.
///
/// Only the routing fields are typed. Relayed frames are forwarded as the
/// text that arrived, so fields beyond these three reach recipients intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender identity, as claimed by the sender.
    pub from: ClientId,
    /// Intended recipients. Duplicates are allowed but redundant.
    pub to: Vec<ClientId>,
    /// Opaque payload.
    pub body: String,
}

impl Envelope {
    /// Parse an inbound text frame.
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        serde_json::from_str(text).map_err(RelayError::MalformedMessage)
    }

    /// Encode for delivery.
    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(RelayError::Serialize)
    }
}

/// Kind of a server-synthesized room message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomAction {
    /// A client entered the room.
    Join,
    /// A client sent a payload to the room.
    Event,
    /// A client left the room.
    Exit,
}

/// Server → client message in the room-relay variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMessage {
    /// What happened.
    pub action: RoomAction,
    /// Who it happened to.
    pub client_id: ClientId,
    /// Lifecycle notice text, or the raw client payload for `event`.
    pub body: String,
}

impl RoomMessage {
    /// Notice that `client_id` joined.
    pub fn joined(client_id: ClientId) -> Self {
        Self {
            action: RoomAction::Join,
            client_id,
            body: JOINED_BODY.to_owned(),
        }
    }

    /// Relay of a raw client payload.
    pub fn event(client_id: ClientId, body: impl Into<String>) -> Self {
        Self {
            action: RoomAction::Event,
            client_id,
            body: body.into(),
        }
    }

    /// Notice that `client_id` left.
    pub fn left(client_id: ClientId) -> Self {
        Self {
            action: RoomAction::Exit,
            client_id,
            body: LEFT_BODY.to_owned(),
        }
    }
}
