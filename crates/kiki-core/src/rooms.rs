//! Named rooms for the room-relay variant.
//!
//! A room exists only while it has members: the last exit deletes it. All
//! rooms share one lock; every mutation is atomic under it, and broadcast
//! copies the member list out before sending.
//!
//! An identity holds one seat per room. Joining under an identity that is
//! already seated replaces the prior connection and closes it, the same
//! policy the client registry applies.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::connection::{ClientConnection, Payload, SendOutcome};
use crate::errors::RoomError;
use crate::ids::{ClientId, RoomId};
use crate::message::RoomMessage;

/// Outcome of [`RoomManager::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new room was created with the caller as its only member.
    Created,
    /// The room already existed and was left untouched.
    AlreadyExists,
}

/// Outcome of [`RoomManager::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The caller was added to the member set.
    Joined,
    /// This connection was already a member; nothing changed.
    AlreadyMember,
    /// Another connection held the identity; it was evicted and closed.
    Replaced,
}

/// Outcome of [`RoomManager::exit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The member left; the room lives on with `remaining` members.
    Left {
        /// Members still in the room.
        remaining: usize,
    },
    /// The member left and the room, now empty, was deleted.
    RoomClosed,
    /// The identity was not a member.
    NotMember,
}

/// Per-member outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members whose queue accepted the message.
    pub delivered: Vec<ClientId>,
    /// Members whose queue was full.
    pub dropped: Vec<ClientId>,
    /// Members whose connection was broken; they have been removed and
    /// their exit announced.
    pub failed: Vec<ClientId>,
}

#[derive(Debug)]
struct Room {
    members: HashMap<ClientId, Arc<ClientConnection>>,
}

impl Room {
    fn with_member(client: Arc<ClientConnection>) -> Self {
        let mut members = HashMap::new();
        let _ = members.insert(client.identity().clone(), client);
        Self { members }
    }
}

/// Registry of rooms and their members.
#[derive(Debug, Default)]
pub struct RoomManager {
    rooms: RwLock<HashMap<RoomId, Room>>,
}

impl RoomManager {
    /// Create a manager with no rooms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `room_id` with `client` as its first member.
    ///
    /// Creating a room that already exists succeeds without touching it.
    pub fn create(&self, room_id: &RoomId, client: Arc<ClientConnection>) -> CreateOutcome {
        let mut rooms = self.rooms.write();
        if rooms.contains_key(room_id.as_str()) {
            debug!(room_id = %room_id, client_id = %client.identity(), "room already exists");
            return CreateOutcome::AlreadyExists;
        }
        info!(room_id = %room_id, client_id = %client.identity(), "room created");
        let _ = rooms.insert(room_id.clone(), Room::with_member(client));
        CreateOutcome::Created
    }

    /// Add `client` to an existing room.
    ///
    /// Re-joining with the same connection is a no-op. A different connection
    /// under the same identity takes over the seat and the prior one is
    /// closed; its session later finds itself no longer a member and leaves
    /// without announcing an exit.
    pub fn join(
        &self,
        room_id: &RoomId,
        client: Arc<ClientConnection>,
    ) -> Result<JoinOutcome, RoomError> {
        let identity = client.identity().clone();
        let prior = {
            let mut rooms = self.rooms.write();
            let room = rooms
                .get_mut(room_id.as_str())
                .ok_or_else(|| RoomError::RoomNotFound(room_id.clone()))?;

            if room
                .members
                .get(client.identity().as_str())
                .is_some_and(|m| m.connection_id() == client.connection_id())
            {
                debug!(room_id = %room_id, client_id = %client.identity(), "already a member");
                return Ok(JoinOutcome::AlreadyMember);
            }
            room.members.insert(identity.clone(), client)
        };

        match prior {
            Some(prior) => {
                info!(
                    room_id = %room_id,
                    client_id = %identity,
                    "identity rejoined room, closing prior connection"
                );
                prior.close();
                Ok(JoinOutcome::Replaced)
            }
            None => {
                debug!(room_id = %room_id, client_id = %identity, "client joined room");
                Ok(JoinOutcome::Joined)
            }
        }
    }

    /// Remove `client_id` from a room, deleting the room once it is empty.
    pub fn exit(&self, room_id: &RoomId, client_id: &ClientId) -> Result<ExitOutcome, RoomError> {
        let mut rooms = self.rooms.write();
        let room = rooms
            .get_mut(room_id.as_str())
            .ok_or_else(|| RoomError::RoomNotFound(room_id.clone()))?;

        if room.members.remove(client_id.as_str()).is_none() {
            return Ok(ExitOutcome::NotMember);
        }
        let remaining = room.members.len();
        if remaining == 0 {
            let _ = rooms.remove(room_id.as_str());
            info!(room_id = %room_id, client_id = %client_id, "last member left, room closed");
            return Ok(ExitOutcome::RoomClosed);
        }
        debug!(room_id = %room_id, client_id = %client_id, remaining, "client left room");
        Ok(ExitOutcome::Left { remaining })
    }

    /// Remove `connection` from a room only if it is the member on record.
    ///
    /// Another connection holding the same identity is left in place, and an
    /// absent room reports [`ExitOutcome::NotMember`].
    pub fn leave_connection(&self, room_id: &RoomId, connection: &ClientConnection) -> ExitOutcome {
        let mut rooms = self.rooms.write();
        let Some(room) = rooms.get_mut(room_id.as_str()) else {
            return ExitOutcome::NotMember;
        };
        let owns = room
            .members
            .get(connection.identity().as_str())
            .is_some_and(|m| m.connection_id() == connection.connection_id());
        if !owns {
            return ExitOutcome::NotMember;
        }
        let _ = room.members.remove(connection.identity().as_str());
        let remaining = room.members.len();
        if remaining == 0 {
            let _ = rooms.remove(room_id.as_str());
            info!(room_id = %room_id, client_id = %connection.identity(), "last member left, room closed");
            return ExitOutcome::RoomClosed;
        }
        debug!(room_id = %room_id, client_id = %connection.identity(), remaining, "client left room");
        ExitOutcome::Left { remaining }
    }

    /// Remove `connection` and tell the remaining members it left.
    ///
    /// The exit notice is broadcast only when this call removed the member,
    /// so a departure reported by both a failed send and the session's own
    /// close is announced once. The report is empty when nothing was sent.
    pub fn depart(
        &self,
        room_id: &RoomId,
        connection: &ClientConnection,
    ) -> (ExitOutcome, BroadcastReport) {
        let outcome = self.leave_connection(room_id, connection);
        if !matches!(outcome, ExitOutcome::Left { .. }) {
            return (outcome, BroadcastReport::default());
        }
        let notice = RoomMessage::left(connection.identity().clone());
        match self.broadcast(room_id, &notice) {
            Ok(report) => (outcome, report),
            Err(e) => {
                // The remaining members can depart before the notice goes out.
                debug!(room_id = %room_id, client_id = %connection.identity(), error = %e, "exit notice not sent");
                (outcome, BroadcastReport::default())
            }
        }
    }

    /// Send `message` to every current member, the sender included.
    ///
    /// Members are snapshotted under the lock and sent to after it is
    /// released. Broken members are removed from the room and their exit is
    /// announced to whoever remains.
    pub fn broadcast(
        &self,
        room_id: &RoomId,
        message: &RoomMessage,
    ) -> Result<BroadcastReport, RoomError> {
        let members: Vec<Arc<ClientConnection>> = {
            let rooms = self.rooms.read();
            let room = rooms
                .get(room_id.as_str())
                .ok_or_else(|| RoomError::RoomNotFound(room_id.clone()))?;
            room.members.values().cloned().collect()
        };
        let payload = Payload::from(serde_json::to_string(message)?);

        let mut report = BroadcastReport::default();
        let mut broken = Vec::new();
        for member in members {
            let identity = member.identity().clone();
            match member.send(payload.clone()) {
                SendOutcome::Sent => report.delivered.push(identity),
                SendOutcome::Dropped => {
                    warn!(room_id = %room_id, client_id = %identity, "member queue full, dropping message");
                    report.dropped.push(identity);
                }
                SendOutcome::Closed => {
                    warn!(room_id = %room_id, client_id = %identity, "member connection broken, removing");
                    report.failed.push(identity);
                    broken.push(member);
                }
            }
        }

        for member in broken {
            let _ = self.depart(room_id, &member);
        }

        debug!(
            room_id = %room_id,
            action = ?message.action,
            recipients = report.delivered.len(),
            "room broadcast"
        );
        Ok(report)
    }

    /// Whether `room_id` exists.
    pub fn has_room(&self, room_id: &str) -> bool {
        self.rooms.read().contains_key(room_id)
    }

    /// Sorted member identities, or `None` if the room does not exist.
    pub fn members(&self, room_id: &str) -> Option<Vec<ClientId>> {
        let rooms = self.rooms.read();
        let room = rooms.get(room_id)?;
        let mut ids: Vec<ClientId> = room.members.keys().cloned().collect();
        ids.sort();
        Some(ids)
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    /// Total members across all rooms.
    pub fn member_count(&self) -> usize {
        self.rooms.read().values().map(|r| r.members.len()).sum()
    }
}
