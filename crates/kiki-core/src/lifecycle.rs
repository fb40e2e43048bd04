//! Per-connection state machine binding transport events to the core.
//!
//! The transport feeds each connection's events through a [`Lifecycle`] in
//! the order it observes them. The lifecycle enforces `open < message* <
//! close`, and guarantees cleanup runs exactly once however the connection
//! ends, including when it is dropped before ever opening.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::connection::{ClientConnection, Payload};
use crate::errors::RelayError;
use crate::ids::{ClientId, RoomId};
use crate::message::{Envelope, RoomMessage};
use crate::rooms::{BroadcastReport, CreateOutcome, ExitOutcome, JoinOutcome, RoomManager};
use crate::router::{DeliveryReport, MessageRouter};

/// One event observed on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The upgrade completed.
    Open,
    /// A text payload arrived.
    Message(String),
    /// The connection ended, for any reason.
    Close,
}

/// Recipient counts produced by handling one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Recipients whose queue accepted the message.
    pub delivered: usize,
    /// Recipients whose queue was full.
    pub dropped: usize,
    /// Recipients found broken and removed.
    pub failed: usize,
}

impl From<&DeliveryReport> for Delivery {
    fn from(report: &DeliveryReport) -> Self {
        Self {
            delivered: report.delivered.len(),
            dropped: report.dropped.len(),
            failed: report.failed.len(),
        }
    }
}

impl From<&BroadcastReport> for Delivery {
    fn from(report: &BroadcastReport) -> Self {
        Self {
            delivered: report.delivered.len(),
            dropped: report.dropped.len(),
            failed: report.failed.len(),
        }
    }
}

/// Variant-specific reaction to connection events.
pub trait ConnectionHandler: Send {
    /// The connection is live.
    fn on_open(&mut self) -> Result<Delivery, RelayError>;

    /// A payload arrived on an open connection.
    fn on_message(&mut self, text: &str) -> Result<Delivery, RelayError>;

    /// The open connection ended. Must not fail.
    fn on_close(&mut self) -> Delivery;

    /// The connection ended before it opened.
    fn on_abort(&mut self) {
        let _ = self.on_close();
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Admitted, upgrade not yet complete.
    Pending,
    /// Live.
    Open,
    /// Cleaned up. Further events are ignored.
    Closed,
}

/// Ordering guard around a [`ConnectionHandler`].
pub struct Lifecycle<H: ConnectionHandler> {
    handler: H,
    state: SessionState,
}

impl<H: ConnectionHandler> Lifecycle<H> {
    /// Wrap an admitted handler.
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            state: SessionState::Pending,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The wrapped handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Handle the `Open` event. A repeated open is ignored.
    pub fn open(&mut self) -> Result<Delivery, RelayError> {
        if self.state != SessionState::Pending {
            warn!(state = ?self.state, "ignoring open on a session that is not pending");
            return Ok(Delivery::default());
        }
        self.state = SessionState::Open;
        self.handler.on_open()
    }

    /// Handle an inbound payload.
    pub fn message(&mut self, text: &str) -> Result<Delivery, RelayError> {
        if self.state != SessionState::Open {
            return Err(RelayError::SessionNotOpen);
        }
        self.handler.on_message(text)
    }

    /// Handle the `Close` event. Cleanup runs at most once.
    pub fn close(&mut self) -> Delivery {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Pending => {
                self.handler.on_abort();
                Delivery::default()
            }
            SessionState::Open => self.handler.on_close(),
            SessionState::Closed => Delivery::default(),
        }
    }

    /// Route one event to the matching transition.
    pub fn dispatch(&mut self, event: ConnectionEvent) -> Result<Delivery, RelayError> {
        match event {
            ConnectionEvent::Open => self.open(),
            ConnectionEvent::Message(text) => self.message(&text),
            ConnectionEvent::Close => Ok(self.close()),
        }
    }
}

impl<H: ConnectionHandler> Drop for Lifecycle<H> {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            let _ = self.close();
        }
    }
}

impl<H: ConnectionHandler + fmt::Debug> fmt::Debug for Lifecycle<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &self.state)
            .field("handler", &self.handler)
            .finish()
    }
}

// ─── Direct relay ───────────────────────────────────────────────────────────

/// Direct-relay connection: registered by identity, sends addressed envelopes.
#[derive(Debug)]
pub struct DirectSession {
    connection: Arc<ClientConnection>,
    router: MessageRouter,
}

impl DirectSession {
    /// Bind `connection` to `router`. Registration happens on open.
    pub fn new(connection: Arc<ClientConnection>, router: MessageRouter) -> Self {
        Self { connection, router }
    }

    /// The connection this session drives.
    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.connection
    }
}

impl ConnectionHandler for DirectSession {
    fn on_open(&mut self) -> Result<Delivery, RelayError> {
        let _ = self.router.registry().register(Arc::clone(&self.connection));
        info!(
            client_id = %self.connection.identity(),
            connection_id = self.connection.connection_id(),
            "client connected"
        );
        Ok(Delivery::default())
    }

    fn on_message(&mut self, text: &str) -> Result<Delivery, RelayError> {
        let envelope = Envelope::parse(text)?;
        if envelope.from != *self.connection.identity() {
            debug!(
                client_id = %self.connection.identity(),
                from = %envelope.from,
                "envelope sender differs from connection identity"
            );
        }
        let report = self.router.forward(&envelope, Payload::from(text));
        Ok(Delivery::from(&report))
    }

    fn on_close(&mut self) -> Delivery {
        let released = self.router.registry().release(&self.connection);
        info!(
            client_id = %self.connection.identity(),
            connection_id = self.connection.connection_id(),
            released,
            "client disconnected"
        );
        Delivery::default()
    }
}

// ─── Room relay ─────────────────────────────────────────────────────────────

/// Room admission requested at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomCommand {
    /// Open a new room.
    Create,
    /// Enter an existing room.
    Join,
}

impl RoomCommand {
    /// Parse the `command` connection parameter.
    pub fn parse(command: &str) -> Result<Self, RelayError> {
        match command {
            "create" => Ok(Self::Create),
            "join" => Ok(Self::Join),
            other => Err(RelayError::UnknownCommand(other.to_owned())),
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Join => "join",
        }
    }
}

/// Room-relay connection, admitted to exactly one room.
#[derive(Debug)]
pub struct RoomSession {
    rooms: Arc<RoomManager>,
    room_id: RoomId,
    connection: Arc<ClientConnection>,
}

impl RoomSession {
    /// Admit `connection` to `room_id` before the upgrade.
    ///
    /// Creating a room that already exists is refused, since the caller would
    /// gain no membership of its own. Joining under an identity the room
    /// already holds takes the seat over and closes the prior connection.
    pub fn establish(
        rooms: Arc<RoomManager>,
        command: RoomCommand,
        room_id: RoomId,
        connection: Arc<ClientConnection>,
    ) -> Result<Self, RelayError> {
        match command {
            RoomCommand::Create => {
                if rooms.create(&room_id, Arc::clone(&connection)) == CreateOutcome::AlreadyExists {
                    return Err(RelayError::RoomAlreadyExists(room_id));
                }
            }
            RoomCommand::Join => {
                if rooms.join(&room_id, Arc::clone(&connection))? == JoinOutcome::Replaced {
                    debug!(
                        room_id = %room_id,
                        client_id = %connection.identity(),
                        "took over seat from prior connection"
                    );
                }
            }
        }
        Ok(Self {
            rooms,
            room_id,
            connection,
        })
    }

    /// Room this session belongs to.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// The connection this session drives.
    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.connection
    }

    fn client_id(&self) -> ClientId {
        self.connection.identity().clone()
    }

}

impl ConnectionHandler for RoomSession {
    fn on_open(&mut self) -> Result<Delivery, RelayError> {
        let report = self
            .rooms
            .broadcast(&self.room_id, &RoomMessage::joined(self.client_id()))?;
        info!(
            room_id = %self.room_id,
            client_id = %self.connection.identity(),
            members = report.delivered.len(),
            "client joined room"
        );
        Ok(Delivery::from(&report))
    }

    fn on_message(&mut self, text: &str) -> Result<Delivery, RelayError> {
        let message = RoomMessage::event(self.client_id(), text);
        let report = self.rooms.broadcast(&self.room_id, &message)?;
        Ok(Delivery::from(&report))
    }

    fn on_close(&mut self) -> Delivery {
        let (outcome, report) = self.rooms.depart(&self.room_id, &self.connection);
        match outcome {
            ExitOutcome::Left { remaining } => info!(
                room_id = %self.room_id,
                client_id = %self.connection.identity(),
                remaining,
                "client left room"
            ),
            ExitOutcome::RoomClosed => info!(
                room_id = %self.room_id,
                client_id = %self.connection.identity(),
                "client left room, room closed"
            ),
            // Evicted by a broken send or a rejoin; already accounted for.
            ExitOutcome::NotMember => debug!(
                room_id = %self.room_id,
                client_id = %self.connection.identity(),
                "already exited"
            ),
        }
        Delivery::from(&report)
    }

    fn on_abort(&mut self) {
        let _ = self.rooms.leave_connection(&self.room_id, &self.connection);
    }
}
