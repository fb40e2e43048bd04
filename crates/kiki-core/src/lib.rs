//! # kiki-core
//!
//! Connection registry, message routing, and room lifecycle for the kiki
//! relay. Nothing in this crate touches a socket: the transport feeds
//! connection events in and drains each connection's outbound queue.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | Per-connection handle: shared payloads, outbound queue, close signal, liveness |
//! | `registry` | Live clients keyed by identity (direct-relay variant) |
//! | `router` | Resolves envelope recipients and delivers shared payloads |
//! | `rooms` | Named groups with create/join/exit and broadcast |
//! | `lifecycle` | Per-connection open/message/close state machine |
//! | `message` | Wire formats (`Envelope`, `RoomMessage`) |
//!
//! ## Dependency order
//!
//! `registry` → `router` → `rooms` → `lifecycle`.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod ids;
pub mod lifecycle;
pub mod message;
pub mod registry;
pub mod rooms;
pub mod router;

pub use connection::{ClientConnection, Payload, SendOutcome};
pub use errors::{RelayError, Result, RoomError};
pub use ids::{ClientId, RoomId};
pub use lifecycle::{
    ConnectionEvent, ConnectionHandler, Delivery, DirectSession, Lifecycle, RoomCommand,
    RoomSession, SessionState,
};
pub use message::{Envelope, RoomAction, RoomMessage};
pub use registry::ClientRegistry;
pub use rooms::{BroadcastReport, CreateOutcome, ExitOutcome, JoinOutcome, RoomManager};
pub use router::{DeliveryReport, MessageRouter};
