//! WebSocket endpoints, per-connection session loop, and heartbeat.

pub mod handler;
pub mod heartbeat;
pub mod session;
