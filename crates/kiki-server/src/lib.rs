//! # kiki-server
//!
//! Axum HTTP + `WebSocket` transport for the kiki relay.
//!
//! - `GET /kiki?id=` direct-relay and `GET /rooms?command=&room_id=&client_id=`
//!   room-relay WebSocket endpoints, validated before upgrade
//! - Per-connection session loop with heartbeat, feeding `kiki-core` lifecycles
//! - `/health` and Prometheus `/metrics`
//! - Settings loading (file deep-merge + `KIKI_*` env overrides)
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod settings;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use error::{ConnectError, ServerError, SettingsError};
pub use server::{AppState, RelayServer};
pub use settings::{Settings, load_settings, load_settings_from_path};
