//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use kiki_core::{ClientRegistry, MessageRouter, RoomManager};
use metrics::gauge;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::{ConnectError, ServerError};
use crate::health::{self, HealthResponse};
use crate::metrics::ROOMS_ACTIVE;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handler::{direct_handler, rooms_handler};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Direct-relay clients.
    pub registry: Arc<ClientRegistry>,
    /// Envelope router over `registry`.
    pub router: MessageRouter,
    /// Room-relay rooms.
    pub rooms: Arc<RoomManager>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// One permit per live WebSocket connection.
    pub permits: Arc<Semaphore>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Reserve a connection slot.
    pub fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, ConnectError> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| ConnectError::TooManyConnections)
    }

    /// Live WebSocket connections.
    pub fn connection_count(&self) -> usize {
        self.config
            .max_connections
            .saturating_sub(self.permits.available_permits())
    }

    /// Publish the room count gauge.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_rooms(&self) {
        gauge!(ROOMS_ACTIVE).set(self.rooms.room_count() as f64);
    }
}

/// The relay server.
pub struct RelayServer {
    state: AppState,
}

impl RelayServer {
    /// Create a server with empty registry and rooms.
    ///
    /// `max_connections` is clamped to what the connection semaphore can
    /// hold; loaded settings are range-checked before they get here.
    pub fn new(mut config: ServerConfig) -> Self {
        config.max_connections = config.max_connections.clamp(1, Semaphore::MAX_PERMITS);
        let registry = Arc::new(ClientRegistry::new());
        let state = AppState {
            permits: Arc::new(Semaphore::new(config.max_connections)),
            config: Arc::new(config),
            router: MessageRouter::new(Arc::clone(&registry)),
            registry,
            rooms: Arc::new(RoomManager::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        };
        Self { state }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/kiki", get(direct_handler))
            .route("/rooms", get(rooms_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .fallback(not_found_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the server task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let listener = tokio::net::TcpListener::bind(self.state.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.state.shutdown.token();

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server terminated with error");
            }
        });

        info!(%addr, "relay server listening");
        Ok((addr, handle))
    }

    /// Shared state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Direct-relay registry.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.state.registry
    }

    /// Room manager.
    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.state.rooms
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET /
async fn root_handler() -> &'static str {
    "Res: OK"
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.connection_count(),
        state.registry.len(),
        state.rooms.room_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

async fn not_found_handler() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Route Not Found 404")
}
