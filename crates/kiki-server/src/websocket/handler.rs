//! WebSocket connect endpoints.
//!
//! Every check that can refuse a connection runs before the upgrade, so a
//! refused client gets a plain HTTP status instead of a socket that closes
//! immediately. Room admission is the last check: once it succeeds, the
//! membership is owned by a [`Lifecycle`] that rolls it back if the upgrade
//! never completes.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use kiki_core::{
    ClientConnection, ClientId, ConnectionHandler, DirectSession, Lifecycle, RelayError,
    RoomCommand, RoomId, RoomSession,
};
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, warn};

use super::session::{Session, run_session};
use crate::error::ConnectError;
use crate::metrics::WS_REJECTIONS_TOTAL;
use crate::server::AppState;

/// Query parameters of `GET /kiki`.
#[derive(Debug, Default, Deserialize)]
pub struct DirectParams {
    /// Identity of the connecting client.
    pub id: Option<String>,
}

/// Query parameters of `GET /rooms`.
#[derive(Debug, Default, Deserialize)]
pub struct RoomParams {
    /// `create` or `join`.
    pub command: Option<String>,
    /// Room to create or join.
    pub room_id: Option<String>,
    /// Identity of the connecting client.
    pub client_id: Option<String>,
}

/// GET /kiki: direct-relay WebSocket.
pub async fn direct_handler(
    State(state): State<AppState>,
    Query(params): Query<DirectParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    respond(connect_direct(state, params, ws))
}

/// GET /rooms: room-relay WebSocket.
pub async fn rooms_handler(
    State(state): State<AppState>,
    Query(params): Query<RoomParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    respond(connect_room(state, params, ws))
}

fn connect_direct(
    state: AppState,
    params: DirectParams,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ConnectError> {
    let id = required(params.id, "id")?;
    let ws = ws?;
    let permit = state.acquire_permit()?;

    let (connection, outbound) =
        ClientConnection::channel(ClientId::new(id), state.config.send_queue_capacity);
    let lifecycle = Lifecycle::new(DirectSession::new(
        Arc::clone(&connection),
        state.router.clone(),
    ));

    Ok(upgrade(
        ws,
        state,
        Session {
            lifecycle,
            connection,
            outbound,
            variant: "direct",
            permit,
        },
    ))
}

fn connect_room(
    state: AppState,
    params: RoomParams,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ConnectError> {
    let command = required(params.command, "command")?;
    let room_id = required(params.room_id, "room_id")?;
    let client_id = required(params.client_id, "client_id")?;
    let command = RoomCommand::parse(&command)?;
    let ws = ws?;
    let permit = state.acquire_permit()?;

    let (connection, outbound) =
        ClientConnection::channel(ClientId::new(client_id), state.config.send_queue_capacity);
    let session = RoomSession::establish(
        Arc::clone(&state.rooms),
        command,
        RoomId::new(room_id),
        Arc::clone(&connection),
    )?;
    debug!(
        command = command.as_str(),
        room_id = %session.room_id(),
        client_id = %connection.identity(),
        "room admission granted"
    );
    state.record_rooms();

    Ok(upgrade(
        ws,
        state,
        Session {
            lifecycle: Lifecycle::new(session),
            connection,
            outbound,
            variant: "room",
            permit,
        },
    ))
}

fn upgrade<H>(ws: WebSocketUpgrade, state: AppState, session: Session<H>) -> Response
where
    H: ConnectionHandler + 'static,
{
    let client_id = session.connection.identity().clone();
    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(move |error| {
            warn!(%client_id, %error, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| run_session(socket, session, state))
}

fn required(value: Option<String>, name: &'static str) -> Result<String, RelayError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(RelayError::MissingParameter(name))
}

fn respond(result: Result<Response, ConnectError>) -> Response {
    result.unwrap_or_else(|error| {
        let status = error.status();
        debug!(status = status.as_u16(), %error, "connection refused");
        counter!(WS_REJECTIONS_TOTAL, "status" => status.as_str().to_owned()).increment(1);
        error.into_response()
    })
}
