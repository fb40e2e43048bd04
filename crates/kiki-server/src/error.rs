//! Server error types.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kiki_core::{RelayError, RoomError};
use thiserror::Error;

/// Errors that can occur when loading or parsing settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A settings value was invalid (e.g., out of range).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Errors from starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or serving failed.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Settings could not be loaded.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// The Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Why a connection was refused before the WebSocket upgrade.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Parameter or admission failure from the relay core.
    #[error(transparent)]
    Relay(#[from] RelayError),
    /// The request was not a valid WebSocket upgrade.
    #[error(transparent)]
    Upgrade(#[from] WebSocketUpgradeRejection),
    /// `max_connections` live connections already exist.
    #[error("too many connections")]
    TooManyConnections,
}

impl ConnectError {
    /// HTTP status returned to the refused client.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Relay(
                RelayError::MissingParameter(_)
                | RelayError::UnknownCommand(_)
                | RelayError::MalformedMessage(_),
            ) => StatusCode::BAD_REQUEST,
            Self::Relay(RelayError::Room(RoomError::RoomNotFound(_))) => StatusCode::NOT_FOUND,
            Self::Relay(RelayError::RoomAlreadyExists(_)) => StatusCode::CONFLICT,
            Self::Relay(
                RelayError::Room(RoomError::Serialize(_))
                | RelayError::Serialize(_)
                | RelayError::SessionNotOpen,
            ) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upgrade(rejection) => rejection.status(),
            Self::TooManyConnections => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ConnectError {
    fn into_response(self) -> Response {
        match self {
            Self::Upgrade(rejection) => rejection.into_response(),
            other => (other.status(), other.to_string()).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiki_core::RoomId;

    #[test]
    fn io_error_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SettingsError = io_err.into();
        assert!(matches!(err, SettingsError::Io(_)));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn json_error_display() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err: SettingsError = json_err.into();
        assert!(err.to_string().contains("parse settings JSON"));
    }

    #[test]
    fn missing_parameter_is_bad_request() {
        let err = ConnectError::from(RelayError::MissingParameter("room_id"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Param Not Found: room_id");
    }

    #[test]
    fn unknown_command_is_bad_request() {
        let err = ConnectError::from(RelayError::UnknownCommand("drop".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn room_not_found_is_not_found() {
        let err = ConnectError::from(RelayError::from(RoomError::RoomNotFound(RoomId::from("r"))));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn existing_room_is_conflict() {
        let exists = ConnectError::from(RelayError::RoomAlreadyExists(RoomId::from("r")));
        assert_eq!(exists.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn too_many_connections_is_unavailable() {
        let response = ConnectError::TooManyConnections.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
