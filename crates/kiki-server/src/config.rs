//! Server configuration.

use std::fmt::Display;
use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Accepted `max_connections` values.
pub const MAX_CONNECTIONS_RANGE: RangeInclusive<usize> = 1..=1_000_000;
/// Accepted `send_queue_capacity` values.
pub const SEND_QUEUE_RANGE: RangeInclusive<usize> = 1..=65_536;
/// Accepted `heartbeat_interval_secs` values.
pub const HEARTBEAT_INTERVAL_RANGE: RangeInclusive<u64> = 1..=3600;
/// Accepted `heartbeat_timeout_secs` values.
pub const HEARTBEAT_TIMEOUT_RANGE: RangeInclusive<u64> = 1..=86_400;
/// Accepted `max_message_size` values (1 KiB to 256 MiB).
pub const MAX_MESSAGE_SIZE_RANGE: RangeInclusive<usize> = 1024..=256 * 1024 * 1024;

/// Configuration for the relay server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `8080`, `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Outbound queue depth per connection before messages are dropped.
    pub send_queue_capacity: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a connection whose peer has been silent this long, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Heartbeat interval as a [`Duration`], never zero.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Heartbeat timeout as a [`Duration`], never shorter than the interval.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs).max(self.heartbeat_interval())
    }

    /// Check every bounded field against its accepted range.
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_range("max_connections", self.max_connections, &MAX_CONNECTIONS_RANGE)?;
        check_range("send_queue_capacity", self.send_queue_capacity, &SEND_QUEUE_RANGE)?;
        check_range(
            "heartbeat_interval_secs",
            self.heartbeat_interval_secs,
            &HEARTBEAT_INTERVAL_RANGE,
        )?;
        check_range(
            "heartbeat_timeout_secs",
            self.heartbeat_timeout_secs,
            &HEARTBEAT_TIMEOUT_RANGE,
        )?;
        check_range("max_message_size", self.max_message_size, &MAX_MESSAGE_SIZE_RANGE)
    }
}

fn check_range<T>(key: &str, value: T, range: &RangeInclusive<T>) -> Result<(), SettingsError>
where
    T: PartialOrd + Display,
{
    if range.contains(&value) {
        return Ok(());
    }
    Err(SettingsError::InvalidValue(format!(
        "server.{key} = {value} is outside {}..={}",
        range.start(),
        range.end()
    )))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            max_connections: 1024,
            send_queue_capacity: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 1024 * 1024, // 1 MiB
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.max_connections, 1024);
        assert_eq!(cfg.send_queue_capacity, 256);
        assert_eq!(cfg.heartbeat_interval_secs, 30);
        assert_eq!(cfg.heartbeat_timeout_secs, 90);
        assert_eq!(cfg.max_message_size, 1024 * 1024);
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let cfg = ServerConfig {
            host: "0.0.0.0".into(),
            port: 9000,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn heartbeat_durations_are_clamped() {
        let cfg = ServerConfig {
            heartbeat_interval_secs: 0,
            heartbeat_timeout_secs: 0,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn defaults_are_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_fields_are_rejected() {
        let cases = [
            ServerConfig { max_connections: 0, ..ServerConfig::default() },
            ServerConfig { max_connections: usize::MAX, ..ServerConfig::default() },
            ServerConfig { send_queue_capacity: 0, ..ServerConfig::default() },
            ServerConfig { heartbeat_interval_secs: 0, ..ServerConfig::default() },
            ServerConfig { heartbeat_timeout_secs: 100_000, ..ServerConfig::default() },
            ServerConfig { max_message_size: 10, ..ServerConfig::default() },
        ];
        for cfg in cases {
            assert!(
                matches!(cfg.validate(), Err(SettingsError::InvalidValue(_))),
                "{cfg:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejection_names_the_field() {
        let cfg = ServerConfig {
            max_connections: 0,
            ..ServerConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid settings value: server.max_connections = 0 is outside 1..=1000000"
        );
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn deserialize_from_json_string() {
        let json = r#"{"host":"10.0.0.1","port":3000,"max_connections":5,"send_queue_capacity":8,"heartbeat_interval_secs":10,"heartbeat_timeout_secs":30,"max_message_size":512}"#;
        let cfg: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.host, "10.0.0.1");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.max_connections, 5);
        assert_eq!(cfg.send_queue_capacity, 8);
    }
}
