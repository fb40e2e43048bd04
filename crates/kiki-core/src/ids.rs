//! Caller-supplied identifiers for clients and rooms.
//!
//! Both are opaque strings: the server never generates or verifies them.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity a client supplies when it connects.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wrap a raw identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identity.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Name of a room in the room-relay variant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap a raw room name.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw room name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for RoomId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn client_id_display_is_raw_string() {
        let id = ClientId::new("alice");
        assert_eq!(id.to_string(), "alice");
        assert_eq!(id.as_str(), "alice");
    }

    #[test]
    fn client_id_serializes_transparently() {
        let id = ClientId::from("bob");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""bob""#);
        let back: ClientId = serde_json::from_str(r#""bob""#).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn map_lookup_by_str() {
        let mut map = HashMap::new();
        let _ = map.insert(ClientId::from("carol"), 1);
        assert_eq!(map.get("carol"), Some(&1));
        assert_eq!(map.get("dave"), None);
    }

    #[test]
    fn room_id_from_string() {
        let id = RoomId::from(String::from("r1"));
        assert_eq!(id.as_str(), "r1");
        assert_eq!(format!("{id}"), "r1");
    }

    #[test]
    fn ids_order_lexicographically() {
        let mut ids = vec![ClientId::from("b"), ClientId::from("a"), ClientId::from("c")];
        ids.sort();
        assert_eq!(ids, vec![ClientId::from("a"), ClientId::from("b"), ClientId::from("c")]);
    }
}
