//! Wire protocol shared by the hub and its clients.
//!
//! Every frame is a JSON text frame of the form
//! `{"event": "<name>", "data": <payload>}`.
//!
//! - Client -> hub: `send-location`, `disconnect`.
//! - Hub -> client: `welcome`, `receive-location`, `user-disconnect`.
//!
//! Location payloads are opaque beyond `latitude`/`longitude`: any extra
//! fields a sender includes are carried through. They are carried by value,
//! not byte for byte. Coordinates are re-encoded as `f64`, so `10` goes out as
//! `10.0`, and extra fields go through `serde_json::Value`, so integers outside
//! the `i64`/`u64` range come back as rounded floats.

use std::{fmt, str::FromStr};

use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Key under which the sender id travels inside a `receive-location` payload.
pub const SENDER_ID_FIELD: &str = "id";

/// Identifies a connected session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new_unique() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SessionId)
    }
}

/// One position report from a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationUpdate {
    /// Degrees, not validated.
    pub latitude: f64,
    /// Degrees, not validated.
    pub longitude: f64,
    /// Any other fields the sender attached (accuracy, heading, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LocationUpdate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            extra: Map::new(),
        }
    }

    /// Attaches an extra pass-through field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A location update tagged with its sender, as fanned out to peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastEnvelope {
    pub id: SessionId,
    #[serde(flatten)]
    pub location: LocationUpdate,
}

impl BroadcastEnvelope {
    /// Tags `location` with `sender`. A sender-supplied `id` field is discarded
    /// so the envelope always names the real sender.
    pub fn new(sender: SessionId, mut location: LocationUpdate) -> Self {
        location.extra.remove(SENDER_ID_FIELD);
        Self {
            id: sender,
            location,
        }
    }
}

/// Frames a client sends to the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    SendLocation(LocationUpdate),
    /// Explicit request to end the session.
    Disconnect,
}

/// Frames the hub sends to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// First frame on every connection: the id the hub assigned.
    Welcome { id: SessionId },
    ReceiveLocation(BroadcastEnvelope),
    UserDisconnect(SessionId),
}

/// Serializes a frame to JSON text.
pub fn encode_frame<T: Serialize>(msg: &T) -> anyhow::Result<String> {
    serde_json::to_string(msg).context("serialize frame")
}

/// Parses a JSON text frame.
pub fn decode_frame<T: DeserializeOwned>(text: &str) -> anyhow::Result<T> {
    serde_json::from_str(text).context("deserialize frame")
}
