//! Events carried on the push channel (server -> client).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::messages::NormalizedMessage;

/// Event fanned out to every open push connection.
///
/// Serialized as `{"type": "NEW_MESSAGE", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum BroadcastEvent {
    /// A message received through a bot's webhook.
    NewMessage(NewMessagePayload),
    /// Any other update a producer wants clients to see.
    GenericUpdate(GenericUpdatePayload),
    /// Application-level liveness signal.
    Heartbeat(HeartbeatPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewMessagePayload {
    #[serde(rename = "tokenId")]
    pub token_id: String,
    pub message: NormalizedMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct GenericUpdatePayload {
    #[serde(rename = "tokenId", default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(default)]
    pub update: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct HeartbeatPayload {
    /// Unix milliseconds.
    #[ts(type = "number")]
    pub timestamp: i64,
}

impl BroadcastEvent {
    pub fn new_message(token_id: impl Into<String>, message: NormalizedMessage) -> Self {
        Self::NewMessage(NewMessagePayload {
            token_id: token_id.into(),
            message,
        })
    }

    pub fn generic(token_id: Option<String>, update: Value) -> Self {
        Self::GenericUpdate(GenericUpdatePayload { token_id, update })
    }

    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "NEW_MESSAGE",
            Self::GenericUpdate(_) => "GENERIC_UPDATE",
            Self::Heartbeat(_) => "HEARTBEAT",
        }
    }
}

const KNOWN_KINDS: [&str; 3] = ["NEW_MESSAGE", "GENERIC_UPDATE", "HEARTBEAT"];

#[derive(Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Decode one push-channel data frame.
///
/// Returns `Ok(None)` for event types this build does not know about, so newer
/// servers can add event types without breaking older clients.
pub fn decode_event(raw: &str) -> Result<Option<BroadcastEvent>, serde_json::Error> {
    let envelope: EventEnvelope = serde_json::from_str(raw)?;
    if !KNOWN_KINDS.contains(&envelope.kind.as_str()) {
        return Ok(None);
    }
    serde_json::from_str(raw).map(Some)
}
