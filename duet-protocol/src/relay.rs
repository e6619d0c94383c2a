//! Framing spoken with the room relay that carries signaling between participants.
//!
//! The relay addresses messages itself, so a [`SignalEnvelope`](crate::SignalEnvelope)
//! travels as an opaque JSON `payload` inside these frames.

use crate::ParticipantId;
use serde::{Deserialize, Serialize};

/// Frame sent from a participant to the relay.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Unicast `payload` to participant `to`.
    Send { to: ParticipantId, payload: String },
}

/// Frame sent from the relay to a participant.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RelayFrame {
    /// A message unicast to this participant by `from`.
    Message { from: ParticipantId, payload: String },
    /// A participant joined the room.
    MemberJoined { id: ParticipantId },
    /// A participant left the room.
    MemberLeft { id: ParticipantId },
}

impl ClientFrame {
    pub fn serialize(frame: &Self) -> serde_json::error::Result<String> {
        serde_json::to_string(frame)
    }
}

impl RelayFrame {
    pub fn serialize(frame: &Self) -> serde_json::error::Result<String> {
        serde_json::to_string(frame)
    }

    pub fn deserialize(frame: &str) -> serde_json::error::Result<Self> {
        serde_json::from_str(frame)
    }
}
