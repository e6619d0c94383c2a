use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Kind of a session description, mirroring the JSEP `type` field.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// A session description as exchanged between peers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// An ICE candidate in its browser-compatible JSON shape.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

/// A negotiation message unicast from one participant to exactly one other.
///
/// The sender is not part of the payload, it is supplied by the addressing of
/// the message transport.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalEnvelope {
    /// The caller's session description, sent once a local offer has been applied.
    Offer { offer: SessionDescription },
    /// The callee's reply to an [`SignalEnvelope::Offer`].
    Answer { answer: SessionDescription },
    /// A trickled ICE candidate. May arrive before, between or after the descriptions.
    Candidate { candidate: IceCandidate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Offer,
    Answer,
    Candidate,
}

impl Display for EnvelopeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeKind::Offer => f.write_str("offer"),
            EnvelopeKind::Answer => f.write_str("answer"),
            EnvelopeKind::Candidate => f.write_str("candidate"),
        }
    }
}

impl SignalEnvelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            SignalEnvelope::Offer { .. } => EnvelopeKind::Offer,
            SignalEnvelope::Answer { .. } => EnvelopeKind::Answer,
            SignalEnvelope::Candidate { .. } => EnvelopeKind::Candidate,
        }
    }

    /// Serializes a [`SignalEnvelope`] into a JSON string.
    pub fn serialize(envelope: &Self) -> serde_json::error::Result<String> {
        serde_json::to_string(envelope)
    }

    /// Deserializes a JSON string into a [`SignalEnvelope`].
    pub fn deserialize(envelope: &str) -> serde_json::error::Result<Self> {
        serde_json::from_str(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn offer_wire_shape() {
        let envelope = SignalEnvelope::Offer {
            offer: SessionDescription::offer("v=0"),
        };

        let serialized = SignalEnvelope::serialize(&envelope).unwrap();
        assert_eq!(
            serialized,
            "{\"type\":\"offer\",\"offer\":{\"type\":\"offer\",\"sdp\":\"v=0\"}}"
        );
    }

    #[test]
    fn answer_wire_shape() {
        let envelope = SignalEnvelope::Answer {
            answer: SessionDescription::answer("v=0"),
        };

        let serialized = SignalEnvelope::serialize(&envelope).unwrap();
        assert_eq!(
            serialized,
            "{\"type\":\"answer\",\"answer\":{\"type\":\"answer\",\"sdp\":\"v=0\"}}"
        );
        assert_eq!(SignalEnvelope::deserialize(&serialized).unwrap(), envelope);
    }

    #[test]
    fn deserialize_browser_candidate() {
        let raw = r#"{"type":"candidate","candidate":{"candidate":"candidate:1 1 udp 2122260223 192.168.1.2 50000 typ host","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"abcd"}}"#;

        let envelope = SignalEnvelope::deserialize(raw).unwrap();
        assert_eq!(envelope.kind(), EnvelopeKind::Candidate);
        match envelope {
            SignalEnvelope::Candidate { candidate } => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_m_line_index, Some(0));
                assert_eq!(candidate.username_fragment.as_deref(), Some("abcd"));
            }
            _ => panic!("Expected Candidate envelope"),
        }
    }

    #[test]
    fn deserialize_candidate_without_optional_fields() {
        let raw = r#"{"type":"candidate","candidate":{"candidate":"candidate:1"}}"#;
        assert_eq!(
            SignalEnvelope::deserialize(raw).unwrap(),
            SignalEnvelope::Candidate {
                candidate: IceCandidate::new("candidate:1")
            }
        );
    }

    #[test]
    fn deserialize_unknown_type_fails() {
        assert!(SignalEnvelope::deserialize(r#"{"type":"bye"}"#).is_err());
    }
}
