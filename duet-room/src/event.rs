use crate::binder::RemoteStream;
use duet_protocol::{EnvelopeKind, ParticipantId};
use duet_webrtc::TrackKind;

/// Why a session was torn down on its own accord.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    MediaBind(String),
    TransportFailed,
    Negotiation(String),
}

/// Notifications for the membership and rendering collaborators.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// The transport to `participant` connected.
    SessionConnected { participant: ParticipantId },
    /// The session failed and was torn down. Not retried automatically.
    SessionFailed {
        participant: ParticipantId,
        reason: FailureReason,
    },
    /// The session was torn down, for whatever reason.
    SessionClosed { participant: ParticipantId },
    /// A signal could not be delivered. The session stays up.
    DeliveryFailed {
        participant: ParticipantId,
        kind: EnvelopeKind,
        reason: String,
    },
    /// A playable remote stream exists for `participant`; tracks are added to it as they arrive.
    RemoteStreamAdded {
        participant: ParticipantId,
        stream: RemoteStream,
    },
    RemoteTrackAdded {
        participant: ParticipantId,
        track_id: String,
        kind: Option<TrackKind>,
    },
    RemoteStreamRemoved { participant: ParticipantId },
    /// The inbound signaling channel stopped; no further negotiation will happen.
    SignalingClosed { reason: Option<String> },
}

impl RoomEvent {
    pub fn participant(&self) -> Option<&ParticipantId> {
        match self {
            RoomEvent::SessionConnected { participant }
            | RoomEvent::SessionFailed { participant, .. }
            | RoomEvent::SessionClosed { participant }
            | RoomEvent::DeliveryFailed { participant, .. }
            | RoomEvent::RemoteStreamAdded { participant, .. }
            | RoomEvent::RemoteTrackAdded { participant, .. }
            | RoomEvent::RemoteStreamRemoved { participant } => Some(participant),
            RoomEvent::SignalingClosed { .. } => None,
        }
    }
}
