use crate::event::FailureReason;
use duet_protocol::{EnvelopeKind, ParticipantId};
use duet_signaling::error::SignalingError;
use duet_webrtc::error::WebrtcError;
use thiserror::Error;

/// Failures scoped to a single peer session. None of them affect other sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Sending a signal failed. Transient, the transition may be retried.
    #[error("delivery failed: {0}")]
    Delivery(#[from] SignalingError),
    /// Local tracks could not be attached to the transport. Fatal to the session.
    #[error("failed to attach local media: {0}")]
    MediaBind(#[source] WebrtcError),
    /// The transport reached a terminal failed state. Fatal to the session.
    #[error("transport failed")]
    TransportFailure,
    /// A message for a session that is absent or past the point where it applies.
    #[error("stale {kind} from {participant}")]
    Stale {
        participant: ParticipantId,
        kind: EnvelopeKind,
    },
    /// The session was torn down while the operation was in flight.
    #[error("session torn down")]
    Cancelled,
    #[error(transparent)]
    Webrtc(#[from] WebrtcError),
}

impl SessionError {
    /// The reason reported to collaborators when this error ends a session.
    ///
    /// `None` for outcomes that are not failures of the session itself.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            SessionError::MediaBind(err) => Some(FailureReason::MediaBind(err.to_string())),
            SessionError::TransportFailure => Some(FailureReason::TransportFailed),
            SessionError::Webrtc(err) => Some(FailureReason::Negotiation(err.to_string())),
            SessionError::Delivery(_) | SessionError::Stale { .. } | SessionError::Cancelled => {
                None
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum RoomError {
    /// No local media at all: no session could ever proceed.
    #[error("no local media to publish")]
    NoLocalMedia,
    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),
    #[error("room is shut down")]
    Closed,
    #[error(transparent)]
    Signaling(#[from] SignalingError),
}
