use crate::error::WebrtcError;
use crate::media::{LocalTrack, RemoteTrack};
use async_trait::async_trait;
use duet_protocol::{IceCandidate, ParticipantId, SessionDescription};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

pub type PeerConnectionState = RTCPeerConnectionState;

/// Event raised by a [`PeerTransport`], in the order the transport produced them.
#[derive(Clone)]
pub enum TransportEvent {
    ConnectionState(PeerConnectionState),
    /// A locally gathered candidate that must be trickled to the remote participant.
    IceCandidate(IceCandidate),
    /// A media track arrived from the remote participant.
    Track(Arc<dyn RemoteTrack>),
}

impl Debug for TransportEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportEvent::ConnectionState(state) => {
                f.debug_tuple("ConnectionState").field(state).finish()
            }
            TransportEvent::IceCandidate(candidate) => {
                f.debug_tuple("IceCandidate").field(candidate).finish()
            }
            TransportEvent::Track(track) => f
                .debug_struct("Track")
                .field("id", &track.id())
                .field("kind", &track.kind())
                .finish(),
        }
    }
}

/// The connection object underneath a peer session.
///
/// `create_offer` and `create_answer` generate a description *and* apply it as the
/// local description before returning it.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), WebrtcError>;
    async fn create_offer(&self) -> Result<SessionDescription, WebrtcError>;
    async fn create_answer(&self) -> Result<SessionDescription, WebrtcError>;
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), WebrtcError>;
    async fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> Result<(), WebrtcError>;
    async fn close(&self) -> Result<(), WebrtcError>;
}

/// Allocates one [`PeerTransport`] per remote participant.
#[async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: PeerTransport;

    async fn create(
        &self,
        remote: &ParticipantId,
    ) -> Result<(Self::Transport, mpsc::UnboundedReceiver<TransportEvent>), WebrtcError>;
}
