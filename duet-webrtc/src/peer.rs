use crate::config::{IceConfig, IntoRtc};
use crate::error::WebrtcError;
use crate::media::{LocalTrack, RemoteTrack};
use crate::transport::{PeerTransport, TransportEvent, TransportFactory};
use anyhow::Context;
use async_trait::async_trait;
use duet_protocol::{IceCandidate, ParticipantId, SdpType, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::instrument;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// Builds [`RtcPeer`]s sharing one media engine and interceptor registry.
pub struct RtcTransportFactory {
    api: API,
    config: IceConfig,
}

impl RtcTransportFactory {
    #[instrument(level = "debug", err)]
    pub fn new(config: IceConfig) -> Result<Self, WebrtcError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .context("Failed to register default codecs")?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .context("Failed to register default interceptors")?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, config })
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    type Transport = RtcPeer;

    #[instrument(level = "debug", skip(self), err)]
    async fn create(
        &self,
        remote: &ParticipantId,
    ) -> Result<(Self::Transport, mpsc::UnboundedReceiver<TransportEvent>), WebrtcError> {
        let peer_connection = self
            .api
            .new_peer_connection(self.config.clone().into_rtc())
            .await
            .context("Failed to create peer connection")?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        {
            let events_tx = events_tx.clone();
            peer_connection.on_peer_connection_state_change(Box::new(
                move |state: RTCPeerConnectionState| {
                    tracing::trace!(?state, "Peer connection state changed");
                    if events_tx.send(TransportEvent::ConnectionState(state)).is_err() {
                        tracing::trace!("Transport events receiver gone, dropping state change");
                    }
                    Box::pin(async {})
                },
            ));
        }

        {
            let events_tx = events_tx.clone();
            peer_connection.on_ice_candidate(Box::new(
                move |candidate: Option<RTCIceCandidate>| {
                    tracing::trace!(?candidate, "Local ICE candidate gathered");
                    if let Some(candidate) = candidate {
                        match candidate.to_json() {
                            Ok(init) => {
                                if events_tx
                                    .send(TransportEvent::IceCandidate(from_rtc_candidate(init)))
                                    .is_err()
                                {
                                    tracing::trace!(
                                        "Transport events receiver gone, dropping ICE candidate"
                                    );
                                }
                            }
                            Err(err) => {
                                tracing::warn!(?err, "Failed to serialize ICE candidate");
                            }
                        }
                    }
                    Box::pin(async {})
                },
            ));
        }

        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                tracing::trace!(id = %track.id(), "Remote track received");
                if events_tx
                    .send(TransportEvent::Track(track as Arc<dyn RemoteTrack>))
                    .is_err()
                {
                    tracing::trace!("Transport events receiver gone, dropping remote track");
                }
                Box::pin(async {})
            },
        ));

        Ok((RtcPeer { peer_connection }, events_rx))
    }
}

/// [`PeerTransport`] backed by a [`RTCPeerConnection`].
pub struct RtcPeer {
    peer_connection: RTCPeerConnection,
}

impl RtcPeer {
    async fn local_description(&self) -> Result<SessionDescription, WebrtcError> {
        let local_description = self
            .peer_connection
            .local_description()
            .await
            .context("Failed to get local description")?;
        from_rtc_description(local_description)
    }
}

#[async_trait]
impl PeerTransport for RtcPeer {
    #[instrument(level = "trace", skip(self), err)]
    async fn add_track(&self, track: &LocalTrack) -> Result<(), WebrtcError> {
        self.peer_connection
            .add_track(track.inner())
            .await
            .context("Failed to add track to peer connection")?;
        Ok(())
    }

    #[instrument(level = "trace", skip(self), err)]
    async fn create_offer(&self) -> Result<SessionDescription, WebrtcError> {
        tracing::trace!("Creating SDP offer");

        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .context("Failed to create offer")?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .context("Failed to set offer as local description")?;

        let offer = self.local_description().await?;
        tracing::trace!("Created SDP offer");
        Ok(offer)
    }

    #[instrument(level = "trace", skip(self), err)]
    async fn create_answer(&self) -> Result<SessionDescription, WebrtcError> {
        tracing::trace!("Creating SDP answer");

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .context("Failed to create answer")?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .context("Failed to set answer as local description")?;

        let answer = self.local_description().await?;
        tracing::trace!("Created SDP answer");
        Ok(answer)
    }

    #[instrument(level = "trace", skip(self, description), fields(kind = ?description.kind), err)]
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), WebrtcError> {
        let description = into_rtc_description(description)?;
        self.peer_connection
            .set_remote_description(description)
            .await
            .context("Failed to set remote description")?;

        tracing::trace!("Applied remote description");
        Ok(())
    }

    #[instrument(level = "trace", skip(self, candidate), err)]
    async fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> Result<(), WebrtcError> {
        self.peer_connection
            .add_ice_candidate(into_rtc_candidate(candidate))
            .await
            .context("Failed to add remote ICE candidate")?;

        tracing::trace!("Added remote ICE candidate");
        Ok(())
    }

    #[instrument(level = "debug", skip(self), err)]
    async fn close(&self) -> Result<(), WebrtcError> {
        tracing::trace!("Closing peer connection");
        self.peer_connection
            .close()
            .await
            .context("Failed to close peer connection")?;
        Ok(())
    }
}

fn into_rtc_description(
    description: SessionDescription,
) -> Result<RTCSessionDescription, WebrtcError> {
    let result = match description.kind {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpType::Rollback => return Err(WebrtcError::UnsupportedDescription(SdpType::Rollback)),
    };
    Ok(result.context("Failed to parse SDP")?)
}

fn from_rtc_description(
    description: RTCSessionDescription,
) -> Result<SessionDescription, WebrtcError> {
    let value = serde_json::to_value(&description).context("Failed to serialize description")?;
    Ok(serde_json::from_value(value).context("Failed to convert description")?)
}

fn into_rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_m_line_index,
        username_fragment: candidate.username_fragment,
    }
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}
