use crate::error::SessionError;
use crate::event::RoomEvent;
use crate::session::PeerSession;
use duet_protocol::ParticipantId;
use duet_webrtc::{LocalMedia, PeerTransport, RemoteTrack, TrackKind};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::instrument;

/// The remote participant's media as seen by the rendering collaborator.
///
/// Tracks accumulate in arrival order; a track id seen twice is kept once.
#[derive(Clone)]
pub struct RemoteStream {
    participant: ParticipantId,
    tracks: Arc<RwLock<Vec<Arc<dyn RemoteTrack>>>>,
    changed_tx: Arc<watch::Sender<usize>>,
}

impl RemoteStream {
    fn new(participant: ParticipantId) -> Self {
        Self {
            participant,
            tracks: Arc::new(RwLock::new(Vec::new())),
            changed_tx: Arc::new(watch::channel(0).0),
        }
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn tracks(&self) -> Vec<Arc<dyn RemoteTrack>> {
        self.tracks.read().clone()
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.read().iter().map(|track| track.id()).collect()
    }

    pub fn tracks_of(&self, kind: TrackKind) -> Vec<Arc<dyn RemoteTrack>> {
        self.tracks
            .read()
            .iter()
            .filter(|track| track.kind() == Some(kind))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.read().is_empty()
    }

    /// Watch over the number of tracks in the stream.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.changed_tx.subscribe()
    }

    fn add(&self, track: Arc<dyn RemoteTrack>) -> bool {
        let mut tracks = self.tracks.write();
        let id = track.id();
        if tracks.iter().any(|existing| existing.id() == id) {
            return false;
        }
        tracks.push(track);
        self.changed_tx.send_replace(tracks.len());
        true
    }
}

impl Debug for RemoteStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("participant", &self.participant)
            .field("tracks", &self.track_ids())
            .finish()
    }
}

/// Binds local capture tracks to session transports and collects inbound tracks
/// into one [`RemoteStream`] per participant.
#[derive(Clone)]
pub struct MediaTrackBinder {
    local: LocalMedia,
    streams: Arc<Mutex<HashMap<ParticipantId, RemoteStream>>>,
    events_tx: broadcast::Sender<RoomEvent>,
}

impl MediaTrackBinder {
    pub fn new(local: LocalMedia, events_tx: broadcast::Sender<RoomEvent>) -> Self {
        Self {
            local,
            streams: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
        }
    }

    pub fn local_media(&self) -> &LocalMedia {
        &self.local
    }

    /// Adds every local track to the session's transport.
    ///
    /// A no-op for sessions that already have their tracks attached. The caller marks
    /// the session once this returns `Ok`.
    #[instrument(level = "debug", skip_all, fields(participant = %session.remote_id()), err)]
    pub async fn attach_local_tracks<T: PeerTransport>(
        &self,
        session: &PeerSession<T>,
    ) -> Result<(), SessionError> {
        if session.local_tracks_attached() {
            tracing::trace!("Local tracks already attached");
            return Ok(());
        }
        let Some(transport) = session.transport() else {
            return Err(SessionError::Cancelled);
        };

        for track in self.local.tracks() {
            tracing::trace!(id = %track.id(), kind = %track.kind(), "Attaching local track");
            transport
                .add_track(track)
                .await
                .map_err(SessionError::MediaBind)?;
        }
        Ok(())
    }

    /// Creates the (still empty) remote stream for `participant` and announces it.
    pub fn open_stream(&self, participant: &ParticipantId) -> RemoteStream {
        let mut streams = self.streams.lock();
        if let Some(stream) = streams.get(participant) {
            return stream.clone();
        }

        let stream = RemoteStream::new(participant.clone());
        streams.insert(participant.clone(), stream.clone());
        drop(streams);

        tracing::debug!(%participant, "Opened remote stream");
        let _ = self.events_tx.send(RoomEvent::RemoteStreamAdded {
            participant: participant.clone(),
            stream: stream.clone(),
        });
        stream
    }

    /// Invoked by the transport layer for every inbound track.
    pub fn on_remote_track(&self, participant: &ParticipantId, track: Arc<dyn RemoteTrack>) {
        let stream = self.open_stream(participant);
        let track_id = track.id();
        let kind = track.kind();

        if stream.add(track) {
            tracing::debug!(%participant, %track_id, ?kind, "Remote track added to stream");
            let _ = self.events_tx.send(RoomEvent::RemoteTrackAdded {
                participant: participant.clone(),
                track_id,
                kind,
            });
        } else {
            tracing::trace!(%participant, %track_id, "Ignoring already known remote track");
        }
    }

    pub fn remote_stream(&self, participant: &ParticipantId) -> Option<RemoteStream> {
        self.streams.lock().get(participant).cloned()
    }

    /// Drops the remote stream of `participant`, if any.
    pub fn release(&self, participant: &ParticipantId) {
        if self.streams.lock().remove(participant).is_some() {
            tracing::debug!(%participant, "Released remote stream");
            let _ = self.events_tx.send(RoomEvent::RemoteStreamRemoved {
                participant: participant.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_webrtc::LocalTrack;
    use duet_webrtc::TransportFactory;
    use duet_webrtc::mock::{MockRemoteTrack, MockTransportFactory, TransportOp};
    use pretty_assertions::assert_eq;
    use test_log::test;

    fn remote_track(id: &str, kind: TrackKind) -> Arc<dyn RemoteTrack> {
        Arc::new(MockRemoteTrack {
            id: id.to_string(),
            stream_id: "remote".to_string(),
            kind,
        })
    }

    fn binder() -> (MediaTrackBinder, broadcast::Receiver<RoomEvent>) {
        let (audio, _) = LocalTrack::sample(TrackKind::Audio, "mic");
        let (video, _) = LocalTrack::sample(TrackKind::Video, "camera");
        let (events_tx, events_rx) = broadcast::channel(16);
        (
            MediaTrackBinder::new(LocalMedia::new(vec![audio, video]), events_tx),
            events_rx,
        )
    }

    #[test]
    fn accumulates_tracks_in_any_order() {
        let (binder, mut events) = binder();
        let participant = ParticipantId::from("2");

        binder.on_remote_track(&participant, remote_track("v", TrackKind::Video));
        binder.on_remote_track(&participant, remote_track("a", TrackKind::Audio));
        binder.on_remote_track(&participant, remote_track("v", TrackKind::Video));

        let stream = binder.remote_stream(&participant).unwrap();
        assert_eq!(stream.track_ids(), vec!["v".to_string(), "a".to_string()]);
        assert_eq!(stream.tracks_of(TrackKind::Audio).len(), 1);
        assert_eq!(*stream.subscribe().borrow(), 2);

        assert!(matches!(
            events.try_recv().unwrap(),
            RoomEvent::RemoteStreamAdded { .. }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            RoomEvent::RemoteTrackAdded { kind: Some(TrackKind::Video), .. }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            RoomEvent::RemoteTrackAdded { kind: Some(TrackKind::Audio), .. }
        ));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn empty_stream_and_release() {
        let (binder, mut events) = binder();
        let participant = ParticipantId::from("2");

        let stream = binder.open_stream(&participant);
        assert!(stream.is_empty());
        binder.release(&participant);
        binder.release(&participant);

        assert!(binder.remote_stream(&participant).is_none());
        assert!(matches!(
            events.try_recv().unwrap(),
            RoomEvent::RemoteStreamAdded { .. }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            RoomEvent::RemoteStreamRemoved { .. }
        ));
        assert!(events.try_recv().is_err());
    }

    #[test(tokio::test)]
    async fn attach_is_idempotent() {
        let (binder, _events) = binder();
        let factory = MockTransportFactory::new();
        let participant = ParticipantId::from("2");
        let (transport, events_rx) = factory.create(&participant).await.unwrap();

        let mut session = PeerSession::new(participant.clone(), 0);
        session.install_transport(transport, events_rx);

        binder.attach_local_tracks(&session).await.unwrap();
        session.mark_local_tracks_attached();
        binder.attach_local_tracks(&session).await.unwrap();

        let ops = factory.latest(&participant).unwrap().ops();
        assert_eq!(
            ops,
            vec![
                TransportOp::AddTrack("mic".to_string()),
                TransportOp::AddTrack("camera".to_string())
            ]
        );
    }

    #[test(tokio::test)]
    async fn attach_failure_is_media_bind_error() {
        let (binder, _events) = binder();
        let factory = MockTransportFactory::new();
        factory.fail_add_track(true);
        let participant = ParticipantId::from("2");
        let (transport, events_rx) = factory.create(&participant).await.unwrap();

        let mut session = PeerSession::new(participant, 0);
        session.install_transport(transport, events_rx);

        assert!(matches!(
            binder.attach_local_tracks(&session).await,
            Err(SessionError::MediaBind(_))
        ));
        assert!(!session.local_tracks_attached());
    }
}
