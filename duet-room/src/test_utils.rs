use crate::event::RoomEvent;
use crate::room::Room;
use crate::session::SessionStatus;
use crate::RoomConfig;
use anyhow::anyhow;
use async_trait::async_trait;
use duet_protocol::{ParticipantId, SignalEnvelope};
use duet_signaling::test_utils::RecvWithTimeoutExt;
use duet_signaling::transport::mock::MockHub;
use duet_signaling::{SignalChannel, SignalHandler, Subscription};
use duet_webrtc::mock::{MockTransportFactory, MockTransportHandle};
use duet_webrtc::{LocalMedia, LocalTrack, TrackKind};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Microphone and camera sample tracks.
pub fn local_media() -> LocalMedia {
    let (audio, _) = LocalTrack::sample(TrackKind::Audio, "mic");
    let (video, _) = LocalTrack::sample(TrackKind::Video, "camera");
    LocalMedia::new(vec![audio, video])
}

/// A [`Room`] on a [`MockHub`], backed by mock transports.
pub struct TestRoom {
    pub id: ParticipantId,
    pub room: Room<MockTransportFactory>,
    pub factory: MockTransportFactory,
    pub events: broadcast::Receiver<RoomEvent>,
    pub shutdown_token: CancellationToken,
}

impl TestRoom {
    pub fn join(hub: &MockHub, id: &str) -> anyhow::Result<Self> {
        Self::join_with(hub, id, MockTransportFactory::new())
    }

    pub fn join_with(
        hub: &MockHub,
        id: &str,
        factory: MockTransportFactory,
    ) -> anyhow::Result<Self> {
        let (sender, receiver) = hub.join(id);
        let shutdown_token = CancellationToken::new();
        let room = Room::join(
            RoomConfig::new(id),
            SignalChannel::new(sender),
            receiver,
            factory.clone(),
            local_media(),
            shutdown_token.clone(),
        )?;
        let events = room.subscribe();

        Ok(Self {
            id: ParticipantId::from(id),
            room,
            factory,
            events,
            shutdown_token,
        })
    }

    pub async fn wait_for_event<P>(&mut self, predicate: P) -> anyhow::Result<RoomEvent>
    where
        P: Fn(&RoomEvent) -> bool + Send,
    {
        self.events.recv_with_timeout(TEST_TIMEOUT, predicate).await
    }

    /// Waits until the session with `remote` exists and its status satisfies `predicate`.
    pub async fn wait_for_status<P>(
        &self,
        remote: &str,
        predicate: P,
    ) -> anyhow::Result<SessionStatus>
    where
        P: Fn(&SessionStatus) -> bool,
    {
        let remote = ParticipantId::from(remote);
        tokio::time::timeout(TEST_TIMEOUT, async {
            loop {
                if let Some(handle) = self.room.session(&remote) {
                    let mut status = handle.watch_status();
                    let reached = status
                        .wait_for(&predicate)
                        .await
                        .map(|status| SessionStatus::clone(&status));
                    if let Ok(status) = reached {
                        return status;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .map_err(|_| anyhow!("Timed out waiting for session status with {remote}"))
    }

    /// Waits until no session with `remote` is left.
    pub async fn wait_for_no_session(&self, remote: &str) -> anyhow::Result<()> {
        let remote = ParticipantId::from(remote);
        tokio::time::timeout(TEST_TIMEOUT, async {
            while let Some(handle) = self.room.session(&remote) {
                handle.finished().await;
            }
        })
        .await
        .map_err(|_| anyhow!("Timed out waiting for session with {remote} to end"))
    }

    pub fn transport(&self, remote: &str) -> Option<MockTransportHandle> {
        self.factory.latest(&ParticipantId::from(remote))
    }
}

struct Inbox(mpsc::UnboundedSender<(ParticipantId, SignalEnvelope)>);

#[async_trait]
impl SignalHandler for Inbox {
    async fn on_message(&self, sender: ParticipantId, envelope: SignalEnvelope) {
        let _ = self.0.send((sender, envelope));
    }
}

/// A participant without sessions that sends and inspects envelopes by hand.
pub struct ScriptedPeer {
    pub id: ParticipantId,
    channel: SignalChannel,
    inbox: mpsc::UnboundedReceiver<(ParticipantId, SignalEnvelope)>,
    _subscription: Subscription,
}

impl ScriptedPeer {
    pub fn join(hub: &MockHub, id: &str) -> anyhow::Result<Self> {
        let (sender, receiver) = hub.join(id);
        let channel = SignalChannel::new(sender);
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let subscription = channel.subscribe(
            receiver,
            std::sync::Arc::new(Inbox(inbox_tx)),
            CancellationToken::new(),
        )?;

        Ok(Self {
            id: ParticipantId::from(id),
            channel,
            inbox,
            _subscription: subscription,
        })
    }

    pub async fn send(&self, to: &str, envelope: SignalEnvelope) -> anyhow::Result<()> {
        self.channel
            .send(&ParticipantId::from(to), &envelope)
            .await
            .map_err(Into::into)
    }

    /// Next envelope received that matches `predicate`; others are skipped.
    pub async fn expect<P>(
        &mut self,
        predicate: P,
    ) -> anyhow::Result<(ParticipantId, SignalEnvelope)>
    where
        P: Fn(&SignalEnvelope) -> bool + Send + Sync,
    {
        self.inbox
            .recv_with_timeout(TEST_TIMEOUT, |(_, envelope)| predicate(envelope))
            .await
    }

    /// Returns `true` if nothing arrives within `duration`.
    pub async fn expect_silence(&mut self, duration: Duration) -> bool {
        tokio::time::timeout(duration, self.inbox.recv()).await.is_err()
    }
}
