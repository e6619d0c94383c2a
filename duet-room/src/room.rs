use crate::binder::{MediaTrackBinder, RemoteStream};
use crate::config::RoomConfig;
use crate::error::RoomError;
use crate::event::RoomEvent;
use crate::registry::{ConnectionRegistry, SessionHandle};
use crate::router::MembershipRouter;
use crate::session::{SessionContext, SessionStatus};
use duet_protocol::ParticipantId;
use duet_signaling::transport::SignalingReceiver;
use duet_signaling::{SignalChannel, Subscription};
use duet_webrtc::{LocalMedia, TransportFactory};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// A participant's view of a room: one peer session per other participant,
/// negotiated over a shared [`SignalChannel`].
pub struct Room<F: TransportFactory> {
    ctx: Arc<SessionContext<F>>,
    router: Arc<MembershipRouter<F>>,
    subscription: Mutex<Option<Subscription>>,
}

impl<F: TransportFactory> Room<F> {
    /// Joins the room: registers the inbound dispatch on `channel` and starts reacting
    /// to membership changes and signals read from `receiver`.
    ///
    /// Fails with [`RoomError::NoLocalMedia`] if there is nothing to publish.
    #[instrument(level = "info", skip_all, fields(participant = %config.participant_id), err)]
    pub fn join<R: SignalingReceiver>(
        config: RoomConfig,
        channel: SignalChannel,
        receiver: R,
        factory: F,
        local_media: LocalMedia,
        shutdown_token: CancellationToken,
    ) -> Result<Self, RoomError> {
        if local_media.is_empty() {
            tracing::error!("No local media available, not joining");
            return Err(RoomError::NoLocalMedia);
        }

        let (events_tx, _) = broadcast::channel(config.events_capacity);
        let ctx = Arc::new(SessionContext {
            local_id: config.participant_id,
            channel: channel.clone(),
            factory,
            binder: MediaTrackBinder::new(local_media, events_tx.clone()),
            registry: ConnectionRegistry::new(),
            events_tx,
            shutdown_token: shutdown_token.child_token(),
        });
        let router = Arc::new(MembershipRouter::new(ctx.clone()));
        let subscription =
            channel.subscribe(receiver, router.clone(), ctx.shutdown_token.clone())?;

        tracing::info!("Joined room");
        Ok(Self {
            ctx,
            router,
            subscription: Mutex::new(Some(subscription)),
        })
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.ctx.local_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.ctx.events_tx.subscribe()
    }

    /// Reports a participant joining, for membership sources other than the relay.
    pub fn on_join(&self, id: impl Into<ParticipantId>) {
        self.router.on_join(id.into());
    }

    /// Reports a participant leaving, for membership sources other than the relay.
    pub fn on_leave(&self, id: impl Into<ParticipantId>) {
        self.router.on_leave(id.into());
    }

    /// Re-sends the last offer or answer to `id` whose delivery failed.
    pub fn retry(&self, id: &ParticipantId) -> Result<(), RoomError> {
        self.router.retry(id)
    }

    pub fn session(&self, id: &ParticipantId) -> Option<SessionHandle> {
        self.ctx.registry.get(id)
    }

    pub fn session_status(&self, id: &ParticipantId) -> Option<SessionStatus> {
        self.session(id).map(|handle| handle.status())
    }

    /// Participants we currently hold a session with.
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.ctx.registry.participants()
    }

    pub fn remote_stream(&self, id: &ParticipantId) -> Option<RemoteStream> {
        self.ctx.binder.remote_stream(id)
    }

    pub fn local_media(&self) -> &LocalMedia {
        self.ctx.binder.local_media()
    }

    pub fn is_shut_down(&self) -> bool {
        self.ctx.shutdown_token.is_cancelled()
    }

    /// Leaves the room: stops reading signals, tears down every session and closes the
    /// outbound side of the channel. Returns once all sessions have released their
    /// resources.
    #[instrument(level = "info", skip(self), fields(participant = %self.ctx.local_id))]
    pub async fn shutdown(&self) {
        if self.ctx.shutdown_token.is_cancelled() && self.subscription.lock().is_none() {
            tracing::debug!("Room already shut down");
            return;
        }
        self.ctx.shutdown_token.cancel();

        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe().await;
        }

        let sessions = self.ctx.registry.drain();
        tracing::debug!(count = sessions.len(), "Tearing down sessions");
        // Sessions that removed themselves on cancellation are only found as retiring.
        for finished in self.ctx.registry.retiring() {
            finished.cancelled().await;
        }

        if let Err(err) = self.ctx.channel.close().await {
            tracing::warn!(?err, "Failed to close signaling channel");
        }
        tracing::info!("Left room");
    }
}
