use crate::error::SignalingError;
use crate::transport::{ChannelEvent, SignalingReceiver, SignalingSender};
use async_trait::async_trait;
use duet_protocol::{ParticipantId, SignalEnvelope};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, instrument};

/// Typed dispatch target for everything arriving on a [`SignalChannel`].
///
/// Handlers are invoked sequentially from a single reader task, in the order the
/// relay delivered the events. Implementations should hand work off quickly instead
/// of performing long-running operations inline.
#[async_trait]
pub trait SignalHandler: Send + Sync + 'static {
    /// A decoded envelope unicast to us by `sender`. Invoked once per delivery, so
    /// duplicates from a retrying relay reach the handler as duplicates.
    async fn on_message(&self, sender: ParticipantId, envelope: SignalEnvelope);

    async fn on_member_joined(&self, _id: ParticipantId) {}

    async fn on_member_left(&self, _id: ParticipantId) {}

    /// The inbound side of the channel terminated. No further events follow.
    async fn on_closed(&self, _err: Option<SignalingError>) {}
}

/// Adapter over the pub/sub relay: unicast send of [`SignalEnvelope`]s and a single
/// registered inbound dispatch.
#[derive(Clone)]
pub struct SignalChannel {
    sender: Arc<dyn SignalingSender>,
    subscribed: Arc<AtomicBool>,
}

impl SignalChannel {
    pub fn new(sender: impl SignalingSender) -> Self {
        Self {
            sender: Arc::new(sender),
            subscribed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Unicasts `envelope` to `recipient`.
    ///
    /// Fails with [`SignalingError::Delivery`] if the relay cannot reach the recipient.
    /// Nothing is buffered or retried here.
    #[instrument(level = "debug", skip(self, envelope), fields(kind = %envelope.kind()), err)]
    pub async fn send(
        &self,
        recipient: &ParticipantId,
        envelope: &SignalEnvelope,
    ) -> Result<(), SignalingError> {
        let payload = SignalEnvelope::serialize(envelope)
            .map_err(|err| SignalingError::SerializationError(Box::new(err)))?;
        self.sender.send(recipient, payload).await
    }

    /// Registers `handler` as the dispatch target for `receiver` and starts reading.
    ///
    /// Only one handler may be registered per channel. Malformed payloads are logged
    /// and skipped.
    #[instrument(level = "debug", skip_all, err)]
    pub fn subscribe<R: SignalingReceiver, H: SignalHandler>(
        &self,
        receiver: R,
        handler: Arc<H>,
        shutdown_token: CancellationToken,
    ) -> Result<Subscription, SignalingError> {
        if self.subscribed.swap(true, Ordering::AcqRel) {
            tracing::warn!("Tried to register a second message handler");
            return Err(SignalingError::HandlerAlreadyRegistered);
        }

        let cancel = shutdown_token.child_token();
        let closed = CancellationToken::new();
        let task = tokio::runtime::Handle::current().spawn(
            Self::reader_task(receiver, handler, cancel.clone(), closed.clone())
                .instrument(tracing::Span::current()),
        );

        Ok(Subscription {
            cancel,
            closed,
            subscribed: self.subscribed.clone(),
            task: Some(task),
        })
    }

    /// Closes the outbound side of the relay connection.
    #[instrument(level = "debug", skip(self), err)]
    pub async fn close(&self) -> Result<(), SignalingError> {
        self.sender.close().await
    }

    async fn reader_task<R: SignalingReceiver, H: SignalHandler>(
        mut receiver: R,
        handler: Arc<H>,
        cancel: CancellationToken,
        closed: CancellationToken,
    ) {
        tracing::trace!("Signal channel reader started");
        let err = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Subscription cancelled, stopping reader");
                    break None;
                }
                event = receiver.recv() => event,
            };

            match event {
                Ok(ChannelEvent::Message { sender, payload }) => {
                    match SignalEnvelope::deserialize(&payload) {
                        Ok(envelope) => handler.on_message(sender, envelope).await,
                        Err(err) => {
                            tracing::warn!(?err, %sender, "Skipping malformed signal envelope");
                        }
                    }
                }
                Ok(ChannelEvent::MemberJoined(id)) => handler.on_member_joined(id).await,
                Ok(ChannelEvent::MemberLeft(id)) => handler.on_member_left(id).await,
                Err(err) => {
                    tracing::warn!(?err, "Signal channel receiver failed, stopping reader");
                    break Some(err);
                }
            }
        };

        handler.on_closed(err).await;
        closed.cancel();
        tracing::trace!("Signal channel reader finished");
    }
}

/// Registration handle returned by [`SignalChannel::subscribe`].
///
/// Dropping it stops the reader without waiting for it.
pub struct Subscription {
    cancel: CancellationToken,
    closed: CancellationToken,
    subscribed: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Resolves once the reader has stopped, either by request or because the relay went away.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Stops the reader, waits for it to finish and frees the channel for a new handler.
    #[instrument(level = "debug", skip(self))]
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            tracing::warn!(?err, "Failed to join signal channel reader");
        }
        self.subscribed.store(false, Ordering::Release);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.subscribed.store(false, Ordering::Release);
    }
}
