use crate::error::RoomError;
use crate::event::RoomEvent;
use crate::registry::{SessionCommand, SessionHandle};
use crate::session::{self, SessionContext};
use async_trait::async_trait;
use duet_protocol::{ParticipantId, SignalEnvelope};
use duet_signaling::SignalHandler;
use duet_signaling::error::SignalingError;
use duet_webrtc::TransportFactory;
use std::sync::Arc;

/// Turns membership changes and inbound signals into session commands.
pub(crate) struct MembershipRouter<F: TransportFactory> {
    ctx: Arc<SessionContext<F>>,
}

impl<F: TransportFactory> MembershipRouter<F> {
    pub(crate) fn new(ctx: Arc<SessionContext<F>>) -> Self {
        Self { ctx }
    }

    /// A participant joined after us: we offer.
    pub(crate) fn on_join(&self, id: ParticipantId) {
        if self.ignored(&id) {
            return;
        }

        let (handle, created) = self.get_or_create(&id);
        if created {
            tracing::info!(participant = %id, "Participant joined, connecting");
            handle.send(SessionCommand::Connect);
        } else {
            tracing::debug!(participant = %id, "Session already exists, ignoring join");
        }
    }

    pub(crate) fn on_leave(&self, id: ParticipantId) {
        match self.ctx.registry.remove(&id) {
            Some(handle) => {
                tracing::info!(participant = %id, generation = handle.generation(), "Participant left, tearing down session");
            }
            None => tracing::debug!(participant = %id, "Leave for unknown participant, ignoring"),
        }
    }

    pub(crate) fn on_signal(&self, sender: ParticipantId, envelope: SignalEnvelope) {
        if self.ignored(&sender) {
            return;
        }

        match &envelope {
            SignalEnvelope::Offer { .. } => {
                let (handle, created) = self.get_or_create(&sender);
                if created {
                    tracing::debug!(participant = %sender, "Session created for inbound offer");
                }
                handle.send(SessionCommand::Signal(envelope));
            }
            SignalEnvelope::Answer { .. } | SignalEnvelope::Candidate { .. } => {
                match self.ctx.registry.get(&sender) {
                    Some(handle) => {
                        handle.send(SessionCommand::Signal(envelope));
                    }
                    None => {
                        tracing::debug!(participant = %sender, kind = %envelope.kind(), "No session for message, discarding as stale");
                    }
                }
            }
        }
    }

    pub(crate) fn retry(&self, id: &ParticipantId) -> Result<(), RoomError> {
        if self.ctx.shutdown_token.is_cancelled() {
            return Err(RoomError::Closed);
        }
        let handle = self
            .ctx
            .registry
            .get(id)
            .ok_or_else(|| RoomError::UnknownParticipant(id.clone()))?;
        if !handle.send(SessionCommand::Retry) {
            return Err(RoomError::UnknownParticipant(id.clone()));
        }
        Ok(())
    }

    fn get_or_create(&self, id: &ParticipantId) -> (SessionHandle, bool) {
        self.ctx.registry.get_or_create(id, |generation, predecessor| {
            session::spawn(self.ctx.clone(), id.clone(), generation, predecessor)
        })
    }

    fn ignored(&self, id: &ParticipantId) -> bool {
        if self.ctx.shutdown_token.is_cancelled() {
            tracing::debug!(participant = %id, "Room shut down, ignoring event");
            return true;
        }
        if id == &self.ctx.local_id {
            tracing::trace!("Ignoring event about ourselves");
            return true;
        }
        false
    }
}

#[async_trait]
impl<F: TransportFactory> SignalHandler for MembershipRouter<F> {
    async fn on_message(&self, sender: ParticipantId, envelope: SignalEnvelope) {
        self.on_signal(sender, envelope);
    }

    async fn on_member_joined(&self, id: ParticipantId) {
        self.on_join(id);
    }

    async fn on_member_left(&self, id: ParticipantId) {
        self.on_leave(id);
    }

    async fn on_closed(&self, err: Option<SignalingError>) {
        match &err {
            Some(err) => tracing::warn!(?err, "Signaling channel closed"),
            None => tracing::debug!("Signaling channel closed"),
        }
        self.ctx.emit(RoomEvent::SignalingClosed {
            reason: err.map(|err| err.to_string()),
        });
    }
}
