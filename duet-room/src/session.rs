//! Per-participant negotiation.
//!
//! Every remote participant gets one actor task that owns its [`PeerSession`]. All
//! commands for that participant (join, inbound signals, retries) and all events of
//! its transport are funneled through the actor, so transitions for one participant
//! never interleave, while different participants negotiate in parallel.

use crate::binder::MediaTrackBinder;
use crate::error::SessionError;
use crate::event::RoomEvent;
use crate::registry::{ConnectionRegistry, SessionCommand, SessionHandle};
use duet_protocol::{EnvelopeKind, IceCandidate, ParticipantId, SessionDescription, SignalEnvelope};
use duet_signaling::SignalChannel;
use duet_webrtc::{PeerConnectionState, PeerTransport, TransportEvent, TransportFactory};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferSent,
    OfferReceived,
    AnswerSent,
    AnswerReceived,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Caller,
    Callee,
}

/// Observable snapshot of a session, published after every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: NegotiationState,
    pub role: Option<Role>,
    pub remote_description_applied: bool,
    pub pending_remote_candidates: usize,
    pub local_tracks_attached: bool,
    pub has_transport: bool,
    pub closed: bool,
}

/// What to do with an inbound offer, given the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDisposition {
    /// No negotiation in progress; answer it.
    Accept,
    /// We already are the callee (or done as caller); the offer is a duplicate or late.
    Stale,
    /// Glare, and we keep our own offer. The remote side will yield.
    KeepOwnOffer,
    /// Glare, and we drop our own offer to answer the remote one.
    YieldToRemote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateAction {
    Apply(IceCandidate),
    Buffered,
    Duplicate,
}

pub struct PeerSession<T: PeerTransport> {
    remote_id: ParticipantId,
    generation: u64,
    transport: Option<T>,
    transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    state: NegotiationState,
    role: Option<Role>,
    remote_description_applied: bool,
    pending_remote_candidates: VecDeque<IceCandidate>,
    seen_remote_candidates: HashSet<String>,
    local_tracks_attached: bool,
    /// Last local description whose delivery has not been confirmed.
    unacknowledged: Option<SignalEnvelope>,
    closed: bool,
}

impl<T: PeerTransport> PeerSession<T> {
    pub fn new(remote_id: ParticipantId, generation: u64) -> Self {
        Self {
            remote_id,
            generation,
            transport: None,
            transport_events: None,
            state: NegotiationState::Idle,
            role: None,
            remote_description_applied: false,
            pending_remote_candidates: VecDeque::new(),
            seen_remote_candidates: HashSet::new(),
            local_tracks_attached: false,
            unacknowledged: None,
            closed: false,
        }
    }

    pub fn remote_id(&self) -> &ParticipantId {
        &self.remote_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    pub fn local_tracks_attached(&self) -> bool {
        self.local_tracks_attached
    }

    pub fn pending_remote_candidates(&self) -> impl Iterator<Item = &IceCandidate> {
        self.pending_remote_candidates.iter()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            role: self.role,
            remote_description_applied: self.remote_description_applied,
            pending_remote_candidates: self.pending_remote_candidates.len(),
            local_tracks_attached: self.local_tracks_attached,
            has_transport: self.transport.is_some(),
            closed: self.closed,
        }
    }

    pub(crate) fn install_transport(
        &mut self,
        transport: T,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        self.transport = Some(transport);
        self.transport_events = Some(events);
        self.local_tracks_attached = false;
    }

    /// Detaches the transport. Events it may still raise are dropped with the receiver.
    pub(crate) fn take_transport(&mut self) -> Option<T> {
        self.transport_events = None;
        self.transport.take()
    }

    pub(crate) fn mark_local_tracks_attached(&mut self) {
        self.local_tracks_attached = true;
    }

    pub fn offer_disposition(&self, local_id: &ParticipantId) -> OfferDisposition {
        match self.role {
            None => OfferDisposition::Accept,
            Some(Role::Callee) => OfferDisposition::Stale,
            Some(Role::Caller) if self.remote_description_applied => OfferDisposition::Stale,
            Some(Role::Caller) if local_id.outranks(&self.remote_id) => {
                OfferDisposition::YieldToRemote
            }
            Some(Role::Caller) => OfferDisposition::KeepOwnOffer,
        }
    }

    /// Decides whether an inbound candidate can be applied right away.
    ///
    /// Candidates are buffered until a remote description is applied and a candidate
    /// that was already seen is never applied twice.
    pub fn accept_remote_candidate(&mut self, candidate: IceCandidate) -> CandidateAction {
        let key = format!(
            "{}|{:?}|{:?}",
            candidate.candidate, candidate.sdp_mid, candidate.sdp_m_line_index
        );
        if !self.seen_remote_candidates.insert(key) {
            return CandidateAction::Duplicate;
        }

        if self.remote_description_applied && self.transport.is_some() {
            CandidateAction::Apply(candidate)
        } else {
            self.pending_remote_candidates.push_back(candidate);
            CandidateAction::Buffered
        }
    }

    pub(crate) fn take_pending_candidates(&mut self) -> Vec<IceCandidate> {
        self.pending_remote_candidates.drain(..).collect()
    }

    /// Forgets everything negotiated so far except inbound candidates, which belong to
    /// the remote side's transport and stay valid.
    pub(crate) fn reset_negotiation(&mut self) {
        self.state = NegotiationState::Idle;
        self.role = None;
        self.remote_description_applied = false;
        self.unacknowledged = None;
    }

    fn discard(&mut self) -> usize {
        let discarded = self.pending_remote_candidates.len();
        self.pending_remote_candidates.clear();
        self.seen_remote_candidates.clear();
        self.unacknowledged = None;
        self.closed = true;
        discarded
    }
}

/// Everything a session actor shares with the rest of the room.
pub(crate) struct SessionContext<F: TransportFactory> {
    pub(crate) local_id: ParticipantId,
    pub(crate) channel: SignalChannel,
    pub(crate) factory: F,
    pub(crate) binder: MediaTrackBinder,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) events_tx: broadcast::Sender<RoomEvent>,
    pub(crate) shutdown_token: CancellationToken,
}

impl<F: TransportFactory> SessionContext<F> {
    pub(crate) fn emit(&self, event: RoomEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// Spawns the actor for a new session and returns its handle.
///
/// If a previous session for the same participant is still tearing down, the new
/// actor queues its commands until `predecessor` fires.
pub(crate) fn spawn<F: TransportFactory>(
    ctx: Arc<SessionContext<F>>,
    remote_id: ParticipantId,
    generation: u64,
    predecessor: Option<CancellationToken>,
) -> SessionHandle {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let cancel = ctx.shutdown_token.child_token();
    let finished = CancellationToken::new();
    let session = PeerSession::new(remote_id.clone(), generation);
    let (status_tx, status_rx) = watch::channel(session.status());

    let actor = SessionActor {
        ctx: ctx.clone(),
        session,
        commands: commands_rx,
        cancel: cancel.clone(),
        status_tx,
    };

    let span = tracing::info_span!("session", participant = %remote_id, generation);
    {
        let finished = finished.clone();
        let remote_id = remote_id.clone();
        tokio::runtime::Handle::current().spawn(
            async move {
                actor.run(predecessor).await;
                ctx.registry.retire(&remote_id, generation);
                finished.cancel();
            }
            .instrument(span),
        );
    }

    SessionHandle::new(remote_id, generation, commands_tx, cancel, finished, status_rx)
}

struct SessionActor<F: TransportFactory> {
    ctx: Arc<SessionContext<F>>,
    session: PeerSession<F::Transport>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    cancel: CancellationToken,
    status_tx: watch::Sender<SessionStatus>,
}

async fn next_transport_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

impl<F: TransportFactory> SessionActor<F> {
    async fn run(mut self, predecessor: Option<CancellationToken>) {
        if let Some(predecessor) = predecessor {
            tracing::trace!("Waiting for previous session to finish teardown");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {}
                _ = predecessor.cancelled() => {}
            }
        }
        tracing::debug!("Session started");

        let outcome = loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Err(SessionError::Cancelled),
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break Err(SessionError::Cancelled),
                },
                event = next_transport_event(&mut self.session.transport_events) => match event {
                    Some(event) => self.handle_transport_event(event).await,
                    None => {
                        tracing::trace!("Transport event stream ended");
                        self.session.transport_events = None;
                        Ok(())
                    }
                },
            };

            match result {
                Ok(()) => {}
                Err(SessionError::Stale { participant, kind }) => {
                    tracing::debug!(%participant, %kind, "Discarding stale message");
                }
                Err(SessionError::Delivery(err)) => {
                    tracing::debug!(?err, "Signal not delivered, session stays up");
                }
                Err(err) => break Err(err),
            }
        };

        self.teardown(outcome).await;
    }

    async fn handle_command(&mut self, command: SessionCommand) -> Result<(), SessionError> {
        match command {
            SessionCommand::Connect => self.create_offer().await,
            SessionCommand::Signal(envelope) => match envelope {
                SignalEnvelope::Offer { offer } => self.receive_offer(offer).await,
                SignalEnvelope::Answer { answer } => self.receive_answer(answer).await,
                SignalEnvelope::Candidate { candidate } => self.receive_candidate(candidate).await,
            },
            SessionCommand::Retry => self.retry().await,
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) -> Result<(), SessionError> {
        match event {
            TransportEvent::IceCandidate(candidate) => {
                tracing::trace!(?candidate, "Trickling local ICE candidate");
                self.deliver(&SignalEnvelope::Candidate { candidate }).await
            }
            TransportEvent::Track(track) => {
                self.ctx.binder.on_remote_track(&self.session.remote_id, track);
                Ok(())
            }
            TransportEvent::ConnectionState(state) => match state {
                PeerConnectionState::Connected => {
                    tracing::info!("Connected to peer");
                    self.ctx.emit(RoomEvent::SessionConnected {
                        participant: self.session.remote_id.clone(),
                    });
                    Ok(())
                }
                PeerConnectionState::Disconnected => {
                    tracing::info!("Disconnected from peer, waiting for recovery");
                    Ok(())
                }
                PeerConnectionState::Failed => {
                    tracing::warn!("Connection to peer failed");
                    Err(SessionError::TransportFailure)
                }
                PeerConnectionState::Closed => {
                    tracing::info!("Peer connection closed");
                    Err(SessionError::Cancelled)
                }
                state => {
                    tracing::trace!(?state, "Received connection state");
                    Ok(())
                }
            },
        }
    }

    async fn create_offer(&mut self) -> Result<(), SessionError> {
        if self.session.role.is_some() {
            tracing::debug!(state = ?self.session.state, "Already negotiating, not creating an offer");
            return Ok(());
        }

        tracing::info!("Creating offer");
        self.session.role = Some(Role::Caller);
        self.publish();
        self.prepare_transport().await?;

        let offer = {
            let transport = self.session.transport().ok_or(SessionError::Cancelled)?;
            self.guarded(transport.create_offer()).await??
        };

        let envelope = SignalEnvelope::Offer { offer };
        self.session.unacknowledged = Some(envelope.clone());
        self.deliver(&envelope).await?;
        self.session.unacknowledged = None;
        self.transition(NegotiationState::OfferSent);
        Ok(())
    }

    async fn receive_offer(&mut self, offer: SessionDescription) -> Result<(), SessionError> {
        match self.session.offer_disposition(&self.ctx.local_id) {
            OfferDisposition::Accept => {}
            OfferDisposition::Stale => {
                return Err(SessionError::Stale {
                    participant: self.session.remote_id.clone(),
                    kind: EnvelopeKind::Offer,
                });
            }
            OfferDisposition::KeepOwnOffer => {
                tracing::info!("Offers crossed, keeping own offer");
                return Ok(());
            }
            OfferDisposition::YieldToRemote => {
                tracing::info!("Offers crossed, dropping own offer to answer the remote one");
                self.release_transport().await;
                self.session.reset_negotiation();
            }
        }

        self.session.role = Some(Role::Callee);
        self.transition(NegotiationState::OfferReceived);
        self.prepare_transport().await?;
        self.apply_remote_description(offer).await?;

        let answer = {
            let transport = self.session.transport().ok_or(SessionError::Cancelled)?;
            self.guarded(transport.create_answer()).await??
        };

        let envelope = SignalEnvelope::Answer { answer };
        self.session.unacknowledged = Some(envelope.clone());
        self.deliver(&envelope).await?;
        self.session.unacknowledged = None;
        self.transition(NegotiationState::AnswerSent);
        self.transition(NegotiationState::Stable);
        Ok(())
    }

    async fn receive_answer(&mut self, answer: SessionDescription) -> Result<(), SessionError> {
        if self.session.role != Some(Role::Caller) || self.session.remote_description_applied {
            return Err(SessionError::Stale {
                participant: self.session.remote_id.clone(),
                kind: EnvelopeKind::Answer,
            });
        }

        // An answer proves the offer arrived, even if its delivery was reported as failed.
        self.session.unacknowledged = None;
        self.transition(NegotiationState::AnswerReceived);
        self.apply_remote_description(answer).await?;
        self.transition(NegotiationState::Stable);
        Ok(())
    }

    async fn receive_candidate(&mut self, candidate: IceCandidate) -> Result<(), SessionError> {
        match self.session.accept_remote_candidate(candidate) {
            CandidateAction::Apply(candidate) => self.apply_candidate(candidate).await,
            CandidateAction::Buffered => {
                tracing::trace!("Buffering remote ICE candidate until remote description is set");
                self.publish();
                Ok(())
            }
            CandidateAction::Duplicate => {
                tracing::debug!("Ignoring duplicate remote ICE candidate");
                Ok(())
            }
        }
    }

    async fn retry(&mut self) -> Result<(), SessionError> {
        let Some(envelope) = self.session.unacknowledged.clone() else {
            tracing::debug!(state = ?self.session.state, "Nothing to retry");
            return Ok(());
        };

        tracing::info!(kind = %envelope.kind(), "Retrying delivery");
        self.deliver(&envelope).await?;
        self.session.unacknowledged = None;
        match envelope {
            SignalEnvelope::Offer { .. } => self.transition(NegotiationState::OfferSent),
            SignalEnvelope::Answer { .. } => {
                self.transition(NegotiationState::AnswerSent);
                self.transition(NegotiationState::Stable);
            }
            SignalEnvelope::Candidate { .. } => {}
        }
        Ok(())
    }

    /// Allocates the transport if needed and binds the local tracks to it.
    async fn prepare_transport(&mut self) -> Result<(), SessionError> {
        if self.session.transport.is_none() {
            let (transport, events) = self
                .cancellable(self.ctx.factory.create(&self.session.remote_id))
                .await??;
            // Installed before the liveness check so teardown releases it.
            self.session.install_transport(transport, events);
            self.ensure_live()?;
            self.ctx.binder.open_stream(&self.session.remote_id);
        }

        self.guarded(self.ctx.binder.attach_local_tracks(&self.session))
            .await??;
        self.session.mark_local_tracks_attached();
        self.publish();
        Ok(())
    }

    async fn release_transport(&mut self) {
        if let Some(transport) = self.session.take_transport() {
            tracing::debug!("Releasing transport");
            if let Err(err) = transport.close().await {
                tracing::warn!(?err, "Failed to close transport");
            }
        }
        self.ctx.binder.release(&self.session.remote_id);
    }

    async fn apply_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), SessionError> {
        {
            let transport = self.session.transport().ok_or(SessionError::Cancelled)?;
            self.guarded(transport.set_remote_description(description))
                .await??;
        }
        self.session.remote_description_applied = true;
        self.publish();

        let pending = self.session.take_pending_candidates();
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "Flushing buffered remote ICE candidates");
        }
        for candidate in pending {
            self.apply_candidate(candidate).await?;
        }
        self.publish();
        Ok(())
    }

    async fn apply_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError> {
        let transport = self.session.transport().ok_or(SessionError::Cancelled)?;
        if let Err(err) = self
            .guarded(transport.add_remote_ice_candidate(candidate))
            .await?
        {
            tracing::warn!(?err, "Failed to add remote ICE candidate");
        }
        Ok(())
    }

    async fn deliver(&self, envelope: &SignalEnvelope) -> Result<(), SessionError> {
        let remote_id = &self.session.remote_id;
        self.guarded(self.ctx.channel.send(remote_id, envelope))
            .await?
            .map_err(|err| {
                tracing::warn!(?err, kind = %envelope.kind(), "Failed to deliver signal");
                self.ctx.emit(RoomEvent::DeliveryFailed {
                    participant: remote_id.clone(),
                    kind: envelope.kind(),
                    reason: err.to_string(),
                });
                SessionError::Delivery(err)
            })
    }

    /// Races `fut` against teardown.
    async fn cancellable<O>(&self, fut: impl Future<Output = O>) -> Result<O, SessionError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SessionError::Cancelled),
            output = fut => Ok(output),
        }
    }

    /// Races `fut` against teardown and discards its output if the session was
    /// replaced or removed from the registry in the meantime.
    async fn guarded<O>(&self, fut: impl Future<Output = O>) -> Result<O, SessionError> {
        let output = self.cancellable(fut).await?;
        self.ensure_live()?;
        Ok(output)
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.cancel.is_cancelled()
            || !self
                .ctx
                .registry
                .is_live(&self.session.remote_id, self.session.generation)
        {
            tracing::debug!("Session no longer live, discarding result");
            return Err(SessionError::Cancelled);
        }
        Ok(())
    }

    fn transition(&mut self, state: NegotiationState) {
        tracing::debug!(from = ?self.session.state, to = ?state, "Negotiation state changed");
        self.session.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.session.status());
    }

    async fn teardown(&mut self, outcome: Result<(), SessionError>) {
        let remote_id = self.session.remote_id.clone();
        self.ctx
            .registry
            .remove_if_current(&remote_id, self.session.generation);

        self.release_transport().await;
        let discarded = self.session.discard();
        if discarded > 0 {
            tracing::debug!(discarded, "Discarded buffered remote ICE candidates");
        }
        self.publish();

        match outcome.err().and_then(|err| err.failure_reason()) {
            Some(reason) => {
                tracing::warn!(?reason, "Session failed, tearing down");
                self.ctx.emit(RoomEvent::SessionFailed {
                    participant: remote_id.clone(),
                    reason,
                });
            }
            None => tracing::info!("Session torn down"),
        }
        self.ctx.emit(RoomEvent::SessionClosed {
            participant: remote_id,
        });
    }
}
