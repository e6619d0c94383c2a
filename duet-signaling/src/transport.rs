#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod tokio;

use crate::error::SignalingError;
use async_trait::async_trait;
use duet_protocol::ParticipantId;

/// Something the room relay delivered to this participant.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A raw (still serialized) message unicast to us by `sender`.
    Message {
        sender: ParticipantId,
        payload: String,
    },
    MemberJoined(ParticipantId),
    MemberLeft(ParticipantId),
}

#[async_trait]
pub trait SignalingTransport: Send + Sync + 'static {
    type Sender: SignalingSender;
    type Receiver: SignalingReceiver;

    async fn connect(&self) -> Result<(Self::Sender, Self::Receiver), SignalingError>;
}

#[async_trait]
pub trait SignalingSender: Send + Sync + 'static {
    /// Unicasts an already serialized payload to `recipient`.
    async fn send(&self, recipient: &ParticipantId, payload: String)
    -> Result<(), SignalingError>;
    async fn close(&self) -> Result<(), SignalingError>;
}

#[async_trait]
pub trait SignalingReceiver: Send + 'static {
    async fn recv(&mut self) -> Result<ChannelEvent, SignalingError>;
}
