use duet_protocol::ParticipantId;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("connection error: {0}")]
    ConnectionError(#[from] Box<tungstenite::error::Error>),
    #[error("disconnected")]
    Disconnected,
    #[error("serialization error: {0}")]
    SerializationError(#[from] Box<serde_json::Error>),
    #[error("delivery to {recipient} failed: {reason}")]
    Delivery {
        recipient: ParticipantId,
        reason: String,
    },
    #[error("a message handler is already registered")]
    HandlerAlreadyRegistered,
    #[error("invalid signaling url: {0}")]
    InvalidUrl(String),
    #[error("transport error: {0}")]
    Transport(#[from] Box<anyhow::Error>),
}

impl From<anyhow::Error> for SignalingError {
    fn from(err: anyhow::Error) -> Self {
        SignalingError::Transport(Box::new(err))
    }
}

impl SignalingError {
    /// Whether the failure is transient and the send may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SignalingError::Delivery { .. }
                | SignalingError::ConnectionError(_)
                | SignalingError::Transport(_)
        )
    }
}
