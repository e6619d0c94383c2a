use duet_protocol::SdpType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebrtcError {
    #[error("unsupported session description type {0:?}")]
    UnsupportedDescription(SdpType),
    #[error("transport closed")]
    Closed,
    #[error(transparent)]
    Other(#[from] Box<anyhow::Error>),
}

impl From<anyhow::Error> for WebrtcError {
    fn from(err: anyhow::Error) -> Self {
        WebrtcError::Other(Box::new(err))
    }
}
