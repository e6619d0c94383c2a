pub mod participant;
pub mod relay;
pub mod signal;

pub use participant::ParticipantId;
pub use signal::{EnvelopeKind, IceCandidate, SdpType, SessionDescription, SignalEnvelope};
