pub mod config;
pub mod error;
pub mod media;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
mod peer;
pub mod transport;

pub use media::{LocalMedia, LocalTrack, RemoteTrack, TrackKind};
pub use peer::{RtcPeer, RtcTransportFactory};
pub use transport::{PeerConnectionState, PeerTransport, TransportEvent, TransportFactory};
