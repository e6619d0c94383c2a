pub mod binder;
pub mod config;
pub mod error;
pub mod event;
pub mod registry;
pub mod room;
mod router;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use binder::{MediaTrackBinder, RemoteStream};
pub use config::RoomConfig;
pub use error::{RoomError, SessionError};
pub use event::{FailureReason, RoomEvent};
pub use registry::{ConnectionRegistry, SessionHandle};
pub use room::Room;
pub use session::{NegotiationState, Role, SessionStatus};
