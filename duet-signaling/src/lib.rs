pub mod channel;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;

pub use channel::{SignalChannel, SignalHandler, Subscription};
pub use duet_protocol as protocol;
