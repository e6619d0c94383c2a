use duet_protocol::ParticipantId;
use serde::{Deserialize, Serialize};

pub const ROOM_EVENTS_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Our own identifier, as known to the other participants. Used for glare tie-breaks.
    pub participant_id: ParticipantId,
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
}

impl RoomConfig {
    pub fn new(participant_id: impl Into<ParticipantId>) -> Self {
        Self {
            participant_id: participant_id.into(),
            events_capacity: ROOM_EVENTS_CAPACITY,
        }
    }
}

fn default_events_capacity() -> usize {
    ROOM_EVENTS_CAPACITY
}
