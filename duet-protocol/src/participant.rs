use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// Opaque identifier of a participant, unique within a room.
///
/// Supplied by the membership collaborator and only ever used as a lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Total order used to break negotiation ties between two participants.
    ///
    /// Identifiers that both parse as unsigned integers are compared numerically,
    /// everything else lexicographically. The result is antisymmetric, so both
    /// ends of a link reach the same verdict without talking to each other.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        match (self.0.parse::<u64>(), other.0.parse::<u64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            _ => self.0.cmp(&other.0),
        }
    }

    /// Returns `true` if `self` ranks above `other` in [`ParticipantId::rank_cmp`].
    pub fn outranks(&self, other: &Self) -> bool {
        self.rank_cmp(other) == Ordering::Greater
    }
}

impl Display for ParticipantId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ParticipantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn numeric_ids_rank_numerically() {
        let nine = ParticipantId::from("9");
        let ten = ParticipantId::from("10");
        assert!(ten.outranks(&nine));
        assert!(!nine.outranks(&ten));
    }

    #[test]
    fn mixed_ids_rank_lexicographically() {
        let a = ParticipantId::from("alice");
        let b = ParticipantId::from("bob");
        let n = ParticipantId::from("42");
        assert!(b.outranks(&a));
        assert!(a.outranks(&n));
    }

    #[test]
    fn rank_is_antisymmetric() {
        let ids = ["1", "2", "007", "7", "x", "y10", "y9"].map(ParticipantId::from);
        for a in &ids {
            for b in &ids {
                assert_eq!(a.rank_cmp(b), b.rank_cmp(a).reverse(), "{a} vs {b}");
                if a != b {
                    assert!(a.outranks(b) ^ b.outranks(a), "{a} vs {b}");
                }
            }
        }
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ParticipantId::from("1234");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"1234\"");
    }
}
