use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The id of a data unit inside a `PartitionTable`.
pub type UnitId = String;

/// An opaque participant identifier, handed out by the hosting application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ParticipantId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
