use std::{
    error::Error,
    fmt::{self, Display},
};

use crate::ParticipantId;

/// The membership module's result type.
pub type Result<T> = std::result::Result<T, MembershipErr>;

/// Why a participant can't join the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotEligibleReason {
    Unknown,
    NoDataUnits,
    AlreadyActive,
}

/// Membership precondition violations, returned to the caller and never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipErr {
    NotEligible {
        participant: ParticipantId,
        reason: NotEligibleReason,
    },
    NotActive(ParticipantId),
    CapacityReached {
        participant: ParticipantId,
        max_active: usize,
    },
}

impl Display for MembershipErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MembershipErr::NotEligible {
                participant,
                reason,
            } => {
                let reason = match reason {
                    NotEligibleReason::Unknown => "it's not registered",
                    NotEligibleReason::NoDataUnits => "it has no data units assigned",
                    NotEligibleReason::AlreadyActive => "it's already active",
                };
                write!(f, "participant {participant} can't join: {reason}")
            }
            MembershipErr::NotActive(participant) => {
                write!(f, "participant {participant} is not active")
            }
            MembershipErr::CapacityReached {
                participant,
                max_active,
            } => write!(
                f,
                "participant {participant} can't join: the task already has {max_active} active participants"
            ),
        }
    }
}

impl Error for MembershipErr {}
