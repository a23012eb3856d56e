use std::{
    error::Error,
    fmt::{self, Display},
};

use crate::PersistenceErr;

/// The ledger module's result type.
pub type Result<T> = std::result::Result<T, LedgerErr>;

#[derive(Debug)]
pub enum LedgerErr {
    DuplicateRound(u64),
    Persistence(PersistenceErr),
}

impl Display for LedgerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerErr::DuplicateRound(round) => {
                write!(f, "round {round} already has a contribution record")
            }
            LedgerErr::Persistence(e) => write!(f, "ledger persistence failed: {e}"),
        }
    }
}

impl Error for LedgerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LedgerErr::Persistence(e) => Some(e),
            LedgerErr::DuplicateRound(_) => None,
        }
    }
}

impl From<PersistenceErr> for LedgerErr {
    fn from(value: PersistenceErr) -> Self {
        Self::Persistence(value)
    }
}
