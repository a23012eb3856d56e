mod error;
mod ledger;

pub use error::LedgerErr;
pub use ledger::{ContributionLedger, ContributionSummary, LedgerDocument, RoundRecord};
