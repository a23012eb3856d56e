pub mod aggregation;
pub mod attribution;
pub mod config;
pub mod error;
pub mod ledger;
pub mod membership;
pub mod orchestration;
pub mod participant;
pub mod partition;
pub mod schedule;
pub mod status;
pub mod storage;
pub mod task;

mod signal;

pub use aggregation::{AggregationErr, Aggregator};
pub use attribution::{AttributionErr, Contributions, ShapleyAttributor};
pub use config::{
    CoalitionBaseline, LrDecay, LrDecaySpec, TaskConfig, TaskSpec, Timing, TimingSpec,
};
pub use error::{InitErr, RoundErr};
pub use ledger::{
    ContributionLedger, ContributionSummary, LedgerDocument, LedgerErr, RoundRecord,
};
pub use membership::{MembershipErr, MembershipRegistry, NotEligibleReason, Roster};
pub use orchestration::{RoundOutcome, RoundRunner};
pub use participant::{ParticipantId, UnitId};
pub use partition::PartitionTable;
pub use schedule::Schedule;
pub use status::{StatusCell, TaskState, TaskStatus};
pub use storage::{PersistenceErr, Snapshot, SnapshotStore};
pub use task::{CompletionReport, StopOutcome, TaskBuilder, TaskHandle, create_task};
